//! Nearest-provider lookup: coordinate validation, Haversine distance and
//! a deterministic ranked scan over the provider directory snapshot.

use serde::Serialize;
use uuid::Uuid;

use lifeline_types::models::{Coordinate, ProviderSummary};

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum GeoError {
    #[error("invalid coordinate: lat {lat}, lon {lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderMatch {
    pub provider_id: Uuid,
    pub distance_km: f64,
}

/// Reject out-of-range or non-finite coordinates before any scan.
pub fn validate(coord: Coordinate) -> Result<(), GeoError> {
    let ok = coord.lat.is_finite()
        && coord.lon.is_finite()
        && (-90.0..=90.0).contains(&coord.lat)
        && (-180.0..=180.0).contains(&coord.lon);
    if ok {
        Ok(())
    } else {
        Err(GeoError::InvalidCoordinate { lat: coord.lat, lon: coord.lon })
    }
}

/// Great-circle distance between two points, in kilometers.
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Find candidates within `radius_km` of `origin`, nearest first. Ties break
/// on rating descending, then provider id ascending, so the result order is
/// deterministic. Candidates without a recorded location are skipped, as are
/// providers whose own service radius excludes the origin. An empty result
/// is a normal outcome; the caller decides whether to widen the search.
pub fn find_nearby(
    origin: Coordinate,
    radius_km: f64,
    candidates: &[ProviderSummary],
) -> Result<Vec<ProviderMatch>, GeoError> {
    validate(origin)?;

    let mut scored: Vec<(ProviderMatch, f64)> = candidates
        .iter()
        .filter_map(|p| {
            let loc = p.location?;
            let distance_km = haversine_km(origin, loc);
            if distance_km > radius_km {
                return None;
            }
            if let Some(service_radius) = p.service_radius_km {
                if distance_km > service_radius {
                    return None;
                }
            }
            Some((ProviderMatch { provider_id: p.id, distance_km }, p.rating))
        })
        .collect();

    scored.sort_by(|(a, ra), (b, rb)| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then(rb.total_cmp(ra))
            .then(a.provider_id.cmp(&b.provider_id))
    });

    Ok(scored.into_iter().map(|(m, _)| m).collect())
}
