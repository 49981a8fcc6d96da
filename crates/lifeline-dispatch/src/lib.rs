pub mod alert;
pub mod notifier;
pub mod policy;

use uuid::Uuid;

use lifeline_geo::GeoError;
use lifeline_types::models::InvalidTransition;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("a location is required to raise an emergency")]
    MissingLocation,

    #[error(transparent)]
    Geo(#[from] GeoError),

    #[error("unknown user {0}")]
    UnknownUser(Uuid),

    #[error("unknown appointment {0}")]
    UnknownAppointment(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("appointment {0} was modified concurrently")]
    Conflict(Uuid),

    #[error("storage failure")]
    Storage(#[source] anyhow::Error),
}
