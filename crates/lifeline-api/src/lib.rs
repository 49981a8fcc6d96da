pub mod alerts;
pub mod appointments;
pub mod emergency;
pub mod middleware;
pub mod profile;
pub mod providers;

use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use tracing::error;

use lifeline_db::Database;
use lifeline_dispatch::DispatchError;
use lifeline_dispatch::alert::AlertDispatcher;
use lifeline_dispatch::notifier::AppointmentNotifier;
use lifeline_types::api::ErrorBody;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: AlertDispatcher,
    pub notifier: AppointmentNotifier,
}

pub(crate) fn error_body(message: &str) -> Json<ErrorBody> {
    Json(ErrorBody { error: message.to_string() })
}

/// Map core errors to role-appropriate, human-readable responses. Internal
/// error kinds never reach the client verbatim.
pub(crate) fn dispatch_error_response(e: DispatchError) -> (StatusCode, Json<ErrorBody>) {
    match e {
        DispatchError::MissingLocation => (
            StatusCode::BAD_REQUEST,
            error_body("We need your location to send help. Please share your location and try again."),
        ),
        DispatchError::Geo(_) => (
            StatusCode::BAD_REQUEST,
            error_body("That location looks invalid. Please re-enter it."),
        ),
        DispatchError::UnknownUser(_) => {
            (StatusCode::NOT_FOUND, error_body("Account not found."))
        }
        DispatchError::UnknownAppointment(_) => {
            (StatusCode::NOT_FOUND, error_body("Appointment not found."))
        }
        DispatchError::InvalidTransition(_) => (
            StatusCode::CONFLICT,
            error_body("That appointment can no longer be changed in this way."),
        ),
        DispatchError::Conflict(_) => (
            StatusCode::CONFLICT,
            error_body("The appointment was just updated by someone else. Please refresh and try again."),
        ),
        DispatchError::Storage(err) => {
            error!("Storage failure: {:#}", err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                error_body("We could not record your request. Please try again."),
            )
        }
    }
}
