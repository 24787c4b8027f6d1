//! Local HTTP API over the license validator, consumed by the dashboard.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tradeyoda_license::{
    CapabilitySurface, LicenseError, LicenseNotice, LicenseValidator, ValidationOutcome,
    ValidatorState,
};
use tracing::warn;

/// License state as reported to the dashboard.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LicenseStatus {
    /// Current validator state; `CHECKING` while an attempt is running.
    pub state: ValidatorState,
    /// Capabilities from the last completed attempt.
    pub surface: CapabilitySurface,
    /// Message category for the dashboard banner.
    pub notice: LicenseNotice,
    /// Rendered `notice`.
    pub message: String,
    /// End of the offline grace period when running on the cache.
    pub offline_until: Option<DateTime<Utc>>,
    /// When the last attempt finished.
    pub checked_at: Option<DateTime<Utc>>,
}

impl LicenseStatus {
    /// Status for `outcome`, reported under the validator's live `state`.
    pub fn new(state: ValidatorState, outcome: &ValidationOutcome) -> Self {
        let notice = if state == ValidatorState::Checking {
            LicenseNotice::Checking
        } else {
            outcome.notice()
        };
        Self {
            state,
            surface: outcome.surface(),
            message: notice.to_string(),
            notice,
            offline_until: outcome.offline_until,
            checked_at: outcome.checked_at,
        }
    }

    /// Status for a completed outcome.
    pub fn from_outcome(outcome: &ValidationOutcome) -> Self {
        Self::new(outcome.state, outcome)
    }
}

/// Body of `POST /api/v1/license/activate`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActivateRequest {
    pub license_key: String,
}

/// Activation result: the attempt's state and the resulting status.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActivateResponse {
    pub state: ValidatorState,
    pub status: LicenseStatus,
}

/// JSON body of 4xx/5xx responses.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps library errors onto HTTP responses.
pub struct ApiError(LicenseError);

impl From<LicenseError> for ApiError {
    fn from(err: LicenseError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            LicenseError::InvalidKeyFormat(_) => StatusCode::BAD_REQUEST,
            _ => {
                warn!("License API request failed: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn status_handler(State(validator): State<Arc<LicenseValidator>>) -> Json<LicenseStatus> {
    Json(LicenseStatus::new(
        validator.state(),
        &validator.last_outcome(),
    ))
}

async fn activate_handler(
    State(validator): State<Arc<LicenseValidator>>,
    Json(request): Json<ActivateRequest>,
) -> Result<Json<ActivateResponse>, ApiError> {
    let state = validator.activate(&request.license_key).await?;
    Ok(Json(ActivateResponse {
        state,
        status: LicenseStatus::from_outcome(&validator.last_outcome()),
    }))
}

async fn revalidate_handler(
    State(validator): State<Arc<LicenseValidator>>,
) -> Json<LicenseStatus> {
    let outcome = validator.validate().await;
    Json(LicenseStatus::from_outcome(&outcome))
}

async fn deactivate_handler(
    State(validator): State<Arc<LicenseValidator>>,
) -> Result<StatusCode, ApiError> {
    validator.deactivate().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Build the license API router over a shared validator.
pub fn build_router(validator: Arc<LicenseValidator>) -> Router {
    Router::new()
        .route("/api/v1/license", get(status_handler))
        .route("/api/v1/license/activate", post(activate_handler))
        .route("/api/v1/license/revalidate", post(revalidate_handler))
        .route("/api/v1/license/deactivate", post(deactivate_handler))
        .with_state(validator)
}
