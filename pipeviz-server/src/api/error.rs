//! API Error Handling
//!
//! Handler failures are answered with a status code and a JSON body of the
//! form `{"error": "..."}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use pipeviz_core::domain::RunRef;

#[derive(Debug)]
pub enum ApiError {
    /// The addressed run is not in the running registry
    NotRunning(RunRef),
    /// The build segment of a run path is not a positive number
    InvalidBuild(String),
    /// A team other than the watched namespace was addressed
    UnknownTeam(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotRunning(_) | Self::UnknownTeam(_) => StatusCode::NOT_FOUND,
            Self::InvalidBuild(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::NotRunning(run) => format!("Pipeline {} is not running", run),
            Self::InvalidBuild(build) => format!("Invalid build number: {:?}", build),
            Self::UnknownTeam(team) => format!("Unknown team {:?}", team),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        tracing::debug!("Request failed with {}: {}", status, message);

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_message() {
        let missing = ApiError::NotRunning(RunRef::new("acme", "widgets", "main", 3));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.message(), "Pipeline acme/widgets/main/3 is not running");

        let invalid = ApiError::InvalidBuild("latest".to_string());
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.message(), "Invalid build number: \"latest\"");

        let team = ApiError::UnknownTeam("ops".to_string());
        assert_eq!(team.status(), StatusCode::NOT_FOUND);
        assert_eq!(team.message(), "Unknown team \"ops\"");
    }

    #[test]
    fn test_into_response_status() {
        let response = ApiError::InvalidBuild("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
