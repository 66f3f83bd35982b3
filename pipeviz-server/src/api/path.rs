//! Run address path segments

use serde::Deserialize;

use pipeviz_core::domain::RunRef;

use super::error::{ApiError, ApiResult};

/// `/{owner}/{repo}/{branch}/{build}` as captured by the router
#[derive(Debug, Deserialize)]
pub struct RunPath {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub build: String,
}

impl RunPath {
    /// Validates the segments; the build must be a positive number
    pub fn into_run_ref(self) -> ApiResult<RunRef> {
        let build = match self.build.parse::<u32>() {
            Ok(build) if build > 0 => build,
            _ => return Err(ApiError::InvalidBuild(self.build)),
        };

        Ok(RunRef::new(self.owner, self.repo, self.branch, build))
    }
}
