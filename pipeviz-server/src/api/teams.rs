//! Redirects for links minted under the team-scoped URL layout

use axum::{
    extract::{Path, State},
    response::Redirect,
};
use serde::Deserialize;

use super::AppState;
use super::error::{ApiError, ApiResult};
use super::path::RunPath;

/// `/teams/{team}/projects/{owner}/{repo}/{branch}/{build}`
#[derive(Debug, Deserialize)]
pub struct TeamRunPath {
    pub team: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub build: String,
}

/// GET /teams/{team}/projects/{owner}/{repo}/{branch}/{build}
/// Permanently redirects to the run's running-pipeline resource
pub async fn team_project_redirect(
    State(state): State<AppState>,
    Path(path): Path<TeamRunPath>,
) -> ApiResult<Redirect> {
    if path.team != state.namespace {
        return Err(ApiError::UnknownTeam(path.team));
    }
    let run = RunPath {
        owner: path.owner,
        repo: path.repo,
        branch: path.branch,
        build: path.build,
    }
    .into_run_ref()?;

    Ok(Redirect::permanent(&format!("/running/{}", run)))
}
