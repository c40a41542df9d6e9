//! Workspace page endpoints.
//!
//! These are the downstream routes a rewritten request lands on. The page
//! renderer lives outside this service, so the handlers answer with the
//! routing they observed: the workspace, the path inside it, the URI the
//! client asked for, and how the workspace was determined.
//!
//! - `GET /{workspace}` and `GET /{workspace}/`
//! - `GET /{workspace}/{*path}`
//!
//! Paths under the API prefix are never workspace pages. No API routes are
//! mounted here, so they answer 404.

use axum::Json;
use axum::extract::{Extension, OriginalUri, Path, State};
use tracing::instrument;

use crate::error::{AppError, AppResult};
use crate::middleware::TenantContext;
use crate::models::WorkspacePageResponse;
use crate::state::AppState;
use crate::tenancy::rewrite::is_api_path;
use crate::validation::validate_slug;

fn page(
    state: &AppState,
    workspace: String,
    path: String,
    original_uri: OriginalUri,
    tenant: Option<Extension<TenantContext>>,
) -> AppResult<Json<WorkspacePageResponse>> {
    if is_api_path(original_uri.0.path(), &state.config.api_prefix) {
        return Err(AppError::NotFound(format!(
            "No route for {}",
            original_uri.0.path()
        )));
    }

    validate_slug(&workspace)
        .map_err(|_| AppError::NotFound(format!("No workspace at /{workspace}")))?;

    Ok(Json(WorkspacePageResponse {
        workspace,
        path,
        original_uri: original_uri.0.to_string(),
        source: tenant.map(|Extension(ctx)| ctx.source.as_str()),
    }))
}

/// Workspace landing page.
#[instrument(skip(state, original_uri, tenant))]
pub async fn workspace_index(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
    original_uri: OriginalUri,
    tenant: Option<Extension<TenantContext>>,
) -> AppResult<Json<WorkspacePageResponse>> {
    page(&state, workspace, "/".to_string(), original_uri, tenant)
}

/// A page inside a workspace.
#[instrument(skip(state, original_uri, tenant))]
pub async fn workspace_page(
    State(state): State<AppState>,
    Path((workspace, path)): Path<(String, String)>,
    original_uri: OriginalUri,
    tenant: Option<Extension<TenantContext>>,
) -> AppResult<Json<WorkspacePageResponse>> {
    page(&state, workspace, format!("/{path}"), original_uri, tenant)
}

/// JSON 404 for anything no route matched.
pub async fn not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}
