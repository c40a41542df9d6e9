mod api;

pub use api::{BackendNames, HealthResponse, WorkspacePageResponse};
