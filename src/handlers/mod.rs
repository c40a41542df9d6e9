mod health;
mod workspace;

pub use health::{health_check, readiness_check};
pub use workspace::{not_found, workspace_index, workspace_page};
