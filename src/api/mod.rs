// HTTP API surface

pub mod oauth;
pub mod sessions;

pub use oauth::{create_oauth_router, run_state_cleanup, OAuthAppState, StateManager};
pub use sessions::{create_session_router, SessionAppState};
