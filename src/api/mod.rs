pub mod auth;
pub mod errors;
pub mod handlers;
pub mod server;

pub use auth::{AuthTable, AuthenticatedSubject};
pub use server::{router, serve, ApiConfig, AppState};
