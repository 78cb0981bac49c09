//! HTTP and WebSocket surface of the stackly presence server.

pub mod error;
pub mod handlers;
pub mod health;
pub mod server;
pub mod session;

pub use error::ApiError;
pub use server::{build_presence, build_router, start, AppState, ServerHandle};
