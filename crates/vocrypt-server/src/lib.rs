pub mod connection;
pub mod protocol;
pub mod routes;
pub mod server;

pub use routes::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
