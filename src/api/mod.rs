//! HTTP and WebSocket adapter
//!
//! Commands, round snapshots, history and the observer stream for both games.
//! Transport only: every rule lives in [`crate::games`].

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

pub use handlers::AppState;
pub use server::ApiServer;
