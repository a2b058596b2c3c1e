//! REST server for the SQL paste workflows (feature `server`).

mod server;

pub use server::{router, serve, AppState};
