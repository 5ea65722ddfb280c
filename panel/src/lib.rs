pub mod config;
pub mod error;
pub mod identity;
pub mod provisioning;
pub mod routes;
pub mod state;

pub use state::{AppState, Operator};
