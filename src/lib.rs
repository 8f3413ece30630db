pub mod config;
pub mod error;
pub mod handlers;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod state;

pub use config::Config;
pub use state::AppState;
