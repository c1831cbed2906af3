pub mod background;
pub mod config;
pub mod error;
pub mod handlers;
pub mod state;
