pub mod app;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod platform;
pub mod progress;
pub mod repo;
pub mod retention;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;
