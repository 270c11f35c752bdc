pub mod agent;
pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod http;
pub mod llm;
pub mod manager;
pub mod model;
pub mod render;
pub mod server;
pub mod session;
pub mod sql_guard;

pub use config::Config;
pub use error::{Error, Result};
