#![forbid(unsafe_code)]

pub mod batch;
pub mod cli;
pub mod cone;
pub mod config;
pub mod error;
pub mod executor;
pub mod identity;
pub mod models;
pub mod report;
pub mod resolve;
pub mod sqlite;
pub mod transport;
pub mod utils;
pub mod votable;

pub use cli::app::{Cli, Command};
pub use error::QueryError;
