// Library interface for the server binary and the integration tests

pub mod admit;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod model;
pub mod paths;
pub mod queries;
pub mod registry;
pub mod scheduler;
pub mod schema;
pub mod serve;
pub mod service;
pub mod trigger;

pub use constants::EXPECTED_DB_VERSION;
pub use error::{DetectError, ErrorKind, Result};
