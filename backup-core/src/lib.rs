pub mod archive;
pub mod backup;
pub mod config;
pub mod constants;
pub mod database;
pub mod db;
pub mod dialect;
pub mod dump;
pub mod error;
pub mod executor;
pub mod file_sync;
pub mod notifier;

pub use error::{BackupError, ErrorCategory, Result};
