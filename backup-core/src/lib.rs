pub mod backup;
pub mod chain;
pub mod checksum;
pub mod clock;
pub mod config;
pub mod constants;
pub mod database;
pub mod db;
pub mod dump;
pub mod error;
pub mod locks;
pub mod manifest;
pub mod models;
pub mod notify;
pub mod remote;
pub mod retention;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod verify;

pub use error::{BackupError, Result};
