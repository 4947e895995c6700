pub mod config;
pub mod dependency_graph;
pub mod json_diff;
pub mod manager;
pub mod models;
pub mod pool_info;
pub mod utils;

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

pub use models::{ObjectType, PoolUpdateStatus};
pub use pool_info::PoolInfo;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid pool at {path}: {reason}")]
    InvalidPool { path: PathBuf, reason: String },

    #[error("Pool {0} is not registered")]
    PoolNotRegistered(PathBuf),

    #[error("Pool inclusion cycle: {}", format_cycle(.0))]
    PoolCycle(Vec<Uuid>),

    #[error("{path} is not inside {base}")]
    NotInBasePath { path: PathBuf, base: PathBuf },
}

pub type Result<T> = std::result::Result<T, CoreError>;

fn format_cycle(uuids: &[Uuid]) -> String {
    uuids
        .iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Parse a UUID the way item files store them, treating an empty string as nil.
pub fn parse_uuid(s: &str) -> Option<Uuid> {
    if s.is_empty() {
        Some(Uuid::nil())
    } else {
        Uuid::parse_str(s).ok()
    }
}
