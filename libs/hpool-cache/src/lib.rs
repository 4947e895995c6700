pub mod cache_status;
pub mod monitor;

use hpool_core::CoreError;
use hpool_db::DbError;
use thiserror::Error;

pub use cache_status::{Item, PoolCacheStatus, State};
pub use monitor::PoolCacheMonitor;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
