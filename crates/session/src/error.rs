//! Session errors.

use enrichments_config::ConfigError;
use enrichments_core::error::{LifecycleError, StoreError};
use enrichments_pool::PoolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
}
