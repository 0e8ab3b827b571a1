//! Visual token pool: pooled, reusable orbs that present enrichments.
//!
//! Tokens follow `Free → Binding → Active → Releasing → Free`. Asset loads
//! are shared and reference counted per key, and results from a superseded
//! binding are discarded by epoch.

pub mod assets;
pub mod error;
pub mod loader;
pub mod orbit;
pub mod pool;
pub mod token;
pub mod transition;

pub use error::PoolError;
pub use loader::DeferredLoader;
pub use orbit::{OrbitPresenter, orbit_offsets};
pub use pool::{PoolSettings, PoolStats, TokenPool, Warmth};
pub use token::{OwnerId, TokenId, TokenState, VisualSlot, VisualToken};
