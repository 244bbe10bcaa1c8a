mod historical_fact;
mod pool_snapshot;
mod pool_version;
mod tvl_point;

pub use historical_fact::{HistoricalFact, HistoricalFactRow};
pub use pool_snapshot::{PoolAttributes, PoolSnapshot};
pub use pool_version::{PoolVersion, VALID_TO_SENTINEL};
pub use tvl_point::TvlPoint;
