//! Upstream yields API fetcher (pool snapshots and per-pool TVL charts).

pub mod client;
pub mod parse;

pub use client::{ChartFetch, YieldsClient};
