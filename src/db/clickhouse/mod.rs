pub mod client;
pub mod ops;

pub use client::ClickhouseClient;
pub use ops::AppendOutcome;
