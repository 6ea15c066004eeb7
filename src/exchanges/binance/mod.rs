pub mod chart_cache;
pub mod depth_cache;
pub mod messages;

pub use chart_cache::ChartCache;
pub use depth_cache::DepthCache;
pub use messages::{DepthDiff, DepthSnapshot, KlineEvent, RestKline};
