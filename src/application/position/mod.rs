pub mod cooldown;
pub mod limits;
pub mod tracker;

pub use cooldown::{CooldownManager, CooldownStatus, TrendStrengthBreakdown};
pub use limits::{PositionLimits, ProposedTrade};
pub use tracker::{CleanupHandles, PositionTracker, TotalExposure};
