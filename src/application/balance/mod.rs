pub mod monitor;

pub use monitor::{margin_ratio_pct, BalanceMonitor};
