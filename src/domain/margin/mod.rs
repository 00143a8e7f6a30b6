pub mod types;

pub use types::{MarginData, MarginPrediction, MarginStatus, MarginSufficiency, MarginThresholds};
