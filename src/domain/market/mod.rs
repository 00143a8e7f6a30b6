pub mod bar;
pub mod timeframe;

pub use bar::{Bar, BarFrame};
pub use timeframe::Timeframe;
