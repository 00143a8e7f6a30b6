pub mod adapter;
pub mod ensemble;
pub mod loader;
pub mod onnx_predictor;
pub mod smartcore_predictor;

pub use adapter::MLAdapter;
pub use ensemble::{EnsemblePredictor, WeightedMember};
pub use loader::{MLLoader, ModelLevel};
