pub mod types;

pub use types::{BreakerSnapshot, CircuitState, ErrorRecord, Severity};
