pub mod atomic_entry_manager;
pub mod order_strategy;
pub mod service;
pub mod stop_manager;
pub mod tp_sl_calculator;

pub use atomic_entry_manager::{AtomicEntryManager, AtomicEntryResult, RollbackOutcome};
pub use order_strategy::{ExecutionStyle, OrderStrategy};
pub use service::ExecutionService;
pub use stop_manager::{AutoExecution, AutoExecutionKind, StopCheckOutcome, StopManager};
pub use tp_sl_calculator::{TpSl, TpSlCalculator};
