pub mod evaluation;
pub mod execution_result;
pub mod position;
pub mod types;

pub use evaluation::{Decision, TradeEvaluation};
pub use execution_result::{ExecutionResult, ExecutionStatus};
pub use position::{PositionInvariantError, VirtualPosition};
pub use types::{ExecutionMode, OrderStatus, OrderType, Regime, Side};
