//! Multi-leg cycle evaluation: forward conversion with fees, profitability
//! check, and the traceback that reserves consumed depth.

pub mod evaluator;
pub mod types;

pub use evaluator::Evaluator;
pub use types::{
    Consumption, Cycle, EvalError, ForwardPass, Leg, Notionals, Operator, Outcome, OutcomeKind, Position, Step, Trade,
};
