pub mod evaluator;
pub mod registry;
pub mod state;
pub mod transitions;
