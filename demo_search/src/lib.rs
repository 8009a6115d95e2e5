//! Demonstration-count search - core library
//!
//! Finds the smallest number of expert demonstrations an imitation-learning
//! agent needs to come within a tolerance of its best observed performance,
//! by binary search over an external train+evaluate pipeline.

pub mod cli;
pub mod experiment;
pub mod oracle;
pub mod results;
pub mod search;
pub mod settings;
pub mod telemetry;
pub mod trainer;

pub use search::{BinarySearch, Evaluator, SearchConfig, SearchOutcome};
