pub mod convergence;
pub mod driver;

pub use convergence::ConvergenceChecker;
pub use driver::{PassPlan, ReindexPass};
