// Grading engine: runs untrusted submissions against problem test cases
pub mod artifact;
pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod feedback;
pub mod grader;
pub mod problem_store;


pub use config::LanguageConfigManager;
pub use engine::{ExecutionEngine, ProcessEngine};
pub use error::GraderError;
pub use grader::{Grader, GraderOptions};
pub use problem_store::ProblemStore;
