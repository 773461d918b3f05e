pub mod orchestrator;
pub mod scenario;

pub use orchestrator::Orchestrator;
pub use scenario::Scenario;
