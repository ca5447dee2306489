pub mod machine;
pub mod orchestrator;
pub mod report;
pub mod state;

pub use machine::{advance, KeywordPhase, PhaseEvent};
pub use orchestrator::{OrchestratorSettings, ScanOrchestrator, ScanOutcome};
pub use report::{CategorySummary, ScanReport};
pub use state::{ScanState, StatusCounts};
