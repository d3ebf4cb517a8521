//! Multi-round research coordination
//!
//! The round protocol and everything that fans work out to agents:
//!
//! - [`dispatch`] - bounded fan-out/fan-in with per-unit isolation
//! - [`context`] - what each agent sees in each round
//! - [`orchestrator::RoundOrchestrator`] - the run state machine
//! - [`resolver::ConflictResolver`] - evidence-backed resolution pass
//!
//! # Usage
//!
//! ```ignore
//! use mediator::research::{OrchestratorOptions, RoundOrchestrator};
//!
//! let orchestrator = RoundOrchestrator::new(reasoner, grounding, OrchestratorOptions::default());
//! let analysis = orchestrator.run(problem, &roster, &cancel).await?;
//!
//! println!("{}", analysis.synthesis);
//! for (i, source) in analysis.sources.iter().enumerate() {
//!     println!("[{}] {}", i + 1, source.display_line());
//! }
//! ```

pub mod context;
pub mod dispatch;
pub mod orchestrator;
pub mod resolver;

pub use dispatch::{fan_out, DispatchPolicy, Dispatched};
pub use orchestrator::{DispatchMode, OrchestratorOptions, RoundOrchestrator};
pub use resolver::{ConflictResolver, ResolutionTarget};
