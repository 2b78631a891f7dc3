use clap::ValueEnum;

pub mod benches;
pub mod clock;
pub mod error;
pub mod harness;
pub mod isolation;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod schema;
pub mod stats;

pub use error::{BodyError, HarnessError, Result};
pub use harness::{Isolation, Profile, RunConfig};
pub use registry::{Probe, ProbeConfig, Registry};
pub use scheduler::Scheduler;
pub use schema::{ProbeResult, RunReport};

/// Output format for run reports.
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned, human-readable column table.
    #[default]
    Text,
    /// Tab-separated rows with a header line, for downstream aggregation.
    Tsv,
    /// Pretty-printed JSON report.
    Json,
}
