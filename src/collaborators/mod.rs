pub mod confirm;
pub mod exec;
pub mod harness;
pub mod registry;
pub mod statics;
pub mod synthesis;

use std::sync::Arc;

pub use confirm::{DriverConfirmer, ExploitConfirmation};
pub use harness::{DriverFlags, DriverHarness, NodeHarness};
pub use registry::{NpmRegistry, PackageRegistry};
pub use statics::{SourceScan, StaticAnalysis};
pub use synthesis::{ExploitSynthesis, SolverSynthesis, SynthesisFlags};

use crate::config::AnalysisConfig;

/// The external collaborators one pipeline run talks to. Each seam is a
/// trait so tests can substitute mocks for the real npm/node/solver-backed
/// implementations.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn PackageRegistry>,
    pub statics: Arc<dyn StaticAnalysis>,
    pub harness: Arc<dyn DriverHarness>,
    pub synthesis: Arc<dyn ExploitSynthesis>,
    pub confirmation: Arc<dyn ExploitConfirmation>,
}

/// Production collaborators backed by npm, node and z3 subprocesses.
pub fn default_collaborators(config: &AnalysisConfig) -> Collaborators {
    let timeout = config.driver_timeout_secs;
    Collaborators {
        registry: Arc::new(NpmRegistry::new(timeout)),
        statics: Arc::new(SourceScan::new()),
        harness: Arc::new(NodeHarness::new(timeout)),
        synthesis: Arc::new(SolverSynthesis::new(timeout)),
        confirmation: Arc::new(DriverConfirmer::new(timeout)),
    }
}
