pub mod apps;
pub mod driver;
pub mod engine;
pub mod error;
pub mod network;
pub mod registry;
pub mod sampler;
pub mod topology;
pub mod trace;

pub use driver::{Experiment, ExperimentEvent, ExperimentState, ExperimentWorld};
pub use engine::{EventId, EventQueue, Handler, RunOutcome, Simulator};
pub use error::{ExperimentError, HandleError};
pub use network::{NetEvent, NetworkStats, NodeRole, WifiNetwork};
pub use registry::{FlowEntry, FlowRegistry, RxSource, SinkHandle};
pub use sampler::{PeriodicTask, SampleRecord, SampleTick, SamplerDiagnostics, ThroughputSampler};
pub use topology::{Topology, TopologyBuilder};
pub use trace::{ExperimentReport, FlowSummary};
