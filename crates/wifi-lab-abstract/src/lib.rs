pub mod config;
pub mod interface;
pub mod scenario;
pub mod segment;
pub mod time;

pub use interface::{AppContext, AppId, Application, NodeId, RxCounter};
pub use segment::Segment;
pub use time::SimTime;

pub use config::{
    ConfigError, ExperimentConfig, FlowConfig, FlowOverride, FlowPlan, LinkConfig, WifiConfig,
};
pub use scenario::{ConfigOverride, RunSpec, ScenarioFile};
