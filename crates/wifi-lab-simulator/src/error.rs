use thiserror::Error;
use wifi_lab_abstract::{AppId, ConfigError};

use crate::driver::ExperimentState;

/// A sink handle could not be turned into a received-byte reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("{0} is not installed")]
    UnknownApp(AppId),
    #[error("{app} is a {kind} application and does not count received bytes")]
    NotASink { app: AppId, kind: &'static str },
}

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot read flow {flow}: {source}")]
    Handle {
        flow: usize,
        #[source]
        source: HandleError,
    },
    #[error("cannot {action} an experiment that is {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: ExperimentState,
    },
}
