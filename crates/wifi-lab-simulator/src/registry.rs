use serde::Serialize;
use wifi_lab_abstract::{AppId, NodeId, SimTime};

use crate::error::{ExperimentError, HandleError};

/// Reference to the receiving endpoint of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SinkHandle(AppId);

impl SinkHandle {
    pub fn new(app: AppId) -> Self {
        Self(app)
    }

    pub fn app(&self) -> AppId {
        self.0
    }
}

/// Anything that can report how many bytes a sink has received so far.
pub trait RxSource {
    fn cumulative_received_bytes(&self, sink: SinkHandle) -> Result<u64, HandleError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowEntry {
    pub index: usize,
    pub sender: AppId,
    pub sink: SinkHandle,
    pub station: NodeId,
    /// `None` when the sender is never started.
    pub start: Option<SimTime>,
    pub stop: SimTime,
}

/// Flows indexed `0..len` in creation order. Entries are never replaced.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: Vec<FlowEntry>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a flow and return its index.
    pub(crate) fn register(
        &mut self,
        sender: AppId,
        sink: SinkHandle,
        station: NodeId,
        start: Option<SimTime>,
        stop: SimTime,
    ) -> usize {
        let index = self.flows.len();
        self.flows.push(FlowEntry {
            index,
            sender,
            sink,
            station,
            start,
            stop,
        });
        index
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FlowEntry> {
        self.flows.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowEntry> {
        self.flows.iter()
    }

    /// Read every flow's cumulative counter, failing on the first bad handle.
    pub fn read_all(&self, source: &dyn RxSource) -> Result<Vec<u64>, ExperimentError> {
        self.flows
            .iter()
            .map(|flow| {
                source
                    .cumulative_received_bytes(flow.sink)
                    .map_err(|source| ExperimentError::Handle {
                        flow: flow.index,
                        source,
                    })
            })
            .collect()
    }
}
