use crate::segment::Segment;
use crate::time::SimTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a simulated host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Handle of an application installed on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app#{}", self.0)
    }
}

/// Capability of an endpoint that counts the payload it has received.
pub trait RxCounter {
    /// Total payload bytes received since the endpoint was created.
    fn cumulative_received_bytes(&self) -> u64;
}

/// What the network offers to an application while one of its callbacks runs.
/// Requests are buffered and applied by the network once the callback returns.
pub trait AppContext {
    /// Handle of the application being called.
    fn app_id(&self) -> AppId;

    /// Hand a segment to the network for delivery.
    fn send(&mut self, segment: Segment);

    /// Current simulation time.
    fn now(&self) -> SimTime;

    fn log(&mut self, message: &str);
}

/// An application installed on a simulated node.
pub trait Application {
    fn kind(&self) -> &'static str;

    fn start(&mut self, _ctx: &mut dyn AppContext) {}

    fn stop(&mut self, _ctx: &mut dyn AppContext) {}

    /// A segment addressed to this app's node arrived.
    fn on_receive(&mut self, _ctx: &mut dyn AppContext, _segment: Segment) {}

    /// A segment this app sent reached its destination.
    fn on_ack(&mut self, _ctx: &mut dyn AppContext, _segment: Segment) {}

    /// A segment this app sent was lost and its retransmit timer expired.
    fn on_loss(&mut self, _ctx: &mut dyn AppContext, _segment: Segment) {}

    /// Received-byte counter of this app, if it is a sink.
    fn rx_counter(&self) -> Option<&dyn RxCounter> {
        None
    }
}
