use serde::{Deserialize, Serialize};

use crate::interface::{AppId, NodeId};

/// A unit of application payload moving from a sender app to a destination node.
///
/// Framing and headers are not modelled; `bytes` is payload only, which is
/// exactly what a sink adds to its received-byte counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Application that sent the segment and receives its ACK / loss notice.
    pub src: AppId,
    pub dst: NodeId,
    pub seq: u64,
    pub bytes: u32,
}

impl Segment {
    pub fn new(src: AppId, dst: NodeId, seq: u64, bytes: u32) -> Self {
        Self {
            src,
            dst,
            seq,
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }
}
