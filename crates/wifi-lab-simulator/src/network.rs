//! A small deterministic stand-in for the network runtime: one point-to-point
//! hop from the traffic peer to the access point and one shared wireless hop
//! from the access point to its stations.
//!
//! Each hop serialises one frame at a time in FIFO order. Frames lost on the
//! wireless hop are reported back to their sender after the retransmit
//! timeout; delivered frames are acknowledged after the return-path delay.

use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};
use wifi_lab_abstract::{
    AppContext, AppId, Application, ExperimentConfig, NodeId, Segment, SimTime,
};

use crate::engine::{EventId, EventQueue};
use crate::error::HandleError;
use crate::registry::{RxSource, SinkHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeRole {
    AccessPoint,
    Peer,
    Station(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    PointToPoint,
    Wireless,
}

#[derive(Debug)]
pub enum NetEvent {
    StartApp(AppId),
    StopApp(AppId),
    TxComplete(Hop),
    ArriveAtAccessPoint(Segment),
    Deliver(Segment),
    Ack(Segment),
    RetransmitTimeout(Segment),
}

/// Counters describing what happened on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub segments_sent: u64,
    pub segments_delivered: u64,
    pub segments_lost: u64,
    pub undeliverable: u64,
}

struct HopQueue {
    rate_bps: u64,
    delay: SimTime,
    overhead: SimTime,
    waiting: VecDeque<Segment>,
    in_service: Option<Segment>,
}

impl HopQueue {
    fn new(rate_bps: u64, delay: SimTime, overhead: SimTime) -> Self {
        Self {
            rate_bps,
            delay,
            overhead,
            waiting: VecDeque::new(),
            in_service: None,
        }
    }

    fn transmission_time(&self, bytes: u32) -> SimTime {
        let bits = u128::from(bytes) * 8 * 1_000_000_000;
        let rate = u128::from(self.rate_bps.max(1));
        let nanos = bits.div_ceil(rate);
        SimTime::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)) + self.overhead
    }

    /// Queue a segment. Returns the service time if the hop was idle.
    fn enqueue(&mut self, segment: Segment) -> Option<SimTime> {
        if self.in_service.is_none() {
            self.in_service = Some(segment);
            Some(self.transmission_time(segment.bytes))
        } else {
            self.waiting.push_back(segment);
            None
        }
    }

    /// Finish the frame in service and start the next one, if any.
    fn complete(&mut self) -> (Option<Segment>, Option<SimTime>) {
        let done = self.in_service.take();
        let next = self.waiting.pop_front().map(|segment| {
            self.in_service = Some(segment);
            self.transmission_time(segment.bytes)
        });
        (done, next)
    }

    fn backlog(&self) -> usize {
        self.waiting.len() + usize::from(self.in_service.is_some())
    }
}

/// Requests buffered while an application callback runs.
#[derive(Default)]
struct ActionBuffer {
    outgoing: Vec<Segment>,
    logs: Vec<String>,
}

/// Context handed to an application for the duration of one callback.
struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    app: AppId,
    now: SimTime,
}

impl AppContext for ScopedContext<'_> {
    fn app_id(&self) -> AppId {
        self.app
    }

    fn send(&mut self, segment: Segment) {
        self.buffer.outgoing.push(segment);
    }

    fn now(&self) -> SimTime {
        self.now
    }

    fn log(&mut self, message: &str) {
        self.buffer.logs.push(message.to_string());
    }
}

struct InstalledApp {
    node: NodeId,
    app: Box<dyn Application>,
}

pub struct WifiNetwork {
    nodes: Vec<NodeRole>,
    apps: Vec<InstalledApp>,
    sinks_by_node: HashMap<NodeId, AppId>,
    p2p: HopQueue,
    wifi: HopQueue,
    ack_delay: SimTime,
    retransmit_timeout: SimTime,
    loss_rate: f64,
    rng: rand::rngs::StdRng,
    stats: NetworkStats,
}

impl WifiNetwork {
    pub fn new(config: &ExperimentConfig) -> Self {
        let p2p_delay = SimTime::from_micros(config.p2p.delay_us);
        let wifi_delay = SimTime::from_micros(config.wifi.delay_us);
        Self {
            nodes: Vec::new(),
            apps: Vec::new(),
            sinks_by_node: HashMap::new(),
            p2p: HopQueue::new(config.p2p.data_rate_bps, p2p_delay, SimTime::ZERO),
            wifi: HopQueue::new(
                config.wifi.data_rate_bps,
                wifi_delay,
                SimTime::from_micros(config.wifi.mac_overhead_us),
            ),
            ack_delay: p2p_delay + wifi_delay,
            retransmit_timeout: SimTime::from_millis(config.flow.retransmit_timeout_ms),
            loss_rate: config.wifi.loss_rate,
            rng: rand::rngs::StdRng::seed_from_u64(config.wifi.seed),
            stats: NetworkStats::default(),
        }
    }

    pub fn add_node(&mut self, role: NodeRole) -> NodeId {
        self.nodes.push(role);
        NodeId(self.nodes.len() - 1)
    }

    pub fn role(&self, node: NodeId) -> Option<NodeRole> {
        self.nodes.get(node.0).copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Install an application on `node`. Apps exposing a received-byte
    /// counter become the delivery target for segments addressed to that node.
    pub fn install(&mut self, node: NodeId, app: Box<dyn Application>) -> AppId {
        let id = AppId(self.apps.len());
        if app.rx_counter().is_some() {
            self.sinks_by_node.insert(node, id);
        }
        debug!("Installed {} as {} on {}", app.kind(), id, node);
        self.apps.push(InstalledApp { node, app });
        id
    }

    pub fn app(&self, id: AppId) -> Option<&dyn Application> {
        self.apps.get(id.0).map(|slot| slot.app.as_ref())
    }

    pub fn app_node(&self, id: AppId) -> Option<NodeId> {
        self.apps.get(id.0).map(|slot| slot.node)
    }

    pub fn app_count(&self) -> usize {
        self.apps.len()
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn schedule_start<E: From<NetEvent>>(
        &self,
        queue: &mut EventQueue<E>,
        app: AppId,
        at: SimTime,
    ) -> EventId {
        queue.schedule_at(at, NetEvent::StartApp(app).into())
    }

    pub fn schedule_stop<E: From<NetEvent>>(
        &self,
        queue: &mut EventQueue<E>,
        app: AppId,
        at: SimTime,
    ) -> EventId {
        queue.schedule_at(at, NetEvent::StopApp(app).into())
    }

    pub fn handle<E: From<NetEvent>>(&mut self, queue: &mut EventQueue<E>, event: NetEvent) {
        match event {
            NetEvent::StartApp(id) => {
                info!("Starting {} at {}s", id, queue.now());
                self.with_app(queue, id, |app, ctx| app.start(ctx));
            }
            NetEvent::StopApp(id) => {
                info!("Stopping {} at {}s", id, queue.now());
                self.with_app(queue, id, |app, ctx| app.stop(ctx));
            }
            NetEvent::TxComplete(Hop::PointToPoint) => {
                let (done, next) = self.p2p.complete();
                if let Some(tx_time) = next {
                    queue.schedule(tx_time, NetEvent::TxComplete(Hop::PointToPoint).into());
                }
                if let Some(segment) = done {
                    queue.schedule(
                        self.p2p.delay,
                        NetEvent::ArriveAtAccessPoint(segment).into(),
                    );
                }
            }
            NetEvent::ArriveAtAccessPoint(segment) => {
                if let Some(tx_time) = self.wifi.enqueue(segment) {
                    queue.schedule(tx_time, NetEvent::TxComplete(Hop::Wireless).into());
                }
            }
            NetEvent::TxComplete(Hop::Wireless) => {
                let (done, next) = self.wifi.complete();
                if let Some(tx_time) = next {
                    queue.schedule(tx_time, NetEvent::TxComplete(Hop::Wireless).into());
                }
                if let Some(segment) = done {
                    if self.frame_lost() {
                        debug!("Frame seq={} to {} lost on wireless hop", segment.seq, segment.dst);
                        self.stats.segments_lost += 1;
                        queue.schedule(
                            self.retransmit_timeout,
                            NetEvent::RetransmitTimeout(segment).into(),
                        );
                    } else {
                        queue.schedule(self.wifi.delay, NetEvent::Deliver(segment).into());
                    }
                }
            }
            NetEvent::Deliver(segment) => match self.sinks_by_node.get(&segment.dst).copied() {
                Some(sink) => {
                    self.stats.segments_delivered += 1;
                    self.with_app(queue, sink, |app, ctx| app.on_receive(ctx, segment));
                    queue.schedule(self.ack_delay, NetEvent::Ack(segment).into());
                }
                None => {
                    debug!("No sink on {}, dropping seq={}", segment.dst, segment.seq);
                    self.stats.undeliverable += 1;
                }
            },
            NetEvent::Ack(segment) => {
                self.with_app(queue, segment.src, |app, ctx| app.on_ack(ctx, segment));
            }
            NetEvent::RetransmitTimeout(segment) => {
                self.with_app(queue, segment.src, |app, ctx| app.on_loss(ctx, segment));
            }
        }
    }

    fn frame_lost(&mut self) -> bool {
        // lossless runs never touch the rng
        self.loss_rate > 0.0 && self.rng.random::<f64>() < self.loss_rate
    }

    fn with_app<E, F>(&mut self, queue: &mut EventQueue<E>, id: AppId, callback: F)
    where
        E: From<NetEvent>,
        F: FnOnce(&mut dyn Application, &mut dyn AppContext),
    {
        let mut buffer = ActionBuffer::default();
        {
            let Some(slot) = self.apps.get_mut(id.0) else {
                warn!("Event for unknown application {}", id);
                return;
            };
            let mut ctx = ScopedContext {
                buffer: &mut buffer,
                app: id,
                now: queue.now(),
            };
            callback(slot.app.as_mut(), &mut ctx);
        }
        self.process_actions(queue, id, buffer);
    }

    fn process_actions<E: From<NetEvent>>(
        &mut self,
        queue: &mut EventQueue<E>,
        source: AppId,
        buffer: ActionBuffer,
    ) {
        for log in buffer.logs {
            debug!("[{}] {}", source, log);
        }

        let role = self.app_node(source).and_then(|node| self.role(node));
        for segment in buffer.outgoing {
            self.stats.segments_sent += 1;
            match role {
                Some(NodeRole::Peer) => {
                    if let Some(tx_time) = self.p2p.enqueue(segment) {
                        queue.schedule(tx_time, NetEvent::TxComplete(Hop::PointToPoint).into());
                    }
                }
                Some(NodeRole::AccessPoint) => {
                    if let Some(tx_time) = self.wifi.enqueue(segment) {
                        queue.schedule(tx_time, NetEvent::TxComplete(Hop::Wireless).into());
                    }
                }
                _ => {
                    debug!("No route for traffic from {} ({:?})", source, role);
                    self.stats.undeliverable += 1;
                }
            }
        }
    }

    /// Frames waiting for or occupying each hop, `(point-to-point, wireless)`.
    pub fn backlog(&self) -> (usize, usize) {
        (self.p2p.backlog(), self.wifi.backlog())
    }
}

impl RxSource for WifiNetwork {
    fn cumulative_received_bytes(&self, sink: SinkHandle) -> Result<u64, HandleError> {
        let app = self.app(sink.app()).ok_or(HandleError::UnknownApp(sink.app()))?;
        let counter = app.rx_counter().ok_or(HandleError::NotASink {
            app: sink.app(),
            kind: app.kind(),
        })?;
        Ok(counter.cumulative_received_bytes())
    }
}
