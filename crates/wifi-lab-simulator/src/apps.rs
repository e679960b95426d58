use std::collections::VecDeque;
use wifi_lab_abstract::{AppContext, Application, FlowConfig, NodeId, RxCounter, Segment};

/// Sends as much data as the window allows toward one destination node,
/// optionally stopping after a fixed byte budget.
pub struct BulkSendApp {
    dst: NodeId,
    /// 0 means unbounded.
    max_bytes: u64,
    segment_size: u32,
    window: u32,
    running: bool,
    next_seq: u64,
    sent_bytes: u64,
    acked_bytes: u64,
    in_flight: u32,
    retransmit: VecDeque<Segment>,
}

impl BulkSendApp {
    pub fn new(dst: NodeId, max_bytes: u64, flow: &FlowConfig) -> Self {
        Self {
            dst,
            max_bytes,
            segment_size: flow.segment_size,
            window: flow.window_segments,
            running: false,
            next_seq: 0,
            sent_bytes: 0,
            acked_bytes: 0,
            in_flight: 0,
            retransmit: VecDeque::new(),
        }
    }

    pub fn acked_bytes(&self) -> u64 {
        self.acked_bytes
    }

    fn next_segment_bytes(&self) -> u32 {
        if self.max_bytes == 0 {
            return self.segment_size;
        }
        let remaining = self.max_bytes.saturating_sub(self.sent_bytes);
        u32::try_from(remaining.min(u64::from(self.segment_size))).unwrap_or(self.segment_size)
    }

    fn fill_window(&mut self, ctx: &mut dyn AppContext) {
        while self.running && self.in_flight < self.window {
            let segment = if let Some(segment) = self.retransmit.pop_front() {
                segment
            } else {
                let bytes = self.next_segment_bytes();
                if bytes == 0 {
                    break;
                }
                let segment = Segment::new(ctx.app_id(), self.dst, self.next_seq, bytes);
                self.next_seq += 1;
                self.sent_bytes += u64::from(bytes);
                segment
            };
            ctx.send(segment);
            self.in_flight += 1;
        }
    }
}

impl Application for BulkSendApp {
    fn kind(&self) -> &'static str {
        "bulk-send"
    }

    fn start(&mut self, ctx: &mut dyn AppContext) {
        self.running = true;
        ctx.log(&format!("bulk send to {} started", self.dst));
        self.fill_window(ctx);
    }

    fn stop(&mut self, ctx: &mut dyn AppContext) {
        self.running = false;
        ctx.log(&format!(
            "bulk send to {} stopped after {} bytes acknowledged",
            self.dst, self.acked_bytes
        ));
    }

    fn on_ack(&mut self, ctx: &mut dyn AppContext, segment: Segment) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.acked_bytes += u64::from(segment.bytes);
        if self.max_bytes != 0 && self.acked_bytes == self.max_bytes {
            ctx.log(&format!("byte budget of {} delivered", self.max_bytes));
        }
        self.fill_window(ctx);
    }

    fn on_loss(&mut self, ctx: &mut dyn AppContext, segment: Segment) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.retransmit.push_back(segment);
        self.fill_window(ctx);
    }
}

/// Counts payload bytes addressed to its node while running.
#[derive(Debug, Default)]
pub struct PacketSinkApp {
    running: bool,
    total_rx: u64,
}

impl PacketSinkApp {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RxCounter for PacketSinkApp {
    fn cumulative_received_bytes(&self) -> u64 {
        self.total_rx
    }
}

impl Application for PacketSinkApp {
    fn kind(&self) -> &'static str {
        "packet-sink"
    }

    fn start(&mut self, _ctx: &mut dyn AppContext) {
        self.running = true;
    }

    fn stop(&mut self, ctx: &mut dyn AppContext) {
        self.running = false;
        ctx.log(&format!("sink stopped with {} bytes received", self.total_rx));
    }

    fn on_receive(&mut self, _ctx: &mut dyn AppContext, segment: Segment) {
        if self.running {
            self.total_rx += u64::from(segment.bytes);
        }
    }

    fn rx_counter(&self) -> Option<&dyn RxCounter> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wifi_lab_abstract::{AppId, SimTime};

    #[derive(Default)]
    struct Capture {
        sent: Vec<Segment>,
    }

    impl AppContext for Capture {
        fn app_id(&self) -> AppId {
            AppId(0)
        }

        fn send(&mut self, segment: Segment) {
            self.sent.push(segment);
        }

        fn now(&self) -> SimTime {
            SimTime::ZERO
        }

        fn log(&mut self, _message: &str) {}
    }

    fn flow(window: u32) -> FlowConfig {
        FlowConfig {
            segment_size: 100,
            window_segments: window,
            ..Default::default()
        }
    }

    #[test]
    fn sender_respects_window_and_budget() {
        let mut app = BulkSendApp::new(NodeId(2), 250, &flow(8));
        let mut ctx = Capture::default();
        app.start(&mut ctx);

        let sizes: Vec<u32> = ctx.sent.iter().map(|s| s.bytes).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(ctx.sent[2].seq, 2);
    }

    #[test]
    fn ack_opens_window() {
        let mut app = BulkSendApp::new(NodeId(2), 0, &flow(2));
        let mut ctx = Capture::default();
        app.start(&mut ctx);
        assert_eq!(ctx.sent.len(), 2);

        let first = ctx.sent[0];
        app.on_ack(&mut ctx, first);
        assert_eq!(ctx.sent.len(), 3);
        assert_eq!(app.acked_bytes(), 100);
    }

    #[test]
    fn loss_resends_same_segment_first() {
        let mut app = BulkSendApp::new(NodeId(2), 0, &flow(1));
        let mut ctx = Capture::default();
        app.start(&mut ctx);
        let lost = ctx.sent[0];

        app.on_loss(&mut ctx, lost);
        assert_eq!(ctx.sent.len(), 2);
        assert_eq!(ctx.sent[1], lost);
    }

    #[test]
    fn stopped_sender_stays_quiet() {
        let mut app = BulkSendApp::new(NodeId(2), 0, &flow(1));
        let mut ctx = Capture::default();
        app.start(&mut ctx);
        app.stop(&mut ctx);
        let first = ctx.sent[0];
        app.on_ack(&mut ctx, first);
        assert_eq!(ctx.sent.len(), 1);
    }

    #[test]
    fn sink_counts_only_while_running() {
        let mut sink = PacketSinkApp::new();
        let mut ctx = Capture::default();
        let segment = Segment::new(AppId(0), NodeId(2), 0, 64);

        sink.on_receive(&mut ctx, segment);
        assert_eq!(sink.cumulative_received_bytes(), 0);

        sink.start(&mut ctx);
        sink.on_receive(&mut ctx, segment);
        sink.on_receive(&mut ctx, segment);
        sink.stop(&mut ctx);
        sink.on_receive(&mut ctx, segment);
        assert_eq!(sink.cumulative_received_bytes(), 128);
        assert!(sink.rx_counter().is_some());
    }
}
