//! Periodic throughput sampling.
//!
//! Every firing reads the cumulative received-byte counter of each flow,
//! turns the growth since the previous firing into a rate in Mbit/s and
//! records the mean over all flows. The first firing happens one interval
//! after arming so that each record covers exactly one interval of traffic.

use serde::Serialize;
use std::io::Write;
use tracing::{info, warn};
use wifi_lab_abstract::SimTime;

use crate::engine::{EventId, EventQueue};
use crate::error::ExperimentError;
use crate::registry::{FlowRegistry, RxSource};

/// Event payload of a sampler firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTick;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleRecord {
    pub time: SimTime,
    pub average_mbps: f64,
}

impl SampleRecord {
    /// `<seconds>\t<Mbit/s>\n`, the measurement file format.
    pub fn to_tsv_line(&self) -> String {
        format!("{}\t{}\n", self.time, self.average_mbps)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SamplerDiagnostics {
    /// Readings where a counter was lower than the previous one.
    pub regressions: u64,
    /// Failed writes to the measurement output.
    pub write_failures: u64,
}

/// A fixed-interval schedule that re-arms itself until a horizon.
///
/// At most one firing is pending at any time.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    interval: SimTime,
    horizon: SimTime,
    pending: Option<EventId>,
    last_fire: Option<SimTime>,
    fired: u64,
    cancelled: bool,
}

impl PeriodicTask {
    pub fn new(interval: SimTime, horizon: SimTime) -> Self {
        Self {
            interval,
            horizon,
            pending: None,
            last_fire: None,
            fired: 0,
            cancelled: false,
        }
    }

    /// Schedule the first firing one interval from now.
    pub fn arm<E: From<SampleTick>>(&mut self, queue: &mut EventQueue<E>) -> Option<EventId> {
        if self.pending.is_some() {
            return self.pending;
        }
        let first = queue.now() + self.interval;
        self.schedule_at(queue, first)
    }

    /// Record a firing at the current time and schedule the next one.
    pub fn on_fire<E: From<SampleTick>>(&mut self, queue: &mut EventQueue<E>) -> Option<EventId> {
        let now = queue.now();
        self.pending = None;
        self.last_fire = Some(now);
        self.fired += 1;
        self.schedule_at(queue, now + self.interval)
    }

    /// Withdraw the pending firing. The task never re-arms afterwards.
    pub fn cancel<E>(&mut self, queue: &mut EventQueue<E>) -> bool {
        self.cancelled = true;
        match self.pending.take() {
            Some(id) => queue.cancel(id),
            None => false,
        }
    }

    fn schedule_at<E: From<SampleTick>>(
        &mut self,
        queue: &mut EventQueue<E>,
        at: SimTime,
    ) -> Option<EventId> {
        if self.cancelled
            || queue.is_destroyed()
            || at > self.horizon
            || self.interval == SimTime::ZERO
        {
            self.pending = None;
            return None;
        }
        self.pending = Some(queue.schedule_at(at, SampleTick.into()));
        self.pending
    }

    pub fn interval(&self) -> SimTime {
        self.interval
    }

    pub fn horizon(&self) -> SimTime {
        self.horizon
    }

    pub fn last_fire(&self) -> Option<SimTime> {
        self.last_fire
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}

pub struct ThroughputSampler {
    task: PeriodicTask,
    last_total_rx: Vec<u64>,
    /// Sum of all deltas per flow.
    accounted: Vec<u64>,
    records: Vec<SampleRecord>,
    output: Option<Box<dyn Write>>,
    diagnostics: SamplerDiagnostics,
}

impl ThroughputSampler {
    pub fn new(flows: usize, interval: SimTime, horizon: SimTime) -> Self {
        Self {
            task: PeriodicTask::new(interval, horizon),
            last_total_rx: vec![0; flows],
            accounted: vec![0; flows],
            records: Vec::new(),
            output: None,
            diagnostics: SamplerDiagnostics::default(),
        }
    }

    /// Stream every record to `output` as it is produced.
    pub fn with_output(mut self, output: Box<dyn Write>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn arm<E: From<SampleTick>>(&mut self, queue: &mut EventQueue<E>) -> Option<EventId> {
        self.task.arm(queue)
    }

    pub fn cancel<E>(&mut self, queue: &mut EventQueue<E>) -> bool {
        self.task.cancel(queue)
    }

    /// Handle one firing: read all counters, record the average, re-arm.
    ///
    /// Counters are read before any state changes, so a bad handle leaves the
    /// sampler exactly as it was.
    pub fn fire<E: From<SampleTick>>(
        &mut self,
        queue: &mut EventQueue<E>,
        registry: &FlowRegistry,
        source: &dyn RxSource,
    ) -> Result<SampleRecord, ExperimentError> {
        let current = registry.read_all(source)?;
        let record = self.sample(queue.now(), &current);
        self.task.on_fire(queue);
        Ok(record)
    }

    /// Fold one set of cumulative readings into the counter state.
    pub fn sample(&mut self, now: SimTime, current: &[u64]) -> SampleRecord {
        debug_assert_eq!(current.len(), self.last_total_rx.len());

        let scale = self.task.interval().as_secs_f64() * 1e6;
        let mut sum = 0.0;
        for (flow, (&reading, last)) in current
            .iter()
            .zip(self.last_total_rx.iter_mut())
            .enumerate()
        {
            let delta = match reading.checked_sub(*last) {
                Some(delta) => delta,
                None => {
                    warn!(
                        flow,
                        previous = *last,
                        current = reading,
                        "Received-byte counter went backwards, counting zero for this interval"
                    );
                    self.diagnostics.regressions += 1;
                    0
                }
            };
            *last = reading;
            self.accounted[flow] += delta;
            sum += delta as f64 * 8.0 / scale;
        }

        let flows = self.last_total_rx.len().max(1) as f64;
        let record = SampleRecord {
            time: now,
            average_mbps: sum / flows,
        };
        info!("{}s: \t {} Mbit/s", record.time, record.average_mbps);
        self.records.push(record);
        self.write_record(&record);
        record
    }

    fn write_record(&mut self, record: &SampleRecord) {
        let Some(output) = self.output.as_mut() else {
            return;
        };
        let line = record.to_tsv_line();
        let result = output
            .write_all(line.as_bytes())
            .and_then(|()| output.flush());
        if let Err(err) = result {
            warn!("Measurement output failed at {}s, disabling it: {}", record.time, err);
            self.diagnostics.write_failures += 1;
            self.output = None;
        }
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn last_total_rx(&self) -> &[u64] {
        &self.last_total_rx
    }

    /// Per-flow sum of every delta recorded so far.
    pub fn accounted_bytes(&self) -> &[u64] {
        &self.accounted
    }

    pub fn diagnostics(&self) -> &SamplerDiagnostics {
        &self.diagnostics
    }

    pub fn task(&self) -> &PeriodicTask {
        &self.task
    }

    pub fn into_records(self) -> Vec<SampleRecord> {
        self.records
    }
}
