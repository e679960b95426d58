use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use tracing::{debug, warn};
use wifi_lab_abstract::SimTime;

/// Identity of a scheduled event, usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

#[derive(Debug)]
struct Scheduled<E> {
    time: SimTime,
    id: EventId,
    event: E,
}

// Custom Ord for Min-Heap (smallest time pops first)
impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison: earliest time, then lowest id, is Greater in BinaryHeap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Simulated clock plus the set of pending events.
///
/// Events with equal timestamps are dispatched in the order they were
/// scheduled. Once [`stop`](Self::stop) is called, events up to and including
/// the stop time are still dispatched; the first event strictly after it halts
/// the run.
pub struct EventQueue<E> {
    now: SimTime,
    heap: BinaryHeap<Scheduled<E>>,
    next_id: u64,
    pending: HashSet<EventId>,
    cancelled: HashSet<EventId>,
    stop_at: Option<SimTime>,
    destroyed: bool,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            heap: BinaryHeap::new(),
            next_id: 0,
            pending: HashSet::new(),
            cancelled: HashSet::new(),
            stop_at: None,
            destroyed: false,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `event` to run `delay` after the current time.
    pub fn schedule(&mut self, delay: SimTime, event: E) -> EventId {
        self.schedule_at(self.now + delay, event)
    }

    /// Schedule `event` at an absolute time. Times in the past are clamped to now.
    pub fn schedule_at(&mut self, time: SimTime, event: E) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;

        if self.destroyed {
            warn!("Ignoring event scheduled at {}s on a destroyed queue", time);
            return id;
        }

        self.heap.push(Scheduled {
            time: time.max(self.now),
            id,
            event,
        });
        self.pending.insert(id);
        id
    }

    /// Cancel a pending event. Returns false if it already ran or was cancelled.
    pub fn cancel(&mut self, id: EventId) -> bool {
        if self.pending.remove(&id) {
            self.cancelled.insert(id);
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self, id: EventId) -> bool {
        self.pending.contains(&id)
    }

    /// Halt the run after every event scheduled at or before `at`.
    /// Repeated calls keep the earliest stop time.
    pub fn stop(&mut self, at: SimTime) {
        self.stop_at = Some(match self.stop_at {
            Some(existing) => existing.min(at),
            None => at,
        });
    }

    pub fn stop_time(&self) -> Option<SimTime> {
        self.stop_at
    }

    /// Number of events that are scheduled and not cancelled.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Time of the earliest live event, if any.
    pub fn peek_next_time(&self) -> Option<SimTime> {
        self.heap
            .iter()
            .filter(|e| !self.cancelled.contains(&e.id))
            .map(|e| e.time)
            .min()
    }

    /// Pop the next live event that is due before the stop time, advancing the clock.
    fn pop_due(&mut self) -> Option<(SimTime, E)> {
        loop {
            let next_time = self.heap.peek()?.time;
            if let Some(stop) = self.stop_at
                && next_time > stop
            {
                self.now = self.now.max(stop);
                return None;
            }

            let scheduled = self.heap.pop()?;
            if self.cancelled.remove(&scheduled.id) {
                continue;
            }
            self.pending.remove(&scheduled.id);
            self.now = scheduled.time;
            return Some((scheduled.time, scheduled.event));
        }
    }

    /// Drop every pending event and refuse further scheduling. Returns how many
    /// live events were discarded.
    fn destroy(&mut self) -> usize {
        let discarded = self.pending.len();
        self.heap.clear();
        self.pending.clear();
        self.cancelled.clear();
        self.destroyed = true;
        discarded
    }
}

/// Receives events popped by the [`Simulator`].
pub trait Handler {
    type Event: fmt::Debug;
    type Error;

    fn handle(
        &mut self,
        queue: &mut EventQueue<Self::Event>,
        event: Self::Event,
    ) -> Result<(), Self::Error>;
}

/// Why [`Simulator::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// No events were left.
    Exhausted,
    /// The stop time was reached with events still pending.
    Stopped,
}

pub struct Simulator<H: Handler> {
    queue: EventQueue<H::Event>,
    handler: H,
    dispatched: u64,
}

impl<H: Handler> Simulator<H> {
    pub fn new(handler: H) -> Self {
        Self::with_queue(EventQueue::new(), handler)
    }

    /// Wrap a queue that already holds the initial events.
    pub fn with_queue(queue: EventQueue<H::Event>, handler: H) -> Self {
        Self {
            queue,
            handler,
            dispatched: 0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    pub fn schedule(&mut self, delay: SimTime, event: H::Event) -> EventId {
        self.queue.schedule(delay, event)
    }

    pub fn cancel(&mut self, id: EventId) -> bool {
        self.queue.cancel(id)
    }

    pub fn stop(&mut self, at: SimTime) {
        self.queue.stop(at);
    }

    pub fn queue(&self) -> &EventQueue<H::Event> {
        &self.queue
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Process the next event. Returns false once nothing is due.
    pub fn step(&mut self) -> Result<bool, H::Error> {
        let Some((time, event)) = self.queue.pop_due() else {
            return Ok(false);
        };

        debug!("Processing event at {}s: {:?}", time, event);
        self.dispatched += 1;
        self.handler.handle(&mut self.queue, event)?;
        Ok(true)
    }

    /// Dispatch events in time order until the queue is empty or the stop time passes.
    pub fn run(&mut self) -> Result<RunOutcome, H::Error> {
        while self.step()? {}
        if self.queue.is_empty() {
            Ok(RunOutcome::Exhausted)
        } else {
            Ok(RunOutcome::Stopped)
        }
    }

    /// Abort all pending events. Later scheduling attempts are ignored.
    pub fn destroy(&mut self) -> usize {
        if self.queue.is_destroyed() {
            return 0;
        }
        let discarded = self.queue.destroy();
        debug!("Destroyed event queue, discarded {} pending events", discarded);
        discarded
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestEvent {
        Mark(u32),
        Repeat { every: u64 },
        Fail,
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(SimTime, TestEvent)>,
    }

    impl Handler for Recorder {
        type Event = TestEvent;
        type Error = String;

        fn handle(
            &mut self,
            queue: &mut EventQueue<TestEvent>,
            event: TestEvent,
        ) -> Result<(), String> {
            self.seen.push((queue.now(), event));
            match event {
                TestEvent::Repeat { every } => {
                    queue.schedule(SimTime::from_millis(every), event);
                    Ok(())
                }
                TestEvent::Fail => Err(format!("failed at {}", queue.now())),
                TestEvent::Mark(_) => Ok(()),
            }
        }
    }

    fn marks(sim: &Simulator<Recorder>) -> Vec<u32> {
        sim.handler()
            .seen
            .iter()
            .filter_map(|(_, e)| match e {
                TestEvent::Mark(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn dispatches_in_time_order() {
        let mut sim = Simulator::new(Recorder::default());
        sim.schedule(SimTime::from_millis(30), TestEvent::Mark(3));
        sim.schedule(SimTime::from_millis(10), TestEvent::Mark(1));
        sim.schedule(SimTime::from_millis(20), TestEvent::Mark(2));

        assert_eq!(sim.run(), Ok(RunOutcome::Exhausted));
        assert_eq!(marks(&sim), vec![1, 2, 3]);
        assert_eq!(sim.now(), SimTime::from_millis(30));
        assert_eq!(sim.dispatched(), 3);
    }

    #[test]
    fn equal_timestamps_run_fifo() {
        let mut sim = Simulator::new(Recorder::default());
        for n in 0..10 {
            sim.schedule(SimTime::ZERO, TestEvent::Mark(n));
        }
        sim.run().unwrap();
        assert_eq!(marks(&sim), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn cancelled_events_never_fire() {
        let mut sim = Simulator::new(Recorder::default());
        sim.schedule(SimTime::from_millis(5), TestEvent::Mark(1));
        let doomed = sim.schedule(SimTime::from_millis(10), TestEvent::Mark(2));
        sim.schedule(SimTime::from_millis(15), TestEvent::Mark(3));

        assert!(sim.cancel(doomed));
        assert!(!sim.cancel(doomed));
        assert_eq!(sim.queue().len(), 2);

        sim.run().unwrap();
        assert_eq!(marks(&sim), vec![1, 3]);
    }

    #[test]
    fn stop_time_is_inclusive() {
        let mut sim = Simulator::new(Recorder::default());
        sim.schedule(SimTime::ZERO, TestEvent::Repeat { every: 100 });
        sim.stop(SimTime::from_secs(1));

        assert_eq!(sim.run(), Ok(RunOutcome::Stopped));
        // t = 0, 100, ..., 1000 ms
        assert_eq!(sim.handler().seen.len(), 11);
        assert_eq!(sim.handler().seen.last().unwrap().0, SimTime::from_secs(1));
        assert_eq!(sim.queue().peek_next_time(), Some(SimTime::from_millis(1100)));
    }

    #[test]
    fn earliest_stop_wins() {
        let mut queue: EventQueue<TestEvent> = EventQueue::new();
        queue.stop(SimTime::from_secs(5));
        queue.stop(SimTime::from_secs(2));
        queue.stop(SimTime::from_secs(3));
        assert_eq!(queue.stop_time(), Some(SimTime::from_secs(2)));
    }

    #[test]
    fn clock_advances_to_stop_time() {
        let mut sim = Simulator::new(Recorder::default());
        sim.schedule(SimTime::from_millis(10), TestEvent::Mark(1));
        sim.schedule(SimTime::from_secs(60), TestEvent::Mark(2));
        sim.stop(SimTime::from_secs(2));

        assert_eq!(sim.run(), Ok(RunOutcome::Stopped));
        assert_eq!(sim.now(), SimTime::from_secs(2));
        assert_eq!(marks(&sim), vec![1]);
    }

    #[test]
    fn handler_error_aborts_run() {
        let mut sim = Simulator::new(Recorder::default());
        sim.schedule(SimTime::from_millis(1), TestEvent::Mark(1));
        sim.schedule(SimTime::from_millis(2), TestEvent::Fail);
        sim.schedule(SimTime::from_millis(3), TestEvent::Mark(3));

        let err = sim.run().unwrap_err();
        assert_eq!(err, "failed at 0.002");
        assert_eq!(marks(&sim), vec![1]);
        assert_eq!(sim.queue().len(), 1);
    }

    #[test]
    fn destroy_discards_and_refuses_new_events() {
        let mut sim = Simulator::new(Recorder::default());
        sim.schedule(SimTime::ZERO, TestEvent::Repeat { every: 10 });
        sim.stop(SimTime::from_millis(50));
        sim.run().unwrap();

        assert_eq!(sim.destroy(), 1);
        assert_eq!(sim.destroy(), 0);
        sim.schedule(SimTime::from_millis(1), TestEvent::Mark(9));
        assert!(sim.queue().is_empty());
        assert_eq!(sim.run(), Ok(RunOutcome::Exhausted));
        assert!(marks(&sim).is_empty());
    }

    #[test]
    fn past_times_are_clamped_to_now() {
        let mut queue: EventQueue<TestEvent> = EventQueue::new();
        queue.schedule_at(SimTime::from_millis(10), TestEvent::Mark(1));
        let (time, _) = queue.pop_due().unwrap();
        assert_eq!(time, SimTime::from_millis(10));

        queue.schedule_at(SimTime::from_millis(5), TestEvent::Mark(2));
        assert_eq!(queue.peek_next_time(), Some(SimTime::from_millis(10)));
    }
}
