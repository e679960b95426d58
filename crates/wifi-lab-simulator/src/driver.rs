//! Experiment lifecycle: `Idle → Built → Running → Stopped → TornDown`.

use serde::Serialize;
use std::io::Write;
use tracing::{info, warn};
use wifi_lab_abstract::ExperimentConfig;

use crate::engine::{EventQueue, Handler, RunOutcome, Simulator};
use crate::error::ExperimentError;
use crate::network::{NetEvent, WifiNetwork};
use crate::registry::FlowRegistry;
use crate::sampler::{SampleTick, ThroughputSampler};
use crate::topology::TopologyBuilder;
use crate::trace::{ExperimentReport, FlowSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExperimentState {
    Idle,
    Built,
    Running,
    Stopped,
    TornDown,
}

#[derive(Debug)]
pub enum ExperimentEvent {
    Net(NetEvent),
    Sample(SampleTick),
}

impl From<NetEvent> for ExperimentEvent {
    fn from(event: NetEvent) -> Self {
        ExperimentEvent::Net(event)
    }
}

impl From<SampleTick> for ExperimentEvent {
    fn from(tick: SampleTick) -> Self {
        ExperimentEvent::Sample(tick)
    }
}

/// Everything the event loop mutates while an experiment runs.
pub struct ExperimentWorld {
    pub network: WifiNetwork,
    pub registry: FlowRegistry,
    pub sampler: ThroughputSampler,
}

impl Handler for ExperimentWorld {
    type Event = ExperimentEvent;
    type Error = ExperimentError;

    fn handle(
        &mut self,
        queue: &mut EventQueue<ExperimentEvent>,
        event: ExperimentEvent,
    ) -> Result<(), ExperimentError> {
        match event {
            ExperimentEvent::Net(event) => {
                self.network.handle(queue, event);
                Ok(())
            }
            ExperimentEvent::Sample(SampleTick) => {
                self.sampler.fire(queue, &self.registry, &self.network)?;
                Ok(())
            }
        }
    }
}

pub struct Experiment {
    label: String,
    config: ExperimentConfig,
    state: ExperimentState,
    output: Option<Box<dyn Write>>,
    sim: Option<Simulator<ExperimentWorld>>,
    outcome: Option<RunOutcome>,
}

impl Experiment {
    /// Validate `config`; nothing is built until [`build`](Self::build).
    pub fn new(config: ExperimentConfig) -> Result<Self, ExperimentError> {
        config.validate()?;
        Ok(Self {
            label: "experiment".to_string(),
            config,
            state: ExperimentState::Idle,
            output: None,
            sim: None,
            outcome: None,
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Stream sample records to `output` as tab-separated lines.
    pub fn with_output(mut self, output: impl Write + 'static) -> Self {
        self.output = Some(Box::new(output));
        self
    }

    pub fn state(&self) -> ExperimentState {
        self.state
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn world(&self) -> Option<&ExperimentWorld> {
        self.sim.as_ref().map(|sim| sim.handler())
    }

    fn expect_state(
        &self,
        expected: ExperimentState,
        action: &'static str,
    ) -> Result<(), ExperimentError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ExperimentError::InvalidTransition {
                action,
                state: self.state,
            })
        }
    }

    /// Build the topology, arm the sampler and install the stop time.
    pub fn build(&mut self) -> Result<(), ExperimentError> {
        self.expect_state(ExperimentState::Idle, "build")?;

        let mut queue: EventQueue<ExperimentEvent> = EventQueue::new();
        let topology = TopologyBuilder::new(&self.config).build(&mut queue);

        let mut sampler = ThroughputSampler::new(
            topology.registry.len(),
            self.config.sample_interval(),
            self.config.horizon(),
        );
        if let Some(output) = self.output.take() {
            sampler = sampler.with_output(output);
        }
        sampler.arm(&mut queue);
        queue.stop(self.config.horizon());

        let world = ExperimentWorld {
            network: topology.network,
            registry: topology.registry,
            sampler,
        };
        self.sim = Some(Simulator::with_queue(queue, world));
        self.state = ExperimentState::Built;
        info!(
            "[{}] built with {} stations, sampling every {} ms for {} ms",
            self.label, self.config.stations, self.config.sample_interval_ms, self.config.duration_ms
        );
        Ok(())
    }

    /// Run the event loop to the stop time. A failed run is torn down at once.
    pub fn run(&mut self) -> Result<RunOutcome, ExperimentError> {
        self.expect_state(ExperimentState::Built, "run")?;
        let Some(sim) = self.sim.as_mut() else {
            return Err(ExperimentError::InvalidTransition {
                action: "run",
                state: self.state,
            });
        };

        self.state = ExperimentState::Running;
        info!("[{}] running", self.label);
        match sim.run() {
            Ok(outcome) => {
                info!(
                    "[{}] stopped at {}s after {} events ({:?})",
                    self.label,
                    sim.now(),
                    sim.dispatched(),
                    outcome
                );
                self.outcome = Some(outcome);
                self.state = ExperimentState::Stopped;
                Ok(outcome)
            }
            Err(err) => {
                warn!("[{}] aborted at {}s: {}", self.label, sim.now(), err);
                sim.destroy();
                self.sim = None;
                self.state = ExperimentState::TornDown;
                Err(err)
            }
        }
    }

    /// Snapshot the final counters, destroy the queue and build the report.
    pub fn teardown(&mut self) -> Result<ExperimentReport, ExperimentError> {
        self.expect_state(ExperimentState::Stopped, "tear down")?;
        let Some(mut sim) = self.sim.take() else {
            return Err(ExperimentError::InvalidTransition {
                action: "tear down",
                state: self.state,
            });
        };

        let finals = {
            let world = sim.handler();
            world.registry.read_all(&world.network)
        };

        let end_time = sim.now();
        let events_dispatched = sim.dispatched();
        sim.destroy();
        let world = sim.into_handler();
        self.state = ExperimentState::TornDown;
        let finals = finals?;

        let horizon_secs = self.config.horizon_secs();
        let flows = finals
            .iter()
            .enumerate()
            .map(|(index, &total)| FlowSummary::from_total(index, total, horizon_secs))
            .collect();

        Ok(ExperimentReport {
            label: self.label.clone(),
            config: self.config.clone(),
            outcome: self.outcome.unwrap_or(RunOutcome::Stopped),
            end_time,
            events_dispatched,
            diagnostics: world.sampler.diagnostics().clone(),
            network: world.network.stats().clone(),
            samples: world.sampler.into_records(),
            flows,
        })
    }

    /// Build, run and tear down in one go.
    pub fn run_to_completion(mut self) -> Result<ExperimentReport, ExperimentError> {
        self.build()?;
        self.run()?;
        self.teardown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandleError;
    use crate::registry::SinkHandle;
    use wifi_lab_abstract::{ConfigError, SimTime};

    fn small() -> ExperimentConfig {
        ExperimentConfig {
            stations: 2,
            duration_ms: 1_000,
            ..Default::default()
        }
    }

    #[test]
    fn walks_through_every_state() {
        let mut experiment = Experiment::new(small()).unwrap();
        assert_eq!(experiment.state(), ExperimentState::Idle);

        experiment.build().unwrap();
        assert_eq!(experiment.state(), ExperimentState::Built);
        let world = experiment.world().unwrap();
        assert!(world.sampler.task().is_armed());
        assert_eq!(world.registry.len(), 2);

        assert_eq!(experiment.run().unwrap(), RunOutcome::Stopped);
        assert_eq!(experiment.state(), ExperimentState::Stopped);

        let report = experiment.teardown().unwrap();
        assert_eq!(experiment.state(), ExperimentState::TornDown);
        assert_eq!(report.samples.len(), 10);
        assert_eq!(report.end_time, SimTime::from_secs(1));
        assert!(experiment.world().is_none());
    }

    #[test]
    fn rejects_out_of_order_calls() {
        let mut experiment = Experiment::new(small()).unwrap();
        assert!(matches!(
            experiment.run(),
            Err(ExperimentError::InvalidTransition {
                action: "run",
                state: ExperimentState::Idle
            })
        ));
        assert!(matches!(
            experiment.teardown(),
            Err(ExperimentError::InvalidTransition { .. })
        ));

        experiment.build().unwrap();
        assert!(matches!(
            experiment.build(),
            Err(ExperimentError::InvalidTransition {
                action: "build",
                state: ExperimentState::Built
            })
        ));
    }

    #[test]
    fn invalid_config_fails_before_build() {
        let config = ExperimentConfig {
            sample_interval_ms: 0,
            ..small()
        };
        assert!(matches!(
            Experiment::new(config),
            Err(ExperimentError::Config(ConfigError::ZeroSampleInterval))
        ));
    }

    #[test]
    fn stop_stays_inside_horizon() {
        let mut experiment = Experiment::new(small()).unwrap();
        experiment.build().unwrap();
        experiment.run().unwrap();

        let world = experiment.world().unwrap();
        // firing at exactly the horizon is the last one; nothing re-armed past it
        assert_eq!(world.sampler.task().last_fire(), Some(SimTime::from_secs(1)));
        assert!(!world.sampler.task().is_armed());
    }

    #[test]
    fn sender_handle_fails_fast() {
        let config = small();
        let mut queue: EventQueue<ExperimentEvent> = EventQueue::new();
        let topology = TopologyBuilder::new(&config).build(&mut queue);

        // point the only flow's sink handle at its sender
        let flow = topology.registry.get(0).unwrap().clone();
        let mut registry = FlowRegistry::new();
        registry.register(
            flow.sender,
            SinkHandle::new(flow.sender),
            flow.station,
            flow.start,
            flow.stop,
        );

        let mut sampler = ThroughputSampler::new(1, config.sample_interval(), config.horizon());
        sampler.arm(&mut queue);
        queue.stop(config.horizon());
        let world = ExperimentWorld {
            network: topology.network,
            registry,
            sampler,
        };
        let mut sim = Simulator::with_queue(queue, world);

        let err = sim.run().unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::Handle {
                flow: 0,
                source: HandleError::NotASink {
                    kind: "bulk-send",
                    ..
                }
            }
        ));
        assert_eq!(sim.now(), SimTime::from_millis(100));
        assert!(sim.handler().sampler.records().is_empty());
        assert!(err.to_string().contains("flow 0"));
    }
}
