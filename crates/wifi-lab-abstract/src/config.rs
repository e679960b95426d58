use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::time::SimTime;

/// Reasons an [`ExperimentConfig`] is rejected before any topology is built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("station count must be at least 1")]
    NoStations,
    #[error("sampling interval must be greater than zero")]
    ZeroSampleInterval,
    #[error("simulation horizon must be greater than zero")]
    ZeroHorizon,
    #[error("{link} data rate must be greater than zero")]
    ZeroDataRate { link: &'static str },
    #[error("segment size must be greater than zero")]
    ZeroSegmentSize,
    #[error("sender window must allow at least one segment in flight")]
    ZeroWindow,
    #[error("loss rate {0} is outside [0, 1)")]
    LossRateOutOfRange(f64),
    #[error("flow override targets flow {index}, but only {stations} flows exist")]
    UnknownFlow { index: usize, stations: usize },
    #[error("flow {index} stops at {stop_ms} ms before it starts at {start_ms} ms")]
    InvalidFlowWindow {
        index: usize,
        start_ms: u64,
        stop_ms: u64,
    },
}

/// Point-to-point hop between the traffic peer and the access point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub data_rate_bps: u64,
    pub delay_us: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            data_rate_bps: 5_000_000,
            delay_us: 2_000,
        }
    }
}

/// Shared wireless hop between the access point and its stations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiConfig {
    pub data_rate_bps: u64,
    pub delay_us: u64,
    /// Fixed per-frame airtime added on top of serialisation (preamble, ACK).
    pub mac_overhead_us: u64,
    /// Probability that a frame on the wireless hop is lost.
    pub loss_rate: f64,
    pub seed: u64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            data_rate_bps: 11_000_000,
            delay_us: 1,
            mac_overhead_us: 192,
            loss_rate: 0.0,
            seed: 0,
        }
    }
}

/// Bulk-send parameters shared by every flow unless overridden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Byte budget per sender; 0 means unbounded.
    pub max_bytes: u64,
    pub segment_size: u32,
    /// Segments a sender may have unacknowledged at once.
    pub window_segments: u32,
    pub retransmit_timeout_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_bytes: 0,
            segment_size: 512,
            window_segments: 8,
            retransmit_timeout_ms: 200,
        }
    }
}

/// Per-flow deviation from [`FlowConfig`] and the default start/stop window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowOverride {
    pub index: usize,
    #[serde(default)]
    pub max_bytes: Option<u64>,
    #[serde(default)]
    pub start_ms: Option<u64>,
    #[serde(default)]
    pub stop_ms: Option<u64>,
    /// The sender is installed but never started.
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub stations: usize,
    pub sample_interval_ms: u64,
    pub duration_ms: u64,
    pub p2p: LinkConfig,
    pub wifi: WifiConfig,
    pub flow: FlowConfig,
    #[serde(default)]
    pub flows: Vec<FlowOverride>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            stations: 30,
            sample_interval_ms: 100,
            duration_ms: 10_000,
            p2p: LinkConfig::default(),
            wifi: WifiConfig::default(),
            flow: FlowConfig::default(),
            flows: Vec::new(),
        }
    }
}

/// Effective start/stop window and budget of one flow after overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowPlan {
    pub index: usize,
    pub start: Option<SimTime>,
    pub stop: SimTime,
    pub max_bytes: u64,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stations == 0 {
            return Err(ConfigError::NoStations);
        }
        if self.sample_interval_ms == 0 {
            return Err(ConfigError::ZeroSampleInterval);
        }
        if self.duration_ms == 0 {
            return Err(ConfigError::ZeroHorizon);
        }
        if self.p2p.data_rate_bps == 0 {
            return Err(ConfigError::ZeroDataRate {
                link: "point-to-point",
            });
        }
        if self.wifi.data_rate_bps == 0 {
            return Err(ConfigError::ZeroDataRate { link: "wifi" });
        }
        if self.flow.segment_size == 0 {
            return Err(ConfigError::ZeroSegmentSize);
        }
        if self.flow.window_segments == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if !(0.0..1.0).contains(&self.wifi.loss_rate) {
            return Err(ConfigError::LossRateOutOfRange(self.wifi.loss_rate));
        }
        for flow in &self.flows {
            if flow.index >= self.stations {
                return Err(ConfigError::UnknownFlow {
                    index: flow.index,
                    stations: self.stations,
                });
            }
            let start_ms = flow.start_ms.unwrap_or(0);
            let stop_ms = flow.stop_ms.unwrap_or(self.duration_ms);
            if stop_ms < start_ms {
                return Err(ConfigError::InvalidFlowWindow {
                    index: flow.index,
                    start_ms,
                    stop_ms,
                });
            }
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> SimTime {
        SimTime::from_millis(self.sample_interval_ms)
    }

    pub fn horizon(&self) -> SimTime {
        SimTime::from_millis(self.duration_ms)
    }

    pub fn horizon_secs(&self) -> f64 {
        self.horizon().as_secs_f64()
    }

    /// Resolve the sender schedule of flow `index`. The last matching override wins.
    pub fn flow_plan(&self, index: usize) -> FlowPlan {
        let mut plan = FlowPlan {
            index,
            start: Some(SimTime::ZERO),
            stop: self.horizon(),
            max_bytes: self.flow.max_bytes,
        };
        for flow in self.flows.iter().filter(|f| f.index == index) {
            if let Some(bytes) = flow.max_bytes {
                plan.max_bytes = bytes;
            }
            if let Some(ms) = flow.start_ms {
                plan.start = Some(SimTime::from_millis(ms));
            }
            if let Some(ms) = flow.stop_ms {
                plan.stop = SimTime::from_millis(ms);
            }
            if flow.disabled {
                plan.start = None;
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_experiment() {
        let config = ExperimentConfig::default();
        assert_eq!(config.stations, 30);
        assert_eq!(config.sample_interval(), SimTime::from_millis(100));
        assert_eq!(config.horizon(), SimTime::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_values() {
        let mut config = ExperimentConfig {
            stations: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoStations));

        config.stations = 3;
        config.sample_interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroSampleInterval));

        config.sample_interval_ms = 100;
        config.duration_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroHorizon));

        config.duration_ms = 1_000;
        config.wifi.loss_rate = 1.0;
        assert_eq!(config.validate(), Err(ConfigError::LossRateOutOfRange(1.0)));
    }

    #[test]
    fn rejects_overrides_for_missing_flows() {
        let config = ExperimentConfig {
            stations: 2,
            flows: vec![FlowOverride {
                index: 2,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownFlow {
                index: 2,
                stations: 2
            })
        );
    }

    #[test]
    fn flow_plan_applies_overrides() {
        let config = ExperimentConfig {
            stations: 3,
            flows: vec![
                FlowOverride {
                    index: 1,
                    max_bytes: Some(200_000),
                    ..Default::default()
                },
                FlowOverride {
                    index: 2,
                    disabled: true,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let plain = config.flow_plan(0);
        assert_eq!(plain.start, Some(SimTime::ZERO));
        assert_eq!(plain.stop, SimTime::from_secs(10));
        assert_eq!(plain.max_bytes, 0);

        assert_eq!(config.flow_plan(1).max_bytes, 200_000);
        assert_eq!(config.flow_plan(2).start, None);
    }
}
