use crate::config::{ExperimentConfig, FlowOverride};
use serde::Deserialize;

/// An experiment description loaded from TOML.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ScenarioFile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: ConfigOverride,
    #[serde(default)]
    pub flows: Vec<FlowOverride>,
    /// Labelled variants run one after another, each with a fresh experiment.
    #[serde(default)]
    pub runs: Vec<RunSpec>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct RunSpec {
    pub label: String,
    #[serde(default)]
    pub config: ConfigOverride,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ConfigOverride {
    pub stations: Option<usize>,
    pub sample_interval_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub p2p_data_rate_bps: Option<u64>,
    pub p2p_delay_us: Option<u64>,
    pub wifi_data_rate_bps: Option<u64>,
    pub wifi_delay_us: Option<u64>,
    pub wifi_mac_overhead_us: Option<u64>,
    pub loss_rate: Option<f64>,
    pub seed: Option<u64>,
    pub max_bytes: Option<u64>,
    pub segment_size: Option<u32>,
    pub window_segments: Option<u32>,
    pub retransmit_timeout_ms: Option<u64>,
}

impl ConfigOverride {
    pub fn apply_to(&self, config: &mut ExperimentConfig) {
        if let Some(v) = self.stations {
            config.stations = v;
        }
        if let Some(v) = self.sample_interval_ms {
            config.sample_interval_ms = v;
        }
        if let Some(v) = self.duration_ms {
            config.duration_ms = v;
        }
        if let Some(v) = self.p2p_data_rate_bps {
            config.p2p.data_rate_bps = v;
        }
        if let Some(v) = self.p2p_delay_us {
            config.p2p.delay_us = v;
        }
        if let Some(v) = self.wifi_data_rate_bps {
            config.wifi.data_rate_bps = v;
        }
        if let Some(v) = self.wifi_delay_us {
            config.wifi.delay_us = v;
        }
        if let Some(v) = self.wifi_mac_overhead_us {
            config.wifi.mac_overhead_us = v;
        }
        if let Some(v) = self.loss_rate {
            config.wifi.loss_rate = v;
        }
        if let Some(v) = self.seed {
            config.wifi.seed = v;
        }
        if let Some(v) = self.max_bytes {
            config.flow.max_bytes = v;
        }
        if let Some(v) = self.segment_size {
            config.flow.segment_size = v;
        }
        if let Some(v) = self.window_segments {
            config.flow.window_segments = v;
        }
        if let Some(v) = self.retransmit_timeout_ms {
            config.flow.retransmit_timeout_ms = v;
        }
    }
}

impl ScenarioFile {
    /// The base configuration described by this file, before any `[[runs]]` variant.
    pub fn base_config(&self) -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        self.config.apply_to(&mut config);
        config.flows.extend(self.flows.iter().cloned());
        config
    }

    /// One `(label, config)` pair per run. A file without `[[runs]]` yields a
    /// single run labelled with the scenario name.
    pub fn expand_runs(&self) -> Vec<(String, ExperimentConfig)> {
        let base = self.base_config();
        if self.runs.is_empty() {
            return vec![(self.name.clone(), base)];
        }
        self.runs
            .iter()
            .map(|run| {
                let mut config = base.clone();
                run.config.apply_to(&mut config);
                (run.label.clone(), config)
            })
            .collect()
    }
}
