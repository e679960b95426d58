use serde::Serialize;
use std::io::{self, Write};
use wifi_lab_abstract::{ExperimentConfig, SimTime};

use crate::engine::RunOutcome;
use crate::network::NetworkStats;
use crate::sampler::{SampleRecord, SamplerDiagnostics};

/// Whole-run throughput of one flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSummary {
    pub index: usize,
    pub total_rx_bytes: u64,
    pub average_mbps: f64,
}

impl FlowSummary {
    /// Average over the full horizon, not over the time the flow was active.
    pub fn from_total(index: usize, total_rx_bytes: u64, horizon_secs: f64) -> Self {
        Self {
            index,
            total_rx_bytes,
            average_mbps: (total_rx_bytes * 8) as f64 / (1e6 * horizon_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub label: String,
    pub config: ExperimentConfig,
    pub outcome: RunOutcome,
    pub end_time: SimTime,
    pub events_dispatched: u64,
    pub samples: Vec<SampleRecord>,
    pub flows: Vec<FlowSummary>,
    pub diagnostics: SamplerDiagnostics,
    pub network: NetworkStats,
}

impl ExperimentReport {
    pub fn total_rx_bytes(&self) -> u64 {
        self.flows.iter().map(|f| f.total_rx_bytes).sum()
    }

    /// Per-flow blocks: node number, bytes received, average throughput.
    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for flow in &self.flows {
            writeln!(out)?;
            writeln!(out, "Node {}", flow.index + 1)?;
            writeln!(out, "Total Bytes Received: {}", flow.total_rx_bytes)?;
            writeln!(out, "Average Throughput: {} Mbit/s", flow.average_mbps)?;
        }
        Ok(())
    }

    pub fn print_summary(&self) {
        println!(
            "\n{}: {} samples, {} bytes received across {} flows",
            self.label,
            self.samples.len(),
            self.total_rx_bytes(),
            self.flows.len()
        );
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        // stdout closing early is not worth failing the run over
        let _ = self.write_summary(&mut lock);
    }
}
