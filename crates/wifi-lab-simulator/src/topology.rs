use tracing::info;
use wifi_lab_abstract::{ExperimentConfig, NodeId, SimTime};

use crate::apps::{BulkSendApp, PacketSinkApp};
use crate::engine::EventQueue;
use crate::network::{NetEvent, NodeRole, WifiNetwork};
use crate::registry::{FlowRegistry, SinkHandle};

//   Wifi
//                 AP
//  *    *    *    *
//  |    |    |    |   point-to-point
// s2   s1   s0   ap -------------- peer
//
// One bulk sender per station lives on the peer; one sink per station.

pub struct Topology {
    pub network: WifiNetwork,
    pub registry: FlowRegistry,
    pub access_point: NodeId,
    pub peer: NodeId,
    pub stations: Vec<NodeId>,
}

pub struct TopologyBuilder<'a> {
    config: &'a ExperimentConfig,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(config: &'a ExperimentConfig) -> Self {
        Self { config }
    }

    /// Create the nodes and flows and schedule every app start/stop on `queue`.
    /// Consumes the builder, so a topology is built once per experiment.
    pub fn build<E: From<NetEvent>>(self, queue: &mut EventQueue<E>) -> Topology {
        let config = self.config;
        let horizon = config.horizon();
        let mut network = WifiNetwork::new(config);

        let access_point = network.add_node(NodeRole::AccessPoint);
        let peer = network.add_node(NodeRole::Peer);
        let stations: Vec<NodeId> = (0..config.stations)
            .map(|i| network.add_node(NodeRole::Station(i)))
            .collect();

        let plans: Vec<_> = (0..config.stations).map(|i| config.flow_plan(i)).collect();

        let senders: Vec<_> = stations
            .iter()
            .zip(&plans)
            .map(|(&station, plan)| {
                let sender = network.install(
                    peer,
                    Box::new(BulkSendApp::new(station, plan.max_bytes, &config.flow)),
                );
                if let Some(start) = plan.start {
                    network.schedule_start(queue, sender, start);
                }
                network.schedule_stop(queue, sender, plan.stop);
                sender
            })
            .collect();

        let mut registry = FlowRegistry::new();
        for ((&station, plan), sender) in stations.iter().zip(&plans).zip(senders) {
            let sink = network.install(station, Box::new(PacketSinkApp::new()));
            network.schedule_start(queue, sink, SimTime::ZERO);
            network.schedule_stop(queue, sink, horizon);
            registry.register(sender, SinkHandle::new(sink), station, plan.start, plan.stop);
        }

        info!(
            "Built topology: {} nodes, {} flows, horizon {}s",
            network.node_count(),
            registry.len(),
            horizon
        );

        Topology {
            network,
            registry,
            access_point,
            peer,
            stations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wifi_lab_abstract::FlowOverride;

    #[test]
    fn builds_n_plus_two_nodes_and_n_flows() {
        let config = ExperimentConfig {
            stations: 4,
            ..Default::default()
        };
        let mut queue: EventQueue<NetEvent> = EventQueue::new();
        let topology = TopologyBuilder::new(&config).build(&mut queue);

        assert_eq!(topology.network.node_count(), 6);
        assert_eq!(topology.network.role(topology.access_point), Some(NodeRole::AccessPoint));
        assert_eq!(topology.network.role(topology.peer), Some(NodeRole::Peer));
        assert_eq!(topology.registry.len(), 4);
        // start + stop for every sender and sink
        assert_eq!(queue.len(), 16);

        for (i, flow) in topology.registry.iter().enumerate() {
            assert_eq!(flow.index, i);
            assert_eq!(flow.station, topology.stations[i]);
            assert_eq!(topology.network.app_node(flow.sender), Some(topology.peer));
            assert_eq!(topology.network.app_node(flow.sink.app()), Some(flow.station));
            assert_eq!(flow.stop, SimTime::from_secs(10));
        }
    }

    #[test]
    fn disabled_flow_has_no_start_event() {
        let config = ExperimentConfig {
            stations: 2,
            flows: vec![FlowOverride {
                index: 1,
                disabled: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut queue: EventQueue<NetEvent> = EventQueue::new();
        let topology = TopologyBuilder::new(&config).build(&mut queue);

        assert_eq!(queue.len(), 7);
        assert_eq!(topology.registry.get(1).unwrap().start, None);
        assert_eq!(topology.registry.get(0).unwrap().start, Some(SimTime::ZERO));
    }
}
