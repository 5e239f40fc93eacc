use std::collections::{BTreeSet, HashMap};

use meristem_domain::{PluginId, PluginManifest, PluginTier};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::GraphError;

/// Result of dependency ordering. On a cycle, `order` holds the acyclic
/// prefix and `cycle` the trace of the strongly-connected remainder.
#[derive(Debug, Clone)]
pub struct TopologyResult {
    pub order: Vec<PluginId>,
    pub cycle: Option<Vec<PluginId>>,
}

impl TopologyResult {
    pub fn into_result(self) -> Result<Vec<PluginId>, GraphError> {
        match self.cycle {
            Some(trace) => Err(GraphError::CycleDetected { trace }),
            None => Ok(self.order),
        }
    }
}

/// Compute a deterministic dependency order with Kahn's algorithm.
///
/// Edges run dependency → dependent, so dependencies come first. Ready
/// nodes are drained with the tie-break "core tier before extension tier,
/// then id lex-ascending". References to plugins absent from the map are
/// the caller's problem (see `validate_manifest_set`); here they simply
/// produce no edge.
pub fn topo_order(manifests: &HashMap<PluginId, PluginManifest>) -> TopologyResult {
    let mut graph: DiGraph<PluginId, ()> = DiGraph::new();
    let mut index: HashMap<PluginId, NodeIndex> = HashMap::new();

    for id in manifests.keys() {
        index.insert(id.clone(), graph.add_node(id.clone()));
    }
    for (id, manifest) in manifests {
        for dep in &manifest.dependencies {
            if let Some(&from) = index.get(dep) {
                graph.add_edge(from, index[id], ());
            }
        }
    }

    // Kahn with an ordered ready set keyed by (tier rank, id).
    let rank = |id: &PluginId| -> (u8, PluginId) {
        let tier = match manifests[id].tier {
            PluginTier::Core => 0,
            PluginTier::Extension => 1,
        };
        (tier, id.clone())
    };

    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|n| (n, graph.neighbors_directed(n, Direction::Incoming).count()))
        .collect();

    let mut ready: BTreeSet<(u8, PluginId)> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| rank(&graph[*n]))
        .collect();

    let mut order: Vec<PluginId> = Vec::with_capacity(manifests.len());
    while let Some(key) = ready.iter().next().cloned() {
        ready.remove(&key);
        let (_, id) = key;
        let node = index[&id];
        order.push(id);

        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            if let Some(d) = in_degree.get_mut(&next) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(rank(&graph[next]));
                }
            }
        }
    }

    if order.len() == manifests.len() {
        return TopologyResult { order, cycle: None };
    }

    // Remaining nodes all sit on or behind a cycle. Walk dependencies
    // within the remainder from its smallest member until a node repeats.
    let remaining: BTreeSet<PluginId> = manifests
        .keys()
        .filter(|id| !order.contains(id))
        .cloned()
        .collect();
    let trace = cycle_trace(manifests, &remaining);

    TopologyResult { order, cycle: Some(trace) }
}

fn cycle_trace(
    manifests: &HashMap<PluginId, PluginManifest>,
    remaining: &BTreeSet<PluginId>,
) -> Vec<PluginId> {
    let start = match remaining.iter().next() {
        Some(id) => id.clone(),
        None => return Vec::new(),
    };

    let mut trace: Vec<PluginId> = vec![start.clone()];
    let mut current = start;
    loop {
        let next = manifests[&current]
            .dependencies
            .iter()
            .find(|d| remaining.contains(*d))
            .cloned();
        match next {
            Some(next) => {
                if let Some(pos) = trace.iter().position(|id| id == &next) {
                    // Close the loop: keep the cyclic suffix plus the repeat.
                    let mut cycle: Vec<PluginId> = trace.split_off(pos);
                    cycle.push(next);
                    return cycle;
                }
                trace.push(next.clone());
                current = next;
            }
            None => return trace,
        }
    }
}
