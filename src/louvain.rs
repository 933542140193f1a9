//! Modularity-based community detection (Louvain)
//!
//! Two phases repeat until a local-move pass changes nothing:
//!
//! 1. **Local move** - every node moves to the neighboring community with the
//!    largest modularity gain `k_i,in / m - k_i * tot / (2 m^2)`.
//! 2. **Aggregation** - each community is contracted into one node. Weight
//!    between communities is summed; weight inside a community becomes a
//!    self-loop, so the total weight of the graph is unchanged.
//!
//! Community totals are maintained with the node's weighted degree, not its
//! neighbor count.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::{GraphError, Result};
use crate::model::Graph;

/// Upper bound on aggregation rounds; each round strictly shrinks the graph,
/// so this only guards against pathological float behavior.
const MAX_PASSES: usize = 64;

/// Undirected weighted graph over dense node indices
#[derive(Debug, Clone, Default)]
pub struct WeightedGraph {
    adjacency: Vec<BTreeMap<usize, f64>>,
    self_loops: Vec<f64>,
}

impl WeightedGraph {
    /// Graph with `n` isolated nodes
    pub fn with_nodes(n: usize) -> Self {
        Self {
            adjacency: vec![BTreeMap::new(); n],
            self_loops: vec![0.0; n],
        }
    }

    /// Add `weight` between `a` and `b`; parallel edges accumulate
    pub fn add_edge(&mut self, a: usize, b: usize, weight: f64) {
        if a == b {
            self.self_loops[a] += weight;
        } else {
            *self.adjacency[a].entry(b).or_insert(0.0) += weight;
            *self.adjacency[b].entry(a).or_insert(0.0) += weight;
        }
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Sum of edge weights, each undirected edge counted once
    pub fn total_weight(&self) -> f64 {
        let between: f64 = self
            .adjacency
            .iter()
            .enumerate()
            .flat_map(|(i, row)| row.range(i + 1..).map(|(_, w)| *w))
            .sum();
        between + self.self_loops.iter().sum::<f64>()
    }

    /// Weighted degree; a self-loop contributes twice
    pub fn degree(&self, node: usize) -> f64 {
        self.adjacency[node].values().sum::<f64>() + 2.0 * self.self_loops[node]
    }

    /// Newman modularity of the partition `labels` (one entry per node)
    pub fn modularity(&self, labels: &[usize]) -> f64 {
        let m = self.total_weight();
        if m <= 0.0 {
            return 0.0;
        }
        let mut internal: HashMap<usize, f64> = HashMap::new();
        let mut totals: HashMap<usize, f64> = HashMap::new();
        for node in 0..self.len() {
            let c = labels[node];
            *totals.entry(c).or_insert(0.0) += self.degree(node);
            *internal.entry(c).or_insert(0.0) += self.self_loops[node];
            for (&other, &w) in self.adjacency[node].range(node + 1..) {
                if labels[other] == c {
                    *internal.entry(c).or_insert(0.0) += w;
                }
            }
        }
        totals
            .iter()
            .map(|(c, tot)| {
                let inside = internal.get(c).copied().unwrap_or(0.0);
                inside / m - (tot / (2.0 * m)).powi(2)
            })
            .sum()
    }

    /// Contract every community of `labels` (dense, `0..count`) into one node
    pub fn aggregate(&self, labels: &[usize]) -> WeightedGraph {
        let count = labels.iter().max().map_or(0, |max| max + 1);
        let mut contracted = WeightedGraph::with_nodes(count);
        for node in 0..self.len() {
            let c = labels[node];
            contracted.self_loops[c] += self.self_loops[node];
            for (&other, &w) in self.adjacency[node].range(node + 1..) {
                contracted.add_edge(c, labels[other], w);
            }
        }
        contracted
    }

    /// One local-move phase; returns each node's community and whether any
    /// node moved
    fn local_move(&self) -> (Vec<usize>, bool) {
        let n = self.len();
        let mut community: Vec<usize> = (0..n).collect();
        let m = self.total_weight();
        if m <= 0.0 {
            return (community, false);
        }

        let degrees: Vec<f64> = (0..n).map(|i| self.degree(i)).collect();
        let mut totals = degrees.clone();
        let mut any_move = false;

        loop {
            let mut moved = false;
            for node in 0..n {
                let current = community[node];
                let k_i = degrees[node];

                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                for (&other, &w) in &self.adjacency[node] {
                    *links.entry(community[other]).or_insert(0.0) += w;
                }

                totals[current] -= k_i;
                let gain = |c: usize, k_in: f64| k_in / m - k_i * totals[c] / (2.0 * m * m);

                let mut best = current;
                let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
                for (&candidate, &k_in) in &links {
                    let candidate_gain = gain(candidate, k_in);
                    if candidate_gain > best_gain {
                        best = candidate;
                        best_gain = candidate_gain;
                    }
                }

                totals[best] += k_i;
                if best != current {
                    community[node] = best;
                    moved = true;
                    any_move = true;
                }
            }
            if !moved {
                break;
            }
        }
        (community, any_move)
    }
}

/// Renumber labels densely in order of first appearance
fn renumber(labels: &[usize]) -> Vec<usize> {
    let mut seen: HashMap<usize, usize> = HashMap::new();
    labels
        .iter()
        .map(|label| {
            let next = seen.len();
            *seen.entry(*label).or_insert(next)
        })
        .collect()
}

/// Community label per node id
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Node ids, in first-seen order
    pub ids: Vec<String>,
    /// Label of `ids[i]`, numbered by first appearance
    pub labels: Vec<usize>,
    index: HashMap<String, usize>,
}

impl Partition {
    pub fn new(ids: Vec<String>, labels: Vec<usize>) -> Self {
        let index = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Self { ids, labels, index }
    }

    /// Label of `id`, answered from the id index built by [`Partition::new`]
    pub fn label_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).and_then(|&i| self.labels.get(i).copied())
    }

    pub fn community_count(&self) -> usize {
        self.labels.iter().max().map_or(0, |max| max + 1)
    }

    /// Ids carrying `label`, in first-seen order
    pub fn members(&self, label: usize) -> Vec<&str> {
        self.ids
            .iter()
            .zip(&self.labels)
            .filter(|(_, l)| **l == label)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Result of a Louvain run
#[derive(Debug, Clone)]
pub struct LouvainOutcome {
    pub partition: Partition,
    /// Aggregation rounds performed
    pub passes: usize,
    /// Modularity of the final partition on the input graph
    pub modularity: f64,
}

fn run(ids: Vec<String>, base: WeightedGraph) -> LouvainOutcome {
    let mut membership: Vec<usize> = (0..base.len()).collect();
    let mut graph = base.clone();
    let mut passes = 0;

    while passes < MAX_PASSES {
        let (communities, moved) = graph.local_move();
        if !moved {
            break;
        }
        let dense = renumber(&communities);
        for slot in &mut membership {
            *slot = dense[*slot];
        }
        graph = graph.aggregate(&dense);
        passes += 1;
        debug!(pass = passes, communities = graph.len(), "louvain aggregation");
    }

    let labels = renumber(&membership);
    let modularity = base.modularity(&labels);
    LouvainOutcome {
        partition: Partition::new(ids, labels),
        passes,
        modularity,
    }
}

fn check_weight(weight: f64) -> Result<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(GraphError::InvalidInput(format!(
            "louvain needs finite non-negative weights, got {weight}"
        )));
    }
    Ok(())
}

/// Cluster the graph given as `edges` with parallel `weights`
///
/// Nodes are the ids mentioned by `edges`, in first-seen order.
pub fn louvain(edges: &[(String, String)], weights: &[f64]) -> Result<LouvainOutcome> {
    if edges.len() != weights.len() {
        return Err(GraphError::InvalidInput(format!(
            "louvain got {} edges but {} weights",
            edges.len(),
            weights.len()
        )));
    }

    let mut ids: Vec<String> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (a, b) in edges {
        for id in [a, b] {
            if !index.contains_key(id.as_str()) {
                index.insert(id.as_str(), ids.len());
                ids.push(id.clone());
            }
        }
    }

    let mut graph = WeightedGraph::with_nodes(ids.len());
    for ((a, b), &w) in edges.iter().zip(weights) {
        check_weight(w)?;
        graph.add_edge(index[a.as_str()], index[b.as_str()], w);
    }
    Ok(run(ids, graph))
}

/// Cluster every node of `graph` (isolated nodes become singletons)
pub fn louvain_graph(graph: &Graph) -> Result<LouvainOutcome> {
    let ids: Vec<String> = graph.nodes().iter().map(|n| n.id.clone()).collect();
    let mut weighted = WeightedGraph::with_nodes(ids.len());
    for edge in graph.edges() {
        check_weight(edge.weight)?;
        let a = graph.require(&edge.from)?;
        let b = graph.require(&edge.to)?;
        weighted.add_edge(a, b, edge.weight);
    }
    Ok(run(ids, weighted))
}
