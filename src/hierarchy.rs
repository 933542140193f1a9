//! Multi-resolution graph hierarchy
//!
//! Level 0 is the input graph. Each further level clusters the level below
//! it and contracts every multi-member cluster into one representative node.
//! Nodes left alone by the clustering (noise, singleton clusters) carry
//! forward unchanged.

use std::collections::{BTreeMap, HashMap};

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dbscan::{DbscanParams, dbscan_graph};
use crate::error::{GraphError, Result};
use crate::louvain::louvain_graph;
use crate::model::{Edge, EdgeKey, Graph};

/// Clustering used to decide which nodes merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ClusteringMethod {
    /// Spatial clustering over node positions
    Dbscan(DbscanParams),
    /// Community detection over edge weights
    #[default]
    Louvain,
}

impl ClusteringMethod {
    /// One label per node of `graph`, in arena order
    pub fn labels(&self, graph: &Graph) -> Result<Vec<Option<usize>>> {
        match self {
            Self::Dbscan(params) => dbscan_graph(graph, *params),
            Self::Louvain => Ok(louvain_graph(graph)?
                .partition
                .labels
                .into_iter()
                .map(Some)
                .collect()),
        }
    }

    /// Louvain contraction sums the weights an edge subsumes; DBSCAN keeps
    /// the first subsumed edge's weight
    fn sums_weights(&self) -> bool {
        matches!(self, Self::Louvain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Maximum number of levels, level 0 included
    pub max_levels: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self { max_levels: 4 }
    }
}

/// One resolution of the hierarchy
#[derive(Debug, Clone)]
pub struct GraphLevel {
    index: usize,
    graph: Graph,
    node_mapping: BTreeMap<String, Vec<String>>,
    edge_mapping: BTreeMap<EdgeKey, Vec<Edge>>,
}

impl GraphLevel {
    /// Level 0 wrapping the input graph
    pub fn base(graph: Graph) -> Self {
        Self {
            index: 0,
            graph,
            node_mapping: BTreeMap::new(),
            edge_mapping: BTreeMap::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Representative id to the ids it stands for, itself included
    pub fn node_mapping(&self) -> &BTreeMap<String, Vec<String>> {
        &self.node_mapping
    }

    /// Edge of this level to the edges of the level below it subsumes
    pub fn edge_mapping(&self) -> &BTreeMap<EdgeKey, Vec<Edge>> {
        &self.edge_mapping
    }

    pub fn members(&self, representative: &str) -> Option<&[String]> {
        self.node_mapping.get(representative).map(Vec::as_slice)
    }

    pub fn sub_edges(&self, key: &EdgeKey) -> &[Edge] {
        self.edge_mapping.get(key).map_or(&[], Vec::as_slice)
    }

    /// Mapping entries for representatives created at this level
    ///
    /// Representatives carried forward from a coarser pass keep their older
    /// entries, which refer to nodes two or more levels down.
    pub fn own_representatives(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.node_mapping.iter().filter_map(|(id, members)| {
            let node = self.graph.node(id)?;
            (node.level as usize == self.index).then_some((id.as_str(), members.as_slice()))
        })
    }
}

/// Builds the level list for a graph
#[derive(Debug, Clone, Default)]
pub struct HierarchyBuilder {
    method: ClusteringMethod,
    config: HierarchyConfig,
}

impl HierarchyBuilder {
    pub fn new(method: ClusteringMethod, config: HierarchyConfig) -> Self {
        Self { method, config }
    }

    /// Cluster and contract until `max_levels` is reached or nothing merges
    ///
    /// Cluster labels of every clustered level are written into its nodes.
    pub fn build(&self, graph: Graph) -> Result<Vec<GraphLevel>> {
        if graph.is_empty() {
            return Err(GraphError::InvalidInput(
                "cannot build a hierarchy over an empty graph".to_string(),
            ));
        }
        if self.config.max_levels == 0 {
            return Err(GraphError::InvalidInput(
                "max_levels must be at least 1".to_string(),
            ));
        }

        let mut base = graph;
        base.recompute_degrees();
        base.refresh_edges();
        let mut levels = vec![GraphLevel::base(base)];

        while levels.len() < self.config.max_levels {
            let Some(previous) = levels.last_mut() else {
                break;
            };
            let labels = self.method.labels(&previous.graph)?;
            for (i, label) in labels.iter().enumerate() {
                if let Some(node) = previous.graph.node_at_index_mut(i) {
                    node.cluster = *label;
                }
            }

            let index = previous.index + 1;
            let next = contract(
                &previous.graph,
                &previous.node_mapping,
                &labels,
                index,
                self.method.sums_weights(),
            )?;
            match next {
                Some(level) => {
                    debug!(
                        level = index,
                        nodes = level.graph.len(),
                        edges = level.graph.edge_count(),
                        "hierarchy level contracted"
                    );
                    levels.push(level);
                }
                None => {
                    debug!(level = index, "no cluster merged, stopping");
                    break;
                }
            }
        }

        info!(levels = levels.len(), "hierarchy built");
        Ok(levels)
    }
}

/// Contract `previous` along `labels`; `None` when no cluster has two members
fn contract(
    previous: &Graph,
    previous_mapping: &BTreeMap<String, Vec<String>>,
    labels: &[Option<usize>],
    index: usize,
    sum_weights: bool,
) -> Result<Option<GraphLevel>> {
    let nodes = previous.nodes();

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut group_of_label: HashMap<usize, usize> = HashMap::new();
    for (i, label) in labels.iter().enumerate() {
        let Some(label) = label else {
            continue;
        };
        let slot = *group_of_label.entry(*label).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(i);
    }
    if groups.iter().all(|members| members.len() < 2) {
        return Ok(None);
    }

    // Highest degree wins; ties go to the first member in arena order.
    let mut owner: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut representative: Vec<Option<usize>> = vec![None; groups.len()];
    for (g, members) in groups.iter().enumerate() {
        if members.len() < 2 {
            continue;
        }
        let rep = members.iter().copied().fold(members[0], |best, m| {
            if nodes[m].degree > nodes[best].degree {
                m
            } else {
                best
            }
        });
        representative[g] = Some(rep);
        for &m in members {
            owner[m] = nodes[rep].id.as_str();
        }
    }

    let mut next_nodes = Vec::new();
    let mut node_mapping = BTreeMap::new();
    let mut emitted = vec![false; groups.len()];
    for (i, node) in nodes.iter().enumerate() {
        let merged = labels[i]
            .and_then(|label| group_of_label.get(&label).copied())
            .and_then(|g| representative[g].map(|rep| (g, rep)));

        let Some((g, rep)) = merged else {
            let mut carried = node.clone();
            carried.cluster = labels[i];
            if let Some(members) = previous_mapping.get(&node.id) {
                node_mapping.insert(node.id.clone(), members.clone());
            }
            next_nodes.push(carried);
            continue;
        };
        if emitted[g] {
            continue;
        }
        emitted[g] = true;

        let members = &groups[g];
        let centroid =
            members.iter().map(|&m| nodes[m].position).sum::<DVec3>() / members.len() as f64;
        let mut merged_node = nodes[rep].clone();
        merged_node.position = centroid;
        merged_node.velocity = DVec3::ZERO;
        merged_node.force = DVec3::ZERO;
        merged_node.visible = true;
        merged_node.is_representative = true;
        merged_node.level = index as u32;
        merged_node.size = members.iter().map(|&m| nodes[m].size).sum();
        merged_node.cluster = labels[i];
        node_mapping.insert(
            merged_node.id.clone(),
            members.iter().map(|&m| nodes[m].id.clone()).collect(),
        );
        next_nodes.push(merged_node);
    }

    let mut next_edges: Vec<Edge> = Vec::new();
    let mut slot_of_pair: HashMap<(&str, &str), usize> = HashMap::new();
    let mut edge_mapping: BTreeMap<EdgeKey, Vec<Edge>> = BTreeMap::new();
    for edge in previous.edges() {
        let (Some(a), Some(b)) = (previous.index_of(&edge.from), previous.index_of(&edge.to))
        else {
            continue;
        };
        let (from, to) = (owner[a], owner[b]);
        let renamed = from != edge.from || to != edge.to;
        if from == to && renamed {
            continue;
        }

        let pair = if from <= to { (from, to) } else { (to, from) };
        let slot = match slot_of_pair.get(&pair) {
            Some(&slot) => {
                if sum_weights {
                    next_edges[slot].weight += edge.weight;
                }
                slot
            }
            None => {
                let mut next = edge.clone();
                if renamed {
                    next.id = format!("{from}-{to}");
                    next.from = from.to_string();
                    next.to = to.to_string();
                    next.subdivisions.clear();
                }
                slot_of_pair.insert(pair, next_edges.len());
                next_edges.push(next);
                next_edges.len() - 1
            }
        };
        edge_mapping
            .entry(next_edges[slot].key())
            .or_default()
            .push(edge.clone());
    }

    let mut graph = Graph::from_parts(next_nodes, next_edges)?;
    graph.recompute_degrees();
    graph.refresh_edges();
    Ok(Some(GraphLevel {
        index,
        graph,
        node_mapping,
        edge_mapping,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    fn two_triangles() -> Graph {
        let at = |id: &str, x: f64, y: f64| Node::new(id, DVec3::new(x, y, 0.0));
        Graph::from_parts(
            vec![
                at("a", 0.0, 0.0),
                at("b", 1.0, 0.0),
                at("c", 0.5, 1.0),
                at("d", 5.0, 1.0),
                at("e", 6.0, 0.0),
                at("f", 5.5, 2.0),
            ],
            vec![
                Edge::new("a", "b"),
                Edge::new("b", "c"),
                Edge::new("c", "a"),
                Edge::new("d", "e"),
                Edge::new("e", "f"),
                Edge::new("f", "d"),
                Edge::new("c", "d"),
            ],
        )
        .unwrap()
    }

    fn two_pairs() -> Graph {
        Graph::from_parts(
            vec![
                Node::new("a", DVec3::new(0.0, 0.0, 0.0)),
                Node::new("b", DVec3::new(0.5, 0.0, 0.0)),
                Node::new("c", DVec3::new(20.0, 0.0, 0.0)),
                Node::new("d", DVec3::new(20.5, 0.0, 0.0)),
                Node::new("lonely", DVec3::new(100.0, 0.0, 0.0)),
            ],
            vec![
                Edge::new("a", "b"),
                Edge::new("c", "d"),
                Edge::new("a", "c").with_weight(2.0),
                Edge::new("b", "d").with_weight(3.0),
            ],
        )
        .unwrap()
    }

    fn dbscan_builder() -> HierarchyBuilder {
        HierarchyBuilder::new(
            ClusteringMethod::Dbscan(DbscanParams {
                epsilon: 1.0,
                min_pts: 1,
            }),
            HierarchyConfig::default(),
        )
    }

    #[test]
    fn louvain_levels_contract_communities() {
        let levels = HierarchyBuilder::default().build(two_triangles()).unwrap();
        assert_eq!(levels.len(), 3);

        let level1 = &levels[1];
        assert_eq!(level1.index(), 1);
        let ids: Vec<&str> = level1.graph().nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
        assert_eq!(level1.members("c").unwrap(), ["a", "b", "c"]);
        assert_eq!(level1.members("d").unwrap(), ["d", "e", "f"]);
        assert!(level1.members("a").is_none());

        let rep = level1.graph().node("c").unwrap();
        assert!(rep.is_representative);
        assert_eq!(rep.level, 1);
        assert_eq!(rep.position, DVec3::new(0.5, 1.0 / 3.0, 0.0));

        assert_eq!(level1.graph().edge_count(), 1);
        assert_eq!(level1.graph().edges()[0].weight, 1.0);

        let top = &levels[2];
        assert_eq!(top.graph().len(), 1);
        assert_eq!(top.members("c").unwrap(), ["c", "d"]);
        assert_eq!(top.graph().edge_count(), 0);
    }

    #[test]
    fn clustered_levels_record_labels() {
        let levels = HierarchyBuilder::default().build(two_triangles()).unwrap();
        let base = levels[0].graph();
        assert_eq!(base.node("a").unwrap().cluster, Some(0));
        assert_eq!(base.node("f").unwrap().cluster, Some(1));
        assert_eq!(base.node("c").unwrap().degree, 3);
    }

    #[test]
    fn max_levels_caps_the_hierarchy() {
        let builder = HierarchyBuilder::new(
            ClusteringMethod::Louvain,
            HierarchyConfig { max_levels: 2 },
        );
        assert_eq!(builder.build(two_triangles()).unwrap().len(), 2);

        let single = HierarchyBuilder::new(
            ClusteringMethod::Louvain,
            HierarchyConfig { max_levels: 1 },
        );
        let levels = single.build(two_triangles()).unwrap();
        assert_eq!(levels.len(), 1);
        assert!(levels[0].node_mapping().is_empty());
    }

    #[test]
    fn dbscan_keeps_first_weight_and_maps_sub_edges() {
        let levels = dbscan_builder().build(two_pairs()).unwrap();
        assert_eq!(levels.len(), 2);

        let level1 = &levels[1];
        let ids: Vec<&str> = level1.graph().nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "lonely"]);

        let edges = level1.graph().edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].key(), EdgeKey::new("a", "c"));
        assert_eq!(edges[0].weight, 2.0);

        let subsumed = level1.sub_edges(&EdgeKey::new("a", "c"));
        assert_eq!(subsumed, [Edge::new("a", "c"), Edge::new("b", "d")]);
        assert!(level1.sub_edges(&EdgeKey::new("c", "a")).is_empty());
    }

    #[test]
    fn louvain_contraction_sums_weights() {
        let graph = two_pairs();
        let labels = vec![Some(0), Some(0), Some(1), Some(1), None];
        let level = contract(&graph, &BTreeMap::new(), &labels, 1, true)
            .unwrap()
            .unwrap();
        assert_eq!(level.graph().edges()[0].weight, 5.0);
    }

    #[test]
    fn noise_carries_forward_unchanged() {
        let levels = dbscan_builder().build(two_pairs()).unwrap();
        let lonely = levels[1].graph().node("lonely").unwrap();
        assert!(!lonely.is_representative);
        assert_eq!(lonely.level, 0);
        assert_eq!(lonely.cluster, None);
        assert_eq!(lonely.position, DVec3::new(100.0, 0.0, 0.0));
    }

    #[test]
    fn own_representatives_skip_carried_entries() {
        let levels = HierarchyBuilder::default().build(two_triangles()).unwrap();
        let own: Vec<&str> = levels[1].own_representatives().map(|(id, _)| id).collect();
        assert_eq!(own, vec!["c", "d"]);
    }

    #[test]
    fn every_level_edge_references_level_nodes() {
        for levels in [
            HierarchyBuilder::default().build(two_triangles()).unwrap(),
            dbscan_builder().build(two_pairs()).unwrap(),
        ] {
            for level in &levels {
                let graph = level.graph();
                for edge in graph.edges() {
                    assert!(graph.node(&edge.from).is_some());
                    assert!(graph.node(&edge.to).is_some());
                }
                for (rep, members) in level.node_mapping() {
                    assert!(graph.node(rep).unwrap().is_representative);
                    assert!(members.contains(rep));
                }
            }
        }
    }

    #[test]
    fn empty_graph_is_rejected() {
        assert!(matches!(
            HierarchyBuilder::default().build(Graph::new()),
            Err(GraphError::InvalidInput(_))
        ));
    }

    #[test]
    fn clustering_method_is_tagged() {
        let dbscan: ClusteringMethod =
            serde_yaml::from_str("method: dbscan\nepsilon: 2.5\nmin_pts: 3\n").unwrap();
        assert_eq!(
            dbscan,
            ClusteringMethod::Dbscan(DbscanParams {
                epsilon: 2.5,
                min_pts: 3
            })
        );

        let louvain: ClusteringMethod = serde_json::from_str(r#"{"method":"louvain"}"#).unwrap();
        assert_eq!(louvain, ClusteringMethod::Louvain);
    }
}
