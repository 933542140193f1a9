//! Click-driven collapse and expand of clusters
//!
//! A [`CollapseController`] owns the working graph of the displayed level.
//! Collapsing a representative hides the rest of its cluster and redirects
//! every edge leaving the cluster to the representative through a synthetic
//! edge. Collapsing any other node prunes its single-edge neighbors from
//! coarser levels. Expanding shows the hidden nodes again and drops the
//! synthetic edges the collapse added.
//!
//! Through every operation an edge, synthetic or not, is visible exactly when
//! both of its endpoints are. Lookups are forgiving: an unknown or stale id is
//! logged and ignored.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use glam::DVec3;
use tracing::{debug, warn};

use crate::error::{GraphError, Result};
use crate::hierarchy::GraphLevel;
use crate::model::{DEFAULT_HIT_TOLERANCE, Edge, Graph, PositionIndex};

/// What a collapse or expand request did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Collapsed(String),
    Expanded(String),
    /// Nothing matched; the graph is unchanged
    Ignored,
}

/// A synthetic edge added by a collapse
#[derive(Debug, Clone)]
struct Redirect {
    id: String,
    /// At least one real edge was folded into it
    real: bool,
    /// Synthetic edges of other collapses folded into it, with their weights
    absorbed: Vec<(String, f64)>,
}

/// What a collapse changed, undone on expand
#[derive(Debug, Clone, Default)]
struct CollapseRecord {
    nodes: Vec<(String, bool)>,
    synthetic: Vec<Redirect>,
}

#[derive(Debug, Clone)]
pub struct CollapseController {
    graph: Graph,
    node_mapping: BTreeMap<String, Vec<String>>,
    collapsed: BTreeMap<String, CollapseRecord>,
    tolerance: f64,
    /// Hit-test index over visible nodes, rebuilt lazily after visibility changes
    position_index: Option<PositionIndex>,
}

fn synthetic_prefix(representative: &str) -> String {
    format!("collapsed:{representative}:")
}

impl CollapseController {
    /// Controller over `graph`, with `node_mapping` naming each
    /// representative's members
    pub fn new(graph: Graph, node_mapping: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            graph,
            node_mapping,
            collapsed: BTreeMap::new(),
            tolerance: DEFAULT_HIT_TOLERANCE,
            position_index: None,
        }
    }

    /// Working graph for displaying level `k` of `levels`
    ///
    /// The nodes are those of level `k - 1`, with the representatives created
    /// at level `k` flagged so that clicking them collapses their cluster.
    /// Level 0 has no clusters to collapse.
    pub fn for_level(levels: &[GraphLevel], k: usize) -> Result<Self> {
        if k >= levels.len() {
            return Err(GraphError::InvalidInput(format!(
                "level {k} requested but the hierarchy has {} levels",
                levels.len()
            )));
        }
        if k == 0 {
            return Ok(Self::new(levels[0].graph().clone(), BTreeMap::new()));
        }

        let mut graph = levels[k - 1].graph().clone();
        let mapping: BTreeMap<String, Vec<String>> = levels[k]
            .own_representatives()
            .map(|(id, members)| (id.to_string(), members.to_vec()))
            .collect();
        for i in 0..graph.len() {
            let Some(node) = graph.node_at_index_mut(i) else {
                continue;
            };
            node.is_representative = mapping.contains_key(&node.id);
            if node.is_representative {
                node.level = k as u32;
            }
        }
        Ok(Self::new(graph, mapping))
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self.position_index = None;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn node_mapping(&self) -> &BTreeMap<String, Vec<String>> {
        &self.node_mapping
    }

    pub fn is_collapsed(&self, id: &str) -> bool {
        self.collapsed.contains_key(id)
    }

    pub fn collapsed_nodes(&self) -> impl Iterator<Item = &str> {
        self.collapsed.keys().map(String::as_str)
    }

    /// Toggle `id` between collapsed and expanded
    pub fn click(&mut self, id: &str) -> ClickOutcome {
        if self.is_collapsed(id) {
            self.expand(id)
        } else {
            self.collapse(id)
        }
    }

    /// Toggle the visible node nearest to `position`, if one is within the
    /// hit tolerance
    pub fn click_at(&mut self, position: DVec3) -> ClickOutcome {
        let index = self
            .position_index
            .get_or_insert_with(|| PositionIndex::build(&self.graph, self.tolerance));
        let Some(id) = index.lookup(position).map(str::to_string) else {
            debug!(?position, "click hit no node");
            return ClickOutcome::Ignored;
        };
        self.click(&id)
    }

    /// Show or hide a node; its edges follow so that an edge stays visible
    /// only while both endpoints are
    pub fn set_node_visible(&mut self, id: &str, visible: bool) -> bool {
        let Some(node) = self.graph.node_mut(id) else {
            warn!(node = id, "visibility change for unknown node ignored");
            return false;
        };
        node.visible = visible;
        self.position_index = None;
        self.sync_edges_of(&[id.to_string()]);
        true
    }

    pub fn set_edge_visible(&mut self, a: &str, b: &str, visible: bool) {
        self.graph.set_edge_visible(a, b, visible);
    }

    pub fn collapse(&mut self, id: &str) -> ClickOutcome {
        let Some(node) = self.graph.node(id) else {
            warn!(node = id, "collapse of unknown node ignored");
            return ClickOutcome::Ignored;
        };
        if self.is_collapsed(id) {
            debug!(node = id, "already collapsed");
            return ClickOutcome::Ignored;
        }

        let record = if node.is_representative {
            match self.collapse_cluster(id) {
                Some(record) => record,
                None => return ClickOutcome::Ignored,
            }
        } else {
            self.prune_leaves(id)
        };
        debug!(
            node = id,
            hidden = record.nodes.len(),
            synthetic = record.synthetic.len(),
            "collapsed"
        );
        self.position_index = None;
        self.collapsed.insert(id.to_string(), record);
        ClickOutcome::Collapsed(id.to_string())
    }

    pub fn expand(&mut self, id: &str) -> ClickOutcome {
        if self.graph.node(id).is_none() {
            warn!(node = id, "expand of unknown node ignored");
            return ClickOutcome::Ignored;
        }

        match self.collapsed.remove(id) {
            Some(record) => self.restore(record),
            None => self.reveal(id),
        }
        self.position_index = None;
        debug!(node = id, "expanded");
        ClickOutcome::Expanded(id.to_string())
    }

    fn collapse_cluster(&mut self, representative: &str) -> Option<CollapseRecord> {
        let Some(members) = self.node_mapping.get(representative) else {
            warn!(
                node = representative,
                "representative has no cluster mapping, collapse ignored"
            );
            return None;
        };

        let mut hidden: BTreeSet<String> = BTreeSet::new();
        for member in members.iter().filter(|m| *m != representative) {
            if self.graph.node(member).is_some() {
                hidden.insert(member.clone());
            } else {
                warn!(
                    node = representative,
                    member = member.as_str(),
                    "cluster member not in graph"
                );
            }
        }

        let mut record = CollapseRecord::default();
        for member in &hidden {
            if let Some(node) = self.graph.node_mut(member) {
                record.nodes.push((member.clone(), node.visible));
                node.visible = false;
            }
        }

        let representative_visible = self
            .graph
            .node(representative)
            .is_some_and(|n| n.visible);
        let mut cluster: HashSet<&str> = hidden.iter().map(String::as_str).collect();
        cluster.insert(representative);

        // External endpoint -> edge redirected to the representative.
        // Synthetic edges of earlier collapses that end on a member are
        // redirected too, linking the two representatives.
        let mut redirected: BTreeMap<String, (Edge, Redirect)> = BTreeMap::new();
        for edge in self.graph.edges() {
            let from_inside = cluster.contains(edge.from.as_str());
            let to_inside = cluster.contains(edge.to.as_str());
            if from_inside == to_inside
                || !(hidden.contains(&edge.from) || hidden.contains(&edge.to))
            {
                continue;
            }

            let (member, external, outgoing) = if from_inside {
                (&edge.from, &edge.to, true)
            } else {
                (&edge.to, &edge.from, false)
            };
            let (Some(member_node), Some(external_node)) =
                (self.graph.node(member), self.graph.node(external))
            else {
                continue;
            };

            let (synthetic, redirect) = redirected.entry(external.clone()).or_insert_with(|| {
                let (from, to) = if outgoing {
                    (representative, external.as_str())
                } else {
                    (external.as_str(), representative)
                };
                let mut synthetic = Edge::new(from, to).with_weight(0.0);
                synthetic.id = format!("{}{external}", synthetic_prefix(representative));
                synthetic.synthetic = true;
                synthetic.visible = representative_visible && external_node.visible;
                synthetic.subdivisions = vec![member_node.position, external_node.position];
                let redirect = Redirect {
                    id: synthetic.id.clone(),
                    real: false,
                    absorbed: Vec::new(),
                };
                (synthetic, redirect)
            });
            synthetic.weight += edge.weight;
            if edge.synthetic {
                redirect.absorbed.push((edge.id.clone(), edge.weight));
            } else {
                redirect.real = true;
            }
        }

        for edge in self.graph.edges_mut() {
            if hidden.contains(&edge.from) || hidden.contains(&edge.to) {
                edge.visible = false;
            }
        }

        for (edge, redirect) in redirected.into_values() {
            if let Err(err) = self.graph.add_edge(edge) {
                warn!(node = representative, %err, "synthetic edge rejected");
                continue;
            }
            record.synthetic.push(redirect);
        }
        self.graph.refresh_edges();
        Some(record)
    }

    /// Hide single-edge neighbors from coarser levels
    fn prune_leaves(&mut self, id: &str) -> CollapseRecord {
        let mut record = CollapseRecord::default();
        let Some(level) = self.graph.node(id).map(|n| n.level) else {
            return record;
        };

        let leaves: Vec<String> = self
            .graph
            .neighbors(id)
            .into_iter()
            .filter_map(|neighbor| self.graph.node(neighbor))
            .filter(|n| n.level > level && n.degree == 1 && n.visible)
            .map(|n| n.id.clone())
            .collect();

        for leaf in &leaves {
            if let Some(node) = self.graph.node_mut(leaf) {
                record.nodes.push((leaf.clone(), node.visible));
                node.visible = false;
            }
        }
        self.sync_edges_of(&leaves);
        record
    }

    /// Undo a collapse: show its nodes again, drop its synthetic edges along
    /// with any synthetic edge that only existed to redirect them, and
    /// recompute the visibility of every edge around the restored nodes
    fn restore(&mut self, record: CollapseRecord) {
        let mut touched = Vec::with_capacity(record.nodes.len());
        for (id, visible) in record.nodes {
            if let Some(node) = self.graph.node_mut(&id) {
                node.visible = visible;
                touched.push(id);
            }
        }

        let mut removed: HashSet<String> = record.synthetic.into_iter().map(|r| r.id).collect();
        let mut reduced: HashMap<String, f64> = HashMap::new();
        let mut frontier: Vec<String> = removed.iter().cloned().collect();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for other in self.collapsed.values_mut() {
                for redirect in &mut other.synthetic {
                    let before = redirect.absorbed.len();
                    let mut lost = 0.0;
                    redirect.absorbed.retain(|(source, weight)| {
                        let gone = frontier.contains(source);
                        if gone {
                            lost += weight;
                        }
                        !gone
                    });
                    if redirect.absorbed.len() == before {
                        continue;
                    }
                    if !redirect.real && redirect.absorbed.is_empty() {
                        if removed.insert(redirect.id.clone()) {
                            next.push(redirect.id.clone());
                        }
                    } else {
                        *reduced.entry(redirect.id.clone()).or_default() += lost;
                    }
                }
                other.synthetic.retain(|r| !removed.contains(&r.id));
            }
            frontier = next;
        }

        self.graph
            .retain_edges(|e| !(e.synthetic && removed.contains(&e.id)));
        for edge in self.graph.edges_mut().iter_mut().filter(|e| e.synthetic) {
            if let Some(lost) = reduced.get(&edge.id) {
                edge.weight -= lost;
            }
        }
        self.sync_edges_of(&touched);
    }

    /// Expand without a record: show the node, its cluster and any hidden
    /// neighbors
    fn reveal(&mut self, id: &str) {
        let mut shown = vec![id.to_string()];
        if let Some(node) = self.graph.node_mut(id) {
            node.visible = true;
        }

        if let Some(members) = self.node_mapping.get(id).cloned() {
            for member in members {
                if let Some(node) = self.graph.node_mut(&member) {
                    node.visible = true;
                    shown.push(member);
                }
            }
            let prefix = synthetic_prefix(id);
            self.graph
                .retain_edges(|e| !(e.synthetic && e.id.starts_with(&prefix)));
        }

        let hidden_neighbors: Vec<String> = self
            .graph
            .neighbors(id)
            .into_iter()
            .filter(|n| self.graph.node(n).is_some_and(|node| !node.visible))
            .map(str::to_string)
            .collect();
        for neighbor in hidden_neighbors {
            if let Some(node) = self.graph.node_mut(&neighbor) {
                node.visible = true;
            }
            shown.push(neighbor);
        }

        self.sync_edges_of(&shown);
    }

    /// Make every edge touching `ids` visible iff both of its endpoints are
    fn sync_edges_of(&mut self, ids: &[String]) {
        let visible: HashSet<String> = self
            .graph
            .nodes()
            .iter()
            .filter(|n| n.visible)
            .map(|n| n.id.clone())
            .collect();
        for edge in self.graph.edges_mut() {
            if !ids.iter().any(|id| edge.touches(id)) {
                continue;
            }
            edge.visible = visible.contains(&edge.from) && visible.contains(&edge.to);
        }
    }
}
