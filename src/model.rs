//! Graph data model
//!
//! Nodes live in a dense arena (`Vec<Node>`) with a stable id-to-index map, so
//! lookups and in-place mutation never copy the whole graph. Edges reference
//! their endpoints by id and are validated against the arena on insertion.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Hit radius used when resolving a clicked position to a node
pub const DEFAULT_HIT_TOLERANCE: f64 = 0.01;

fn default_true() -> bool {
    true
}

fn default_size() -> f32 {
    1.0
}

fn default_weight() -> f64 {
    1.0
}

/// A graph node with its simulation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Identifier, unique within a graph
    pub id: String,

    /// Position in layout space
    #[serde(default)]
    pub position: DVec3,

    /// Current velocity
    #[serde(default)]
    pub velocity: DVec3,

    /// Force accumulated during the current layout iteration
    #[serde(default)]
    pub force: DVec3,

    /// Whether the node is currently shown
    #[serde(default = "default_true")]
    pub visible: bool,

    /// Whether the node stands in for a whole cluster
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_representative: bool,

    /// Hierarchy level the node belongs to (0 = original graph)
    #[serde(default)]
    pub level: u32,

    /// Rendered size
    #[serde(default = "default_size")]
    pub size: f32,

    /// Number of incident edges
    #[serde(default)]
    pub degree: usize,

    /// Cluster assigned by the last clustering pass, `None` if unassigned
    #[serde(default)]
    pub cluster: Option<usize>,
}

impl Node {
    /// Create a visible level-0 node at the given position
    pub fn new(id: impl Into<String>, position: DVec3) -> Self {
        Self {
            id: id.into(),
            position,
            velocity: DVec3::ZERO,
            force: DVec3::ZERO,
            visible: true,
            is_representative: false,
            level: 0,
            size: default_size(),
            degree: 0,
            cluster: None,
        }
    }
}

/// Directed `(from, to)` pair identifying an edge
///
/// `(a, b)` and `(b, a)` are distinct keys. Code that needs undirected
/// uniqueness must insert or look up both orientations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub from: String,
    pub to: String,
}

impl EdgeKey {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// The same pair in the opposite orientation
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// An edge between two nodes of the same graph
///
/// Equality and ordering compare the directed `(from, to)` pair only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Edge identifier
    #[serde(default)]
    pub id: String,

    /// Source node id
    pub from: String,

    /// Target node id
    pub to: String,

    /// Bend points used for curved or bundled rendering
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subdivisions: Vec<DVec3>,

    /// Edge weight
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Whether the edge is currently shown
    #[serde(default = "default_true")]
    pub visible: bool,

    /// Set on edges created while a cluster is collapsed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,

    /// Rendering start point, refreshed after each layout iteration
    #[serde(default)]
    pub start: DVec3,

    /// Rendering end point, refreshed after each layout iteration
    #[serde(default)]
    pub end: DVec3,
}

impl Edge {
    /// Create a visible edge of weight 1.0
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: format!("{from}-{to}"),
            from,
            to,
            subdivisions: Vec::new(),
            weight: default_weight(),
            visible: true,
            synthetic: false,
            start: DVec3::ZERO,
            end: DVec3::ZERO,
        }
    }

    /// Builder-style weight setter
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.from.clone(), self.to.clone())
    }

    /// Whether `id` is one of the endpoints
    pub fn touches(&self, id: &str) -> bool {
        self.from == id || self.to == id
    }

    /// Whether the edge joins `a` and `b` in either orientation
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.from == a && self.to == b) || (self.from == b && self.to == a)
    }

    /// Midpoint between two positions
    pub fn center(start: DVec3, end: DVec3) -> DVec3 {
        (start + end) * 0.5
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from && self.to == other.to
    }
}

impl Eq for Edge {}

impl PartialOrd for Edge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Edge {
    fn cmp(&self, other: &Self) -> Ordering {
        self.from
            .cmp(&other.from)
            .then_with(|| self.to.cmp(&other.to))
    }
}

/// Rectangular region of the 2D layout plane
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub left: f64,
    pub right: f64,
    pub upper: f64,
    pub lower: f64,
}

impl Area {
    /// Create a validated area
    pub fn new(left: f64, right: f64, lower: f64, upper: f64) -> Result<Self> {
        let area = Self {
            left,
            right,
            upper,
            lower,
        };
        area.validate()?;
        Ok(area)
    }

    /// Reject inverted or non-finite bounds
    pub fn validate(&self) -> Result<()> {
        let finite = [self.left, self.right, self.upper, self.lower]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.left > self.right || self.lower > self.upper {
            return Err(GraphError::InvalidArea {
                left: self.left,
                right: self.right,
                lower: self.lower,
                upper: self.upper,
            });
        }
        Ok(())
    }

    /// Whether the x/y projection of `position` lies inside (bounds inclusive)
    pub fn contains(&self, position: DVec3) -> bool {
        position.x >= self.left
            && position.x <= self.right
            && position.y >= self.lower
            && position.y <= self.upper
    }

    /// Clamp the x/y components into the area, leaving z untouched
    pub fn clamp(&self, position: DVec3) -> DVec3 {
        DVec3::new(
            position.x.clamp(self.left, self.right),
            position.y.clamp(self.lower, self.upper),
            position.z,
        )
    }
}

/// Node arena plus edge list
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph, rejecting duplicate ids and dangling edges
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self> {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node)?;
        }
        for edge in edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }

    /// Insert a node and return its dense index
    pub fn add_node(&mut self, node: Node) -> Result<usize> {
        if self.index.contains_key(&node.id) {
            return Err(GraphError::InvalidInput(format!(
                "duplicate node id '{}'",
                node.id
            )));
        }
        let idx = self.nodes.len();
        self.index.insert(node.id.clone(), idx);
        self.nodes.push(node);
        Ok(idx)
    }

    /// Append an edge whose endpoints already exist
    pub fn add_edge(&mut self, edge: Edge) -> Result<usize> {
        for endpoint in [&edge.from, &edge.to] {
            if !self.index.contains_key(endpoint) {
                return Err(GraphError::InvalidInput(format!(
                    "edge '{}' references missing node '{}'",
                    edge.id, endpoint
                )));
            }
        }
        self.edges.push(edge);
        Ok(self.edges.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Mutable access to edge payloads; endpoints must keep naming existing nodes
    pub fn edges_mut(&mut self) -> &mut [Edge] {
        &mut self.edges
    }

    /// Replace the whole node set, keeping only edges whose endpoints survive
    pub fn set_nodes(&mut self, nodes: Vec<Node>) -> Result<()> {
        let edges = std::mem::take(&mut self.edges);
        let mut rebuilt = Self::new();
        for node in nodes {
            rebuilt.add_node(node)?;
        }
        rebuilt.edges = edges
            .into_iter()
            .filter(|e| rebuilt.index.contains_key(&e.from) && rebuilt.index.contains_key(&e.to))
            .collect();
        *self = rebuilt;
        Ok(())
    }

    /// Replace the whole edge list after validating every endpoint
    pub fn set_edges(&mut self, edges: Vec<Edge>) -> Result<()> {
        for edge in &edges {
            for endpoint in [&edge.from, &edge.to] {
                if !self.index.contains_key(endpoint) {
                    return Err(GraphError::InvalidInput(format!(
                        "edge '{}' references missing node '{}'",
                        edge.id, endpoint
                    )));
                }
            }
        }
        self.edges = edges;
        Ok(())
    }

    /// Drop edges for which `keep` returns false
    pub fn retain_edges(&mut self, keep: impl FnMut(&Edge) -> bool) {
        self.edges.retain(keep);
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Like [`Graph::index_of`] but reports unknown ids as errors
    pub fn require(&self, id: &str) -> Result<usize> {
        self.index_of(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index_of(id).map(|idx| &self.nodes[idx])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        let idx = self.index_of(id)?;
        Some(&mut self.nodes[idx])
    }

    pub fn node_at_index(&self, idx: usize) -> Option<&Node> {
        self.nodes.get(idx)
    }

    /// Mutable node access by dense index; the id must not be changed
    pub fn node_at_index_mut(&mut self, idx: usize) -> Option<&mut Node> {
        self.nodes.get_mut(idx)
    }

    /// Ids of nodes sharing an edge with `id`, in edge order
    pub fn neighbors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter_map(|e| {
                if e.from == id {
                    Some(e.to.as_str())
                } else if e.to == id {
                    Some(e.from.as_str())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Unordered index pairs `(low, high)` joined by at least one edge
    pub fn node_pairs(&self) -> BTreeSet<(usize, usize)> {
        self.edges
            .iter()
            .filter_map(|e| {
                let a = self.index_of(&e.from)?;
                let b = self.index_of(&e.to)?;
                (a != b).then(|| (a.min(b), a.max(b)))
            })
            .collect()
    }

    /// Recount incident edges for every node
    pub fn recompute_degrees(&mut self) {
        let mut degrees = vec![0usize; self.nodes.len()];
        for edge in &self.edges {
            if let Some(a) = self.index.get(&edge.from) {
                degrees[*a] += 1;
            }
            if let Some(b) = self.index.get(&edge.to) {
                degrees[*b] += 1;
            }
        }
        for (node, degree) in self.nodes.iter_mut().zip(degrees) {
            node.degree = degree;
        }
    }

    /// Set the visibility of every edge joining `a` and `b`
    pub fn set_edge_visible(&mut self, a: &str, b: &str, visible: bool) {
        for edge in self.edges.iter_mut().filter(|e| e.connects(a, b)) {
            edge.visible = visible;
        }
    }

    /// Move edge endpoints onto their nodes and recenter the first bend point
    pub fn refresh_edges(&mut self) {
        for edge in &mut self.edges {
            let (Some(&a), Some(&b)) = (self.index.get(&edge.from), self.index.get(&edge.to))
            else {
                continue;
            };
            edge.start = self.nodes[a].position;
            edge.end = self.nodes[b].position;
            if let Some(first) = edge.subdivisions.first_mut() {
                *first = Edge::center(edge.start, edge.end);
            }
        }
    }

    /// Component-wise minimum and maximum node position
    pub fn bounding_box(&self) -> Option<(DVec3, DVec3)> {
        let first = self.nodes.first()?.position;
        Some(self.nodes.iter().fold((first, first), |(lo, hi), n| {
            (lo.min(n.position), hi.max(n.position))
        }))
    }

    /// Sum of all edge weights
    pub fn total_weight(&self) -> f64 {
        self.edges.iter().map(|e| e.weight).sum()
    }

    /// Sum of squared node speeds
    pub fn kinetic_energy(&self) -> f64 {
        self.nodes.iter().map(|n| n.velocity.length_squared()).sum()
    }
}

/// Spatial hash resolving positions back to node ids
///
/// Only visible nodes are indexed. Lookups return the nearest node within the
/// tolerance the index was built with.
#[derive(Debug, Clone)]
pub struct PositionIndex {
    tolerance: f64,
    buckets: HashMap<(i64, i64, i64), Vec<usize>>,
    entries: Vec<(String, DVec3)>,
}

impl PositionIndex {
    pub fn build(graph: &Graph, tolerance: f64) -> Self {
        let tolerance = if tolerance.is_finite() && tolerance > 0.0 {
            tolerance
        } else {
            DEFAULT_HIT_TOLERANCE
        };
        let mut index = Self {
            tolerance,
            buckets: HashMap::new(),
            entries: Vec::new(),
        };
        for node in graph.nodes().iter().filter(|n| n.visible) {
            let cell = index.cell_of(node.position);
            index.buckets.entry(cell).or_default().push(index.entries.len());
            index.entries.push((node.id.clone(), node.position));
        }
        index
    }

    fn cell_of(&self, position: DVec3) -> (i64, i64, i64) {
        let scaled = (position / self.tolerance).floor();
        (scaled.x as i64, scaled.y as i64, scaled.z as i64)
    }

    /// Nearest indexed node within tolerance of `position`
    pub fn lookup(&self, position: DVec3) -> Option<&str> {
        let (cx, cy, cz) = self.cell_of(position);
        let mut best: Option<(usize, f64)> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(bucket) = self.buckets.get(&(cx + dx, cy + dy, cz + dz)) else {
                        continue;
                    };
                    for &entry in bucket {
                        let distance = self.entries[entry].1.distance(position);
                        if distance > self.tolerance {
                            continue;
                        }
                        let closer = match best {
                            None => true,
                            Some((best_entry, best_distance)) => {
                                distance < best_distance
                                    || (distance == best_distance && entry < best_entry)
                            }
                        };
                        if closer {
                            best = Some((entry, distance));
                        }
                    }
                }
            }
        }
        best.map(|(entry, _)| self.entries[entry].0.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
