//! Density-based clustering over node positions
//!
//! Classic region-query / cluster-expansion DBSCAN, with one twist: a point
//! that is too sparse to seed a cluster is attached to the cluster of its
//! nearest already-labeled neighbor *that it shares an edge with*. Density
//! and graph adjacency together decide where noise ends up.
//!
//! Every region query scans all points, so a call is O(n²). Interactive
//! callers should bound the node count first.

use std::collections::{BTreeSet, HashMap, HashSet};

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::model::Graph;

/// DBSCAN tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbscanParams {
    /// Neighborhood radius (inclusive)
    pub epsilon: f64,
    /// Neighbors (excluding the point itself) needed to seed a cluster
    pub min_pts: usize,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            min_pts: 2,
        }
    }
}

/// Indices of every other point within `epsilon` of `point`
fn region_query(point: usize, positions: &[DVec3], epsilon: f64) -> Vec<usize> {
    let center = positions[point];
    positions
        .iter()
        .enumerate()
        .filter(|&(i, p)| i != point && center.distance(*p) <= epsilon)
        .map(|(i, _)| i)
        .collect()
}

/// Unordered index pairs joined by an edge; unknown ids are skipped
fn connectivity(edges: &[(String, String)], node_ids: &[String]) -> HashSet<(usize, usize)> {
    let index: HashMap<&str, usize> = node_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    edges
        .iter()
        .filter_map(|(a, b)| {
            let a = *index.get(a.as_str())?;
            let b = *index.get(b.as_str())?;
            Some((a.min(b), a.max(b)))
        })
        .collect()
}

/// Cluster of the closest labeled point that shares an edge with `point`
fn nearest_connected_cluster(
    point: usize,
    labels: &[Option<usize>],
    positions: &[DVec3],
    connected: &HashSet<(usize, usize)>,
) -> Option<usize> {
    let mut nearest: Option<(usize, f64)> = None;
    for (i, label) in labels.iter().enumerate() {
        let Some(cluster) = *label else {
            continue;
        };
        if !connected.contains(&(point.min(i), point.max(i))) {
            continue;
        }
        let distance = positions[point].distance(positions[i]);
        if nearest.is_none_or(|(_, best)| distance < best) {
            nearest = Some((cluster, distance));
        }
    }
    nearest.map(|(cluster, _)| cluster)
}

/// Cluster `positions`, returning one label per input point in input order
///
/// `node_ids[i]` names the point at `positions[i]`; `edges` are pairs of those
/// ids and only influence where sparse points are reassigned.
pub fn dbscan(
    positions: &[DVec3],
    params: DbscanParams,
    edges: &[(String, String)],
    node_ids: &[String],
) -> Result<Vec<Option<usize>>> {
    if node_ids.len() != positions.len() {
        return Err(GraphError::InvalidInput(format!(
            "dbscan got {} positions but {} node ids",
            positions.len(),
            node_ids.len()
        )));
    }
    if !params.epsilon.is_finite() || params.epsilon < 0.0 {
        return Err(GraphError::InvalidInput(format!(
            "dbscan epsilon must be a non-negative number, got {}",
            params.epsilon
        )));
    }

    let n = positions.len();
    let connected = connectivity(edges, node_ids);
    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_cluster = 0usize;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let neighbors = region_query(i, positions, params.epsilon);
        if neighbors.len() < params.min_pts {
            labels[i] = nearest_connected_cluster(i, &labels, positions, &connected);
            continue;
        }

        let cluster = next_cluster;
        next_cluster += 1;
        labels[i] = Some(cluster);

        let mut frontier: BTreeSet<usize> = neighbors.into_iter().collect();
        while let Some(current) = frontier.pop_first() {
            if !visited[current] {
                visited[current] = true;
                let reach = region_query(current, positions, params.epsilon);
                if reach.len() >= params.min_pts {
                    frontier.extend(reach);
                }
            }
            if labels[current].is_none() {
                labels[current] = Some(cluster);
            }
        }
    }

    let noise = labels.iter().filter(|l| l.is_none()).count();
    debug!(points = n, clusters = next_cluster, noise, "dbscan finished");
    Ok(labels)
}

/// Run [`dbscan`] over every node of `graph`, in arena order
pub fn dbscan_graph(graph: &Graph, params: DbscanParams) -> Result<Vec<Option<usize>>> {
    let positions: Vec<DVec3> = graph.nodes().iter().map(|n| n.position).collect();
    let node_ids: Vec<String> = graph.nodes().iter().map(|n| n.id.clone()).collect();
    let edges: Vec<(String, String)> = graph
        .edges()
        .iter()
        .map(|e| (e.from.clone(), e.to.clone()))
        .collect();
    dbscan(&positions, params, &edges, &node_ids)
}

/// Number of distinct clusters among `labels`
pub fn cluster_count(labels: &[Option<usize>]) -> usize {
    labels.iter().flatten().collect::<BTreeSet<_>>().len()
}
