//! Force-directed layout engine
//!
//! Each iteration applies, in order:
//!
//! 1. pairwise repulsion, limited to twice the target edge length
//! 2. spring forces between connected nodes
//! 3. an implicit pull toward the gravitation center, assembled as a sparse
//!    system and solved with conjugate gradient
//!
//! followed by a midpoint velocity/position update, a guard that keeps nodes
//! inside the optional bounding box, and a fixed velocity decay.
//!
//! With a restriction area enabled, nodes that started inside the area are
//! pinned and never move, and moving nodes may not enter the area.

mod forces;
pub mod solver;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::{GraphError, Result};
use crate::model::{Area, Graph};
use solver::ConjugateGradient;

/// Fraction of the integrated displacement applied per iteration
const STEP_SCALE: f64 = 0.5;

/// Halvings attempted before a displacement is clamped into the bounds
const MAX_GUARD_ITERATIONS: usize = 100;

/// Displacements shorter than this are clamped instead of halved further
const MIN_TRANSLATION: f64 = 1e-5;

/// Layout coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutParams {
    /// Repulsion coefficient (scaled by 128^2 internally)
    pub repulsion: f64,
    /// Spring constant for connected pairs
    pub spring_constant: f64,
    /// Strength of the pull toward the gravitation center
    pub attraction: f64,
    /// Target edge length; repulsion reaches out to twice this distance
    pub edge_length: f64,
    /// Iterations per layout run
    pub iterations: usize,
    /// Integration time step
    pub time_step: f64,
    /// Factor applied to every velocity after each iteration
    pub velocity_decay: f64,
    /// Point all movable nodes are pulled toward
    pub gravitation_center: DVec3,
    /// Box nodes are kept inside, if any
    pub bounds: Option<Area>,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            repulsion: 0.2,
            spring_constant: 12.4,
            attraction: 25.1,
            edge_length: 10.0,
            iterations: 100,
            time_step: 0.05,
            velocity_decay: 0.1,
            gravitation_center: DVec3::ZERO,
            bounds: None,
        }
    }
}

impl LayoutParams {
    pub fn validate(&self) -> Result<()> {
        let finite = [
            ("repulsion", self.repulsion),
            ("spring_constant", self.spring_constant),
            ("attraction", self.attraction),
            ("edge_length", self.edge_length),
            ("time_step", self.time_step),
            ("velocity_decay", self.velocity_decay),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(GraphError::InvalidInput(format!(
                    "layout parameter {name} must be finite, got {value}"
                )));
            }
        }
        if self.edge_length <= 0.0 {
            return Err(GraphError::InvalidInput(format!(
                "edge_length must be positive, got {}",
                self.edge_length
            )));
        }
        if self.time_step <= 0.0 {
            return Err(GraphError::InvalidInput(format!(
                "time_step must be positive, got {}",
                self.time_step
            )));
        }
        if !(0.0..=1.0).contains(&self.velocity_decay) {
            return Err(GraphError::InvalidInput(format!(
                "velocity_decay must lie in [0, 1], got {}",
                self.velocity_decay
            )));
        }
        if !self.gravitation_center.is_finite() {
            return Err(GraphError::InvalidInput(
                "gravitation_center must be finite".to_string(),
            ));
        }
        if let Some(bounds) = &self.bounds {
            bounds.validate()?;
        }
        Ok(())
    }
}

/// Summary of a layout run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutReport {
    /// Iterations actually performed
    pub iterations: usize,
    /// Sum of squared node speeds after the last iteration
    pub kinetic_energy: f64,
    /// Whether the run stopped early on request
    pub cancelled: bool,
}

/// Layout session over one graph
///
/// The graph passed in is kept untouched as the original; iterations mutate a
/// working copy in place.
#[derive(Debug, Clone)]
pub struct NodeLayouter {
    original: Graph,
    graph: Graph,
    params: LayoutParams,
    restriction: Option<Area>,
    pinned: Vec<bool>,
    solver: ConjugateGradient,
}

impl NodeLayouter {
    pub fn new(graph: Graph, params: LayoutParams) -> Result<Self> {
        params.validate()?;
        let pinned = vec![false; graph.len()];
        Ok(Self {
            original: graph.clone(),
            graph,
            params,
            restriction: None,
            pinned,
            solver: ConjugateGradient::default(),
        })
    }

    /// Replace the session graph; clears any restriction
    pub fn set_graph(&mut self, graph: Graph) {
        self.pinned = vec![false; graph.len()];
        self.restriction = None;
        self.original = graph.clone();
        self.graph = graph;
    }

    pub fn set_params(&mut self, params: LayoutParams) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn set_solver(&mut self, solver: ConjugateGradient) {
        self.solver = solver;
    }

    pub fn params(&self) -> &LayoutParams {
        &self.params
    }

    /// The laid-out graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    /// The graph as it was handed to the session
    pub fn original_graph(&self) -> &Graph {
        &self.original
    }

    /// Discard all layout progress
    pub fn reset(&mut self) {
        self.graph = self.original.clone();
        self.pinned = vec![false; self.graph.len()];
        self.restriction = None;
    }

    /// Connected node pairs the springs act on
    pub fn node_pairs(&self) -> BTreeSet<(usize, usize)> {
        self.graph.node_pairs()
    }

    /// Ids of nodes pinned by the restriction area
    pub fn pinned_nodes(&self) -> Vec<&str> {
        self.graph
            .nodes()
            .iter()
            .zip(&self.pinned)
            .filter(|(_, pinned)| **pinned)
            .map(|(node, _)| node.id.as_str())
            .collect()
    }

    pub fn restriction_enabled(&self) -> bool {
        self.restriction.is_some()
    }

    pub fn restricted_area(&self) -> Option<Area> {
        self.restriction
    }

    pub fn gravitation_center(&self) -> DVec3 {
        self.params.gravitation_center
    }

    /// Pin every node currently inside `area`
    pub fn enable_restriction(&mut self, area: Area) -> Result<()> {
        area.validate()?;
        self.pinned = self
            .graph
            .nodes()
            .iter()
            .map(|n| area.contains(n.position))
            .collect();
        self.restriction = Some(area);
        debug!(
            pinned = self.pinned.iter().filter(|p| **p).count(),
            "restriction enabled"
        );
        Ok(())
    }

    pub fn disable_restriction(&mut self) {
        self.restriction = None;
        self.pinned = vec![false; self.graph.len()];
    }

    /// Run `iterations` layout iterations
    pub fn layout(&mut self, iterations: usize) -> Result<LayoutReport> {
        self.run(iterations, None)
    }

    /// Pin the nodes inside `area`, then run `iterations` iterations
    pub fn restricted_layout(&mut self, area: Area, iterations: usize) -> Result<LayoutReport> {
        self.enable_restriction(area)?;
        self.run(iterations, None)
    }

    /// Like [`NodeLayouter::layout`], checking `cancel` before each iteration
    pub fn layout_cancellable(
        &mut self,
        iterations: usize,
        cancel: &AtomicBool,
    ) -> Result<LayoutReport> {
        self.run(iterations, Some(cancel))
    }

    fn run(&mut self, iterations: usize, cancel: Option<&AtomicBool>) -> Result<LayoutReport> {
        if self.graph.is_empty() {
            return Err(GraphError::InvalidInput("graph has no nodes".to_string()));
        }
        self.params.validate()?;

        let mut done = 0;
        let mut cancelled = false;
        for _ in 0..iterations {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                cancelled = true;
                break;
            }
            self.step()?;
            done += 1;
        }

        let report = LayoutReport {
            iterations: done,
            kinetic_energy: self.graph.kinetic_energy(),
            cancelled,
        };
        info!(
            nodes = self.graph.len(),
            iterations = report.iterations,
            kinetic_energy = report.kinetic_energy,
            cancelled,
            "layout finished"
        );
        Ok(report)
    }

    /// One layout iteration
    ///
    /// Nothing is written back if the centering solve fails.
    pub fn step(&mut self) -> Result<()> {
        let n = self.graph.len();
        if self.pinned.len() != n {
            self.pinned = vec![false; n];
        }
        let movable: Vec<bool> = self.pinned.iter().map(|p| !p).collect();
        let positions: Vec<DVec3> = self.graph.nodes().iter().map(|n| n.position).collect();
        let velocities: Vec<DVec3> = self.graph.nodes().iter().map(|n| n.velocity).collect();
        let pairs = self.graph.node_pairs();

        let mut accumulated = vec![DVec3::ZERO; n];
        forces::accumulate_repulsion(&positions, &movable, &self.params, &mut accumulated);
        forces::accumulate_springs(&positions, &pairs, &movable, &self.params, &mut accumulated);

        let (matrix, rhs) = forces::centering_system(
            &positions,
            &velocities,
            &accumulated,
            &movable,
            &self.params,
        );
        let solved = self.solver.solve(&matrix, &rhs)?;

        let h = self.params.time_step;
        for i in 0..n {
            let restriction = self.restriction;
            let bounds = self.params.bounds;
            let decay = self.params.velocity_decay;
            let Some(node) = self.graph.node_at_index_mut(i) else {
                continue;
            };

            if !movable[i] {
                node.velocity = DVec3::ZERO;
                node.force = DVec3::ZERO;
                continue;
            }

            let next_velocity = DVec3::new(solved[i * 3], solved[i * 3 + 1], solved[i * 3 + 2]);
            let acceleration = (next_velocity - node.velocity) / h;
            let mid_velocity = node.velocity + acceleration * (h * 0.5);
            let translation = mid_velocity * h * STEP_SCALE;

            if let Some(position) =
                guarded_position(&node.id, node.position, translation, bounds, restriction)
            {
                node.position = position;
            }
            node.force = acceleration;
            node.velocity = next_velocity * decay;
        }

        self.graph.refresh_edges();
        trace!(kinetic_energy = self.graph.kinetic_energy(), "layout step");
        Ok(())
    }
}

/// Where a node lands after moving by `translation`, or `None` if the move
/// is rejected because it would enter the restriction area
///
/// With bounds set, a displacement leaving the box is halved until it fits;
/// after too many halvings the position is clamped into the box.
fn guarded_position(
    id: &str,
    current: DVec3,
    translation: DVec3,
    bounds: Option<Area>,
    restriction: Option<Area>,
) -> Option<DVec3> {
    let mut next = current + translation;
    if restriction.is_some_and(|area| area.contains(next)) {
        return None;
    }
    let Some(bounds) = bounds else {
        return Some(next);
    };

    let mut step = translation;
    let mut halvings = 0;
    while !bounds.contains(next) {
        step *= 0.5;
        next = current + step;
        halvings += 1;
        if halvings >= MAX_GUARD_ITERATIONS || step.length() < MIN_TRANSLATION {
            warn!(node = id, halvings, "displacement kept leaving bounds, clamping");
            next = bounds.clamp(next);
            break;
        }
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, Node};

    fn square() -> Graph {
        Graph::from_parts(
            vec![
                Node::new("0", DVec3::new(-4.0, -4.0, 0.0)),
                Node::new("1", DVec3::new(4.0, -4.0, 0.0)),
                Node::new("2", DVec3::new(4.0, 4.0, 0.0)),
                Node::new("3", DVec3::new(-4.0, 4.0, 0.0)),
            ],
            vec![
                Edge::new("0", "1"),
                Edge::new("1", "2"),
                Edge::new("2", "3"),
                Edge::new("3", "0"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn default_params_are_valid() {
        assert!(LayoutParams::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_params() {
        let params = LayoutParams {
            edge_length: 0.0,
            ..LayoutParams::default()
        };
        assert!(matches!(
            NodeLayouter::new(square(), params),
            Err(GraphError::InvalidInput(_))
        ));

        let params = LayoutParams {
            repulsion: f64::INFINITY,
            ..LayoutParams::default()
        };
        assert!(params.validate().is_err());

        let params = LayoutParams {
            velocity_decay: 1.5,
            ..LayoutParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn empty_graph_is_invalid_input() {
        let mut layouter = NodeLayouter::new(Graph::new(), LayoutParams::default()).unwrap();
        assert!(matches!(
            layouter.layout(5),
            Err(GraphError::InvalidInput(_))
        ));
    }

    #[test]
    fn layout_keeps_positions_finite() {
        let mut layouter = NodeLayouter::new(square(), LayoutParams::default()).unwrap();
        let report = layouter.layout(50).unwrap();
        assert_eq!(report.iterations, 50);
        assert!(!report.cancelled);
        assert!(report.kinetic_energy.is_finite());
        for node in layouter.graph().nodes() {
            assert!(node.position.is_finite());
        }
    }

    #[test]
    fn layout_does_not_touch_the_original() {
        let mut layouter = NodeLayouter::new(square(), LayoutParams::default()).unwrap();
        layouter.layout(10).unwrap();
        assert_eq!(
            layouter.original_graph().nodes()[0].position,
            DVec3::new(-4.0, -4.0, 0.0)
        );
        assert_ne!(
            layouter.graph().nodes()[0].position,
            DVec3::new(-4.0, -4.0, 0.0)
        );

        layouter.reset();
        assert_eq!(
            layouter.graph().nodes()[0].position,
            DVec3::new(-4.0, -4.0, 0.0)
        );
    }

    #[test]
    fn restriction_pins_nodes_inside_the_area() {
        let mut layouter = NodeLayouter::new(square(), LayoutParams::default()).unwrap();
        let area = Area::new(-5.0, 0.0, -5.0, 0.0).unwrap();
        layouter.restricted_layout(area, 30).unwrap();

        assert!(layouter.restriction_enabled());
        assert_eq!(layouter.restricted_area(), Some(area));
        assert_eq!(layouter.pinned_nodes(), vec!["0"]);
        assert_eq!(
            layouter.graph().node("0").unwrap().position,
            DVec3::new(-4.0, -4.0, 0.0)
        );
        assert_ne!(
            layouter.graph().node("2").unwrap().position,
            DVec3::new(4.0, 4.0, 0.0)
        );
    }

    #[test]
    fn invalid_restriction_area_is_rejected() {
        let mut layouter = NodeLayouter::new(square(), LayoutParams::default()).unwrap();
        let inverted = Area {
            left: 1.0,
            right: -1.0,
            upper: 1.0,
            lower: -1.0,
        };
        assert!(matches!(
            layouter.restricted_layout(inverted, 5),
            Err(GraphError::InvalidArea { .. })
        ));
        assert!(!layouter.restriction_enabled());
    }

    #[test]
    fn bounds_keep_nodes_inside_the_box() {
        let bounds = Area::new(-5.0, 5.0, -5.0, 5.0).unwrap();
        let params = LayoutParams {
            repulsion: 5.0,
            bounds: Some(bounds),
            ..LayoutParams::default()
        };
        let mut layouter = NodeLayouter::new(square(), params).unwrap();
        layouter.layout(40).unwrap();
        for node in layouter.graph().nodes() {
            assert!(bounds.contains(node.position), "{} escaped", node.id);
        }
    }

    #[test]
    fn solver_failure_is_typed_and_leaves_positions() {
        let params = LayoutParams {
            attraction: -1000.0,
            ..LayoutParams::default()
        };
        let mut layouter = NodeLayouter::new(square(), params).unwrap();
        let err = layouter.layout(3).unwrap_err();
        assert!(matches!(err, GraphError::Solver(_)));
        assert_eq!(
            layouter.graph().nodes()[2].position,
            DVec3::new(4.0, 4.0, 0.0)
        );
    }

    #[test]
    fn cancellation_is_checked_between_iterations() {
        let mut layouter = NodeLayouter::new(square(), LayoutParams::default()).unwrap();
        let cancel = AtomicBool::new(true);
        let report = layouter.layout_cancellable(10, &cancel).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.iterations, 0);
    }

    #[test]
    fn edges_follow_their_nodes() {
        let mut graph = square();
        graph.edges_mut()[0].subdivisions = vec![DVec3::ZERO];
        let mut layouter = NodeLayouter::new(graph, LayoutParams::default()).unwrap();
        layouter.layout(5).unwrap();

        let g = layouter.graph();
        let edge = &g.edges()[0];
        assert_eq!(edge.start, g.node("0").unwrap().position);
        assert_eq!(edge.end, g.node("1").unwrap().position);
        assert_eq!(edge.subdivisions[0], Edge::center(edge.start, edge.end));
    }

    #[test]
    fn moving_nodes_cannot_enter_the_restriction_area() {
        let area = Area::new(-1.0, 1.0, -1.0, 1.0).unwrap();
        let rejected = guarded_position(
            "n",
            DVec3::new(3.0, 0.0, 0.0),
            DVec3::new(-2.5, 0.0, 0.0),
            None,
            Some(area),
        );
        assert_eq!(rejected, None);

        let accepted = guarded_position(
            "n",
            DVec3::new(3.0, 0.0, 0.0),
            DVec3::new(0.5, 0.0, 0.0),
            None,
            Some(area),
        );
        assert_eq!(accepted, Some(DVec3::new(3.5, 0.0, 0.0)));
    }

    #[test]
    fn guard_halves_then_clamps() {
        let bounds = Area::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let halved = guarded_position(
            "n",
            DVec3::new(8.0, 5.0, 0.0),
            DVec3::new(4.0, 0.0, 0.0),
            Some(bounds),
            None,
        );
        assert_eq!(halved, Some(DVec3::new(10.0, 5.0, 0.0)));

        let outside = guarded_position(
            "n",
            DVec3::new(20.0, 5.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            Some(bounds),
            None,
        );
        assert_eq!(outside, Some(DVec3::new(10.0, 5.0, 0.0)));
    }
}
