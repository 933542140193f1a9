use std::collections::BTreeSet;
use std::f64::consts::TAU;

use glam::DVec3;

use super::LayoutParams;
use super::solver::SparseMatrix;

/// Multiplier applied to the user-facing repulsion coefficient
pub(super) const REPULSION_SCALE: f64 = 128.0 * 128.0;

/// Smallest spring force magnitude applied to a connected pair
pub(super) const MIN_SPRING_FORCE: f64 = 0.01;

const COINCIDENT_DISTANCE: f64 = 1e-9;

/// Deterministic unit vector for two nodes sharing a position
///
/// Swapping `i` and `j` flips the direction, so the pair still separates.
fn separation_direction(i: usize, j: usize) -> DVec3 {
    let (low, high) = (i.min(j), i.max(j));
    let angle = ((low as f64) * 0.618_034 + (high as f64) * 0.414_214) * TAU;
    let direction = DVec3::new(angle.cos(), angle.sin(), 0.0);
    if i < j { direction } else { -direction }
}

/// Pairwise repulsion acting on movable nodes, limited to `2 * edge_length`
pub(super) fn accumulate_repulsion(
    positions: &[DVec3],
    movable: &[bool],
    params: &LayoutParams,
    forces: &mut [DVec3],
) {
    let max_distance = params.edge_length * 2.0;
    let strength = params.repulsion * REPULSION_SCALE;

    for i in 0..positions.len() {
        if !movable[i] {
            continue;
        }
        for j in 0..positions.len() {
            if i == j {
                continue;
            }
            let delta = positions[i] - positions[j];
            let distance = delta.length();
            if distance > max_distance {
                continue;
            }

            let direction = if distance > COINCIDENT_DISTANCE {
                delta / distance
            } else {
                separation_direction(i, j)
            };
            let denominator = (distance * distance).max(params.edge_length);
            forces[i] += direction * (strength / denominator);
        }
    }
}

/// Hooke springs between connected pairs, rest length `edge_length`
pub(super) fn accumulate_springs(
    positions: &[DVec3],
    pairs: &BTreeSet<(usize, usize)>,
    movable: &[bool],
    params: &LayoutParams,
    forces: &mut [DVec3],
) {
    for &(a, b) in pairs {
        if !movable[a] && !movable[b] {
            continue;
        }
        let delta = positions[b] - positions[a];
        let distance = delta.length();
        if distance <= COINCIDENT_DISTANCE {
            continue;
        }

        let mut magnitude = params.spring_constant * (distance - params.edge_length);
        if magnitude.abs() < MIN_SPRING_FORCE {
            magnitude = MIN_SPRING_FORCE.copysign(magnitude);
        }
        let pull = delta / distance * magnitude;

        if movable[a] {
            forces[a] += pull;
        }
        if movable[b] {
            forces[b] -= pull;
        }
    }
}

/// Implicit centering step as a sparse system in the next velocities
///
/// One row per coordinate per node:
/// `(1 + h^2 k) v' = v + h F - h k (p - c)` for movable nodes and `v' = 0`
/// for pinned ones.
pub(super) fn centering_system(
    positions: &[DVec3],
    velocities: &[DVec3],
    forces: &[DVec3],
    movable: &[bool],
    params: &LayoutParams,
) -> (SparseMatrix, Vec<f64>) {
    let h = params.time_step;
    let k = params.attraction;
    let center = params.gravitation_center;
    let dim = positions.len() * 3;

    let mut triplets = Vec::with_capacity(dim);
    let mut rhs = vec![0.0; dim];

    for i in 0..positions.len() {
        for axis in 0..3 {
            let row = i * 3 + axis;
            if !movable[i] {
                triplets.push((row, row, 1.0));
                continue;
            }
            triplets.push((row, row, 1.0 + h * h * k));
            rhs[row] = velocities[i][axis] + h * forces[i][axis]
                - h * k * (positions[i][axis] - center[axis]);
        }
    }

    (SparseMatrix::from_triplets(dim, &triplets), rhs)
}
