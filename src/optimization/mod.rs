//! Stochastic pose search and clustered result collection.

pub mod local;
pub mod monte_carlo;

use crate::math::{Fl, Vec3};
use crate::molecule::ligand::square_error;
use crate::molecule::Conformation;

/// Number of backtracking step sizes tried by the local optimizer.
pub const NUM_ALPHAS: usize = 5;

/// Maximum results kept by a single Monte Carlo task.
pub const MAX_RESULTS: usize = 20;

/// The backtracking schedule `alpha_k = 0.1^k`.
pub fn alpha_schedule() -> [Fl; NUM_ALPHAS] {
    let mut alphas = [1.0; NUM_ALPHAS];
    for i in 1..NUM_ALPHAS {
        alphas[i] = alphas[i - 1] * 0.1;
    }
    alphas
}

/// A candidate docked pose.
#[derive(Debug, Clone)]
pub struct DockingResult {
    pub conformation: Conformation,

    /// Total energy: receptor interaction plus intra-ligand pairs.
    pub f: Fl,

    /// Free energy adjusted by the flexibility penalty; assigned when the
    /// best representative of a ligand is emitted.
    pub e_nd: Fl,

    /// Accumulated force on each rigid frame.
    pub frame_forces: Vec<Vec3>,

    pub heavy_atom_positions: Vec<Vec3>,
}

/// Inserts `candidate` into `results`, keeping the container sorted by `f`
/// ascending, free of same-cluster duplicates and bounded to `max_results`.
///
/// Two results share a cluster when the sum of squared per-atom
/// displacements is below `required_square_error`. A worse same-cluster
/// candidate is dropped; a better one replaces the existing representative.
pub fn add_to_result_container(
    results: &mut Vec<DockingResult>,
    candidate: DockingResult,
    required_square_error: Fl,
    max_results: usize,
) {
    if let Some(i) = results.iter().position(|q| {
        square_error(&q.heavy_atom_positions, &candidate.heavy_atom_positions)
            < required_square_error
    }) {
        if results[i].f > candidate.f {
            results[i] = candidate;
            results.sort_by(|a, b| a.f.total_cmp(&b.f));
        }
        return;
    }

    let at = results.partition_point(|q| q.f < candidate.f);
    results.insert(at, candidate);
    results.truncate(max_results);
}
