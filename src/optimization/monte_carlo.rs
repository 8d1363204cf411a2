//! Random-restart Monte Carlo search with BFGS refinement.
//!
//! Each task owns a seeded generator, so a task is a pure function of its
//! inputs: identical seeds reproduce identical result lists.

use crate::grid::GridMaps;
use crate::math::{Fl, Vec3, PI};
use crate::molecule::{Conformation, Ligand};
use crate::optimization::local::{bfgs, BfgsParams};
use crate::optimization::{add_to_result_container, DockingResult, MAX_RESULTS};
use crate::scoring::ScoringFunction;
use crate::space::SearchBox;
use nalgebra::{Quaternion, UnitQuaternion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct McParams {
    /// Fixed mutation/refinement budget per task.
    pub num_iterations: usize,

    /// Metropolis temperature in energy units.
    pub temperature: Fl,

    /// Maximum translation mutation per axis in Angstroms.
    pub max_translation: Fl,

    /// Maximum rotation mutation in radians.
    pub max_rotation: Fl,

    /// Maximum torsion mutation in radians.
    pub max_torsion: Fl,

    /// Attempts at drawing a feasible random starting conformation.
    pub max_initial_trials: usize,

    pub bfgs: BfgsParams,

    /// Capacity of the task-local result container.
    pub max_results: usize,
}

impl Default for McParams {
    fn default() -> Self {
        Self {
            num_iterations: 100,
            temperature: 1.2,
            max_translation: 2.0,
            max_rotation: PI / 6.0,
            max_torsion: PI / 6.0,
            max_initial_trials: 1000,
            bfgs: BfgsParams::default(),
            max_results: MAX_RESULTS,
        }
    }
}

/// A uniformly distributed random unit quaternion (Shoemake's method).
fn random_orientation(rng: &mut StdRng) -> UnitQuaternion<Fl> {
    let u1: Fl = rng.gen();
    let u2: Fl = rng.gen();
    let u3: Fl = rng.gen();
    let a = (1.0 - u1).sqrt();
    let b = u1.sqrt();
    UnitQuaternion::new_unchecked(Quaternion::new(
        b * (2.0 * PI * u3).cos(),
        a * (2.0 * PI * u2).sin(),
        a * (2.0 * PI * u2).cos(),
        b * (2.0 * PI * u3).sin(),
    ))
}

fn random_conformation(rng: &mut StdRng, space: &SearchBox, num_torsions: usize) -> Conformation {
    let position = Vec3::new(
        rng.gen_range(space.corner1[0]..space.corner2[0]),
        rng.gen_range(space.corner1[1]..space.corner2[1]),
        rng.gen_range(space.corner1[2]..space.corner2[2]),
    );
    Conformation {
        position,
        orientation: random_orientation(rng),
        torsions: (0..num_torsions).map(|_| rng.gen_range(-PI..PI)).collect(),
    }
}

/// A symmetric single-group mutation: translation, rotation or one torsion.
fn mutate(conf: &Conformation, params: &McParams, rng: &mut StdRng) -> Conformation {
    let mut next = conf.clone();
    let choice: Fl = rng.gen();
    if choice < 0.5 {
        for d in 0..3 {
            next.position[d] += rng.gen_range(-params.max_translation..params.max_translation);
        }
    } else if choice < 0.8 || conf.torsions.is_empty() {
        let axis = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let angle = rng.gen_range(-params.max_rotation..params.max_rotation);
        if axis.norm_squared() > 1e-12 {
            next.orientation =
                crate::math::rotation_vector_to_quaternion(&(axis.normalize() * angle))
                    * next.orientation;
        }
    } else {
        let i = rng.gen_range(0..conf.torsions.len());
        next.torsions[i] += rng.gen_range(-params.max_torsion..params.max_torsion);
    }
    next
}

/// One Monte Carlo task: random start, then a fixed budget of mutate /
/// refine / Metropolis-accept steps. Accepted poses are folded into the
/// returned clustered result list. Grid misses are absorbed as rejected
/// steps; nothing in here panics on numeric trouble.
pub fn monte_carlo_task(
    lig: &Ligand,
    seed: u64,
    params: &McParams,
    alphas: &[Fl],
    sf: &ScoringFunction,
    space: &SearchBox,
    maps: &GridMaps,
) -> Vec<DockingResult> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut results = Vec::with_capacity(params.max_results);
    let required_square_error = 4.0 * lig.num_heavy_atoms as Fl;

    // Draw a feasible starting point; a tight box around a clashing
    // receptor may need several attempts.
    let mut current = None;
    for _ in 0..params.max_initial_trials {
        let conf = random_conformation(&mut rng, space, lig.num_torsions);
        if let Some(eval) = lig.evaluate(&conf, sf, space, maps, Fl::INFINITY) {
            current = Some((conf, eval));
            break;
        }
    }
    let Some((mut conf, mut eval)) = current else {
        return results;
    };

    for _ in 0..params.num_iterations {
        let candidate = mutate(&conf, params, &mut rng);
        let Some((refined, refined_eval)) =
            bfgs(lig, &candidate, sf, space, maps, alphas, &params.bfgs)
        else {
            continue;
        };

        let accept = if refined_eval.f < eval.f {
            true
        } else {
            let p: Fl = rng.gen();
            p < (-(refined_eval.f - eval.f) / params.temperature).exp()
        };
        if !accept {
            continue;
        }

        conf = refined;
        eval = refined_eval;
        add_to_result_container(
            &mut results,
            DockingResult {
                conformation: conf.clone(),
                f: eval.f,
                e_nd: 0.0,
                frame_forces: eval.frame_forces.clone(),
                heavy_atom_positions: eval.positions.clone(),
            },
            required_square_error,
            params.max_results,
        );
    }

    results
}
