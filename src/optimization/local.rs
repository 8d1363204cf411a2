//! BFGS local refinement of a ligand pose.
//!
//! Quasi-Newton minimization over the `6 + num_torsions` pose degrees of
//! freedom, using the analytic gradient from the energy model and a
//! backtracking line search over the fixed `0.1^k` step schedule.

use crate::grid::GridMaps;
use crate::math::Fl;
use crate::molecule::{Conformation, Evaluation, Ligand};
use crate::scoring::ScoringFunction;
use crate::space::SearchBox;
use nalgebra::{DMatrix, DVector};

/// Sufficient-decrease constant of the line search.
const C1: Fl = 1e-4;

#[derive(Debug, Clone)]
pub struct BfgsParams {
    /// Outer quasi-Newton iteration budget.
    pub max_iterations: usize,

    /// Stop once the gradient norm falls below this.
    pub gradient_tolerance: Fl,
}

impl Default for BfgsParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            gradient_tolerance: 1e-4,
        }
    }
}

/// Refines `conf` to a local minimum. Returns `None` when the starting
/// conformation itself is infeasible (an atom outside the box).
pub fn bfgs(
    lig: &Ligand,
    conf: &Conformation,
    sf: &ScoringFunction,
    space: &SearchBox,
    maps: &GridMaps,
    alphas: &[Fl],
    params: &BfgsParams,
) -> Option<(Conformation, Evaluation)> {
    let mut current = conf.clone();
    let mut eval = lig.evaluate(&current, sf, space, maps, Fl::INFINITY)?;

    let n = current.num_dofs();
    let mut h = DMatrix::<Fl>::identity(n, n);

    for _ in 0..params.max_iterations {
        let g = DVector::from_column_slice(&eval.gradient);
        if g.norm() < params.gradient_tolerance {
            break;
        }

        let p = -(&h * &g);
        let pg = p.dot(&g);
        if pg >= 0.0 {
            // Not a descent direction; the curvature information has gone
            // stale, so restart from steepest descent.
            h = DMatrix::identity(n, n);
            continue;
        }

        // First step size achieving sufficient decrease wins. The energy
        // bound makes the evaluation itself reject insufficient steps.
        let mut accepted: Option<(Fl, Conformation, Evaluation)> = None;
        for &alpha in alphas {
            let candidate = current.step(p.as_slice(), alpha);
            let bound = eval.f + C1 * alpha * pg;
            if let Some(candidate_eval) = lig.evaluate(&candidate, sf, space, maps, bound) {
                accepted = Some((alpha, candidate, candidate_eval));
                break;
            }
        }
        let Some((alpha, next, next_eval)) = accepted else {
            break;
        };

        // Inverse-Hessian update from the accepted displacement.
        let s = &p * alpha;
        let y = DVector::from_column_slice(&next_eval.gradient) - &g;
        let sy = s.dot(&y);
        if sy > 1e-10 {
            let rho = 1.0 / sy;
            let hy = &h * &y;
            let yhy = y.dot(&hy);
            h = &h - (&s * hy.transpose() + &hy * s.transpose()) * rho
                + (&s * s.transpose()) * (rho * rho * yhy + rho);
        }

        current = next;
        eval = next_eval;
    }

    Some((current, eval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Atom, XsType};
    use crate::grid;
    use crate::math::Vec3;
    use crate::molecule::ligand::FrameSpec;
    use crate::molecule::Receptor;
    use crate::optimization::alpha_schedule;
    use crate::pool::ThreadPool;
    use nalgebra::UnitQuaternion;
    use std::sync::Arc;

    /// One-atom ligand over the map of a single receptor atom: the minimum
    /// of the pair potential is the only stationary point inside the box.
    #[test]
    fn descends_towards_lower_energy() {
        let sf = Arc::new(ScoringFunction::precalculate_serial());
        let space = Arc::new(SearchBox::new(
            Vec3::zeros(),
            Vec3::new(12.0, 12.0, 12.0),
            0.25,
        ));
        let receptor = Arc::new(Receptor::new(vec![Atom::new(
            1,
            "C".into(),
            Vec3::new(-6.5, 0.0, 0.0),
            XsType::CH,
        )]));
        let partitions = Arc::new(space.build_partitions(&receptor));
        let pool = ThreadPool::new(2);
        let mut maps = GridMaps::new();
        grid::populate(
            &mut maps,
            &[XsType::CH],
            &pool,
            &sf,
            &space,
            &receptor,
            &partitions,
        )
        .unwrap();

        let lig = Ligand::assemble(
            vec![Atom::new(1, "C".into(), Vec3::zeros(), XsType::CH)],
            vec![FrameSpec {
                parent: None,
                rotor_x: 0,
                rotor_y: 0,
                atoms: vec![0],
            }],
        )
        .unwrap();

        let start = Conformation {
            position: Vec3::new(0.5, 0.25, -0.5),
            orientation: UnitQuaternion::identity(),
            torsions: Vec::new(),
        };
        let start_eval = lig
            .evaluate(&start, &sf, &space, &maps, Fl::INFINITY)
            .unwrap();

        let (refined, eval) = bfgs(
            &lig,
            &start,
            &sf,
            &space,
            &maps,
            &alpha_schedule(),
            &BfgsParams::default(),
        )
        .unwrap();

        assert!(eval.f <= start_eval.f);
        assert!(space.within(&refined.position));
    }
}
