//! Flexible ligand: torsion tree, conformations and energy evaluation.

use crate::atom::{Atom, XsType};
use crate::grid::GridMaps;
use crate::math::{rotation_vector_to_quaternion, Fl, Vec3};
use crate::scoring::{ScoringFunction, CUTOFF_SQR};
use crate::space::SearchBox;
use nalgebra::{Unit, UnitQuaternion};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LigandError {
    #[error("ligand has no heavy atoms")]
    NoHeavyAtoms,

    #[error("frame {0} references atom index {1} out of range")]
    AtomIndexOutOfRange(usize, usize),

    #[error("frame {0} must come after its parent {1}")]
    FrameOrder(usize, usize),
}

/// A rigid group of atoms connected to its parent by one rotatable bond.
///
/// The frame origin is the `rotor_y` atom; its position is invariant under
/// the frame's own torsion. Zero torsion reproduces the input geometry.
#[derive(Debug, Clone)]
pub struct Frame {
    pub parent: Option<usize>,

    /// Atom index at the fixed end of the rotatable bond (in the parent).
    pub rotor_x: usize,

    /// Atom index at the moving end; the frame origin.
    pub rotor_y: usize,

    /// Indices of the atoms owned by this frame.
    pub atoms: Vec<usize>,

    /// Frame origin relative to the parent origin in the input pose.
    parent_origin_to_origin: Vec3,
}

/// Construction-time description of a frame, produced by the parser.
#[derive(Debug, Clone)]
pub struct FrameSpec {
    pub parent: Option<usize>,
    pub rotor_x: usize,
    pub rotor_y: usize,
    pub atoms: Vec<usize>,
}

/// Pose degrees of freedom: rigid position and orientation plus one angle
/// per rotatable bond.
#[derive(Debug, Clone)]
pub struct Conformation {
    pub position: Vec3,
    pub orientation: UnitQuaternion<Fl>,
    pub torsions: Vec<Fl>,
}

impl Conformation {
    pub fn num_dofs(&self) -> usize {
        6 + self.torsions.len()
    }

    /// The conformation displaced by `alpha * direction`, where `direction`
    /// packs translation, a rotation vector and torsion deltas.
    pub fn step(&self, direction: &[Fl], alpha: Fl) -> Conformation {
        debug_assert_eq!(direction.len(), self.num_dofs());
        let position = self.position
            + alpha * Vec3::new(direction[0], direction[1], direction[2]);
        let rotation = alpha * Vec3::new(direction[3], direction[4], direction[5]);
        let orientation = rotation_vector_to_quaternion(&rotation) * self.orientation;
        let torsions = self
            .torsions
            .iter()
            .enumerate()
            .map(|(i, t)| t + alpha * direction[6 + i])
            .collect();
        Conformation {
            position,
            orientation,
            torsions,
        }
    }
}

/// Outcome of one energy evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Total energy: receptor interaction plus intra-ligand pairs.
    pub f: Fl,

    /// Analytic gradient over the `6 + num_torsions` degrees of freedom.
    pub gradient: Vec<Fl>,

    /// World positions of the heavy atoms.
    pub positions: Vec<Vec3>,

    /// Accumulated force on each frame, root first.
    pub frame_forces: Vec<Vec3>,
}

struct FramePose {
    origin: Vec3,
    orientation: UnitQuaternion<Fl>,
    /// Unit rotation axis in world coordinates; zero for the root.
    axis: Vec3,
}

/// A flexible ligand as a rooted tree of rigid frames.
#[derive(Debug, Clone)]
pub struct Ligand {
    pub atoms: Vec<Atom>,
    pub frames: Vec<Frame>,

    /// Atom coordinates relative to their frame origin in the input pose.
    local: Vec<Vec3>,

    /// Heavy-atom pairs separated by more than three covalent bonds,
    /// scored as intra-ligand interactions.
    pub interacting_pairs: Vec<(usize, usize)>,

    pub num_heavy_atoms: usize,
    pub num_torsions: usize,
    pub flexibility_penalty_factor: Fl,
}

impl Ligand {
    /// Builds a ligand from parsed atoms and the branch tree. Frames must be
    /// listed parents-first with the root at index 0.
    pub fn assemble(atoms: Vec<Atom>, specs: Vec<FrameSpec>) -> Result<Ligand, LigandError> {
        if atoms.is_empty() || specs.is_empty() || specs[0].atoms.is_empty() {
            return Err(LigandError::NoHeavyAtoms);
        }
        for (i, spec) in specs.iter().enumerate() {
            if let Some(p) = spec.parent {
                if p >= i {
                    return Err(LigandError::FrameOrder(i, p));
                }
            }
            for &a in spec.atoms.iter().chain([&spec.rotor_x, &spec.rotor_y]) {
                if a >= atoms.len() {
                    return Err(LigandError::AtomIndexOutOfRange(i, a));
                }
            }
        }

        // Input-pose frame origins: the rotor_y atom, or the first root atom.
        let origins: Vec<Vec3> = specs
            .iter()
            .enumerate()
            .map(|(i, s)| {
                if i == 0 {
                    atoms[s.atoms[0]].coordinate
                } else {
                    atoms[s.rotor_y].coordinate
                }
            })
            .collect();

        let mut local = vec![Vec3::zeros(); atoms.len()];
        for (i, spec) in specs.iter().enumerate() {
            for &a in &spec.atoms {
                local[a] = atoms[a].coordinate - origins[i];
            }
        }

        let frames: Vec<Frame> = specs
            .iter()
            .enumerate()
            .map(|(i, s)| Frame {
                parent: s.parent,
                rotor_x: s.rotor_x,
                rotor_y: s.rotor_y,
                atoms: s.atoms.clone(),
                parent_origin_to_origin: match s.parent {
                    Some(p) => origins[i] - origins[p],
                    None => Vec3::zeros(),
                },
            })
            .collect();

        let interacting_pairs = Self::find_interacting_pairs(&atoms, &frames);
        let num_heavy_atoms = atoms.len();
        let num_torsions = frames.len() - 1;

        Ok(Ligand {
            atoms,
            frames,
            local,
            interacting_pairs,
            num_heavy_atoms,
            num_torsions,
            flexibility_penalty_factor: super::flexibility_penalty_factor(num_torsions),
        })
    }

    /// Heavy-atom pairs separated by more than three bonds in the covalent
    /// graph (rotatable bonds included).
    fn find_interacting_pairs(atoms: &[Atom], frames: &[Frame]) -> Vec<(usize, usize)> {
        let n = atoms.len();
        let mut adjacency = vec![Vec::new(); n];
        for i in 0..n {
            for j in i + 1..n {
                if super::is_covalent_neighbor(&atoms[i], &atoms[j]) {
                    adjacency[i].push(j);
                    adjacency[j].push(i);
                }
            }
        }
        // Geometry can miss a stretched rotor bond; the tree knows better.
        for frame in frames.iter().skip(1) {
            if !adjacency[frame.rotor_x].contains(&frame.rotor_y) {
                adjacency[frame.rotor_x].push(frame.rotor_y);
                adjacency[frame.rotor_y].push(frame.rotor_x);
            }
        }

        let mut pairs = Vec::new();
        for i in 0..n {
            let dist = super::bond_distances(&adjacency, i);
            for j in i + 1..n {
                if dist[j] > 3 {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }

    /// Distinct XScore types appearing in the ligand, in table order.
    pub fn xs_types(&self) -> Vec<XsType> {
        let set: BTreeSet<XsType> = self.atoms.iter().map(|a| a.xs).collect();
        set.into_iter().collect()
    }

    fn poses(&self, conf: &Conformation) -> (Vec<FramePose>, Vec<Vec3>) {
        debug_assert_eq!(conf.torsions.len(), self.num_torsions);
        let mut poses: Vec<FramePose> = Vec::with_capacity(self.frames.len());
        let mut positions = vec![Vec3::zeros(); self.atoms.len()];

        for (i, frame) in self.frames.iter().enumerate() {
            let pose = match frame.parent {
                None => FramePose {
                    origin: conf.position,
                    orientation: conf.orientation,
                    axis: Vec3::zeros(),
                },
                Some(p) => {
                    let parent = &poses[p];
                    let origin = parent.origin
                        + parent
                            .orientation
                            .transform_vector(&frame.parent_origin_to_origin);
                    // rotor_x belongs to the parent and is already placed.
                    let axis = Unit::new_normalize(origin - positions[frame.rotor_x]);
                    let orientation =
                        UnitQuaternion::from_axis_angle(&axis, conf.torsions[i - 1])
                            * parent.orientation;
                    FramePose {
                        origin,
                        orientation,
                        axis: axis.into_inner(),
                    }
                }
            };
            for &a in &frame.atoms {
                positions[a] = pose.origin + pose.orientation.transform_vector(&self.local[a]);
            }
            poses.push(pose);
        }
        (poses, positions)
    }

    /// World heavy-atom positions for a conformation.
    pub fn positions(&self, conf: &Conformation) -> Vec<Vec3> {
        self.poses(conf).1
    }

    /// Total energy and analytic gradient of a conformation.
    ///
    /// Returns `None` when any heavy atom leaves the search box (the step is
    /// treated as having infinite energy) or when the accumulating energy
    /// exceeds `e_upper_bound`. Never panics on the hot path.
    pub fn evaluate(
        &self,
        conf: &Conformation,
        sf: &ScoringFunction,
        space: &SearchBox,
        maps: &GridMaps,
        e_upper_bound: Fl,
    ) -> Option<Evaluation> {
        let (poses, positions) = self.poses(conf);
        let mut atom_gradients = vec![Vec3::zeros(); self.atoms.len()];
        let mut f = 0.0;

        // Receptor interaction via trilinear interpolation on the type map.
        for (a, atom) in self.atoms.iter().enumerate() {
            let p = &positions[a];
            if !space.within(p) {
                return None;
            }
            let map = maps.map(atom.xs)?;

            let s = (p - space.corner1) * space.grid_granularity_inverse;
            // Containment bounds the cell index, but a coordinate a rounding
            // error away from corner2 can still land one cell past the end.
            let x0 = (s.x as usize).min(space.num_grids[0] - 1);
            let y0 = (s.y as usize).min(space.num_grids[1] - 1);
            let z0 = (s.z as usize).min(space.num_grids[2] - 1);
            let fx = s.x - x0 as Fl;
            let fy = s.y - y0 as Fl;
            let fz = s.z - z0 as Fl;

            let e000 = *map.get(x0, y0, z0);
            let e001 = *map.get(x0, y0, z0 + 1);
            let e010 = *map.get(x0, y0 + 1, z0);
            let e011 = *map.get(x0, y0 + 1, z0 + 1);
            let e100 = *map.get(x0 + 1, y0, z0);
            let e101 = *map.get(x0 + 1, y0, z0 + 1);
            let e110 = *map.get(x0 + 1, y0 + 1, z0);
            let e111 = *map.get(x0 + 1, y0 + 1, z0 + 1);

            let e00 = e000 + fz * (e001 - e000);
            let e01 = e010 + fz * (e011 - e010);
            let e10 = e100 + fz * (e101 - e100);
            let e11 = e110 + fz * (e111 - e110);
            let e0 = e00 + fy * (e01 - e00);
            let e1 = e10 + fy * (e11 - e10);
            f += e0 + fx * (e1 - e0);

            // Gradient of the interpolant, scaled back to Cartesian space.
            let dedfx = e1 - e0;
            let dy0 = e01 - e00;
            let dy1 = e11 - e10;
            let dedfy = dy0 + fx * (dy1 - dy0);
            let dz00 = e001 - e000;
            let dz01 = e011 - e010;
            let dz10 = e101 - e100;
            let dz11 = e111 - e110;
            let dz0 = dz00 + fy * (dz01 - dz00);
            let dz1 = dz10 + fy * (dz11 - dz10);
            let dedfz = dz0 + fx * (dz1 - dz0);

            atom_gradients[a] +=
                Vec3::new(dedfx, dedfy, dedfz) * space.grid_granularity_inverse;

            if f > e_upper_bound {
                return None;
            }
        }

        // Intra-ligand pairs.
        for &(i, j) in &self.interacting_pairs {
            let d = positions[i] - positions[j];
            let r2 = d.norm_squared();
            if r2 < CUTOFF_SQR {
                let (e, de) = sf.evaluate(self.atoms[i].xs, self.atoms[j].xs, r2);
                f += e;
                let g = d * (2.0 * de);
                atom_gradients[i] += g;
                atom_gradients[j] -= g;
            }
        }
        if f > e_upper_bound {
            return None;
        }

        // Fold per-atom gradients into per-frame force and torque, leaves
        // first, then project onto the degrees of freedom.
        let nf = self.frames.len();
        let mut force = vec![Vec3::zeros(); nf];
        let mut torque = vec![Vec3::zeros(); nf];
        for i in (0..nf).rev() {
            let frame = &self.frames[i];
            for &a in &frame.atoms {
                force[i] += atom_gradients[a];
                torque[i] += (positions[a] - poses[i].origin).cross(&atom_gradients[a]);
            }
            if let Some(p) = frame.parent {
                let child_force = force[i];
                let child_torque = torque[i];
                force[p] += child_force;
                torque[p] +=
                    child_torque + (poses[i].origin - poses[p].origin).cross(&child_force);
            }
        }

        let mut gradient = vec![0.0; 6 + self.num_torsions];
        gradient[..3].copy_from_slice(force[0].as_slice());
        gradient[3..6].copy_from_slice(torque[0].as_slice());
        for i in 1..nf {
            gradient[5 + i] = poses[i].axis.dot(&torque[i]);
        }

        Some(Evaluation {
            f,
            gradient,
            positions,
            frame_forces: force,
        })
    }
}

/// Sum of squared per-atom displacements between two position sets.
pub fn square_error(a: &[Vec3], b: &[Vec3]) -> Fl {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| (p - q).norm_squared())
        .sum()
}
