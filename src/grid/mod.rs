//! Per-atom-type interaction grid maps and their parallel construction.
//!
//! A grid map caches, at every probe-lattice vertex, the total interaction
//! energy between a fictitious probe atom of one XScore type and all
//! receptor atoms within the scoring cutoff. Map contents depend only on the
//! receptor and the box, so a map is built at most once per atom type and
//! reused across every ligand of a slice.

use crate::atom::{XsType, XS_TYPE_SIZE};
use crate::math::{distance_sqr, Array3d, Fl};
use crate::molecule::Receptor;
use crate::pool::{TaskError, ThreadPool};
use crate::scoring::{ScoringFunction, CUTOFF_SQR};
use crate::space::SearchBox;
use std::sync::Arc;

/// The family of per-atom-type maps. Absence is a first-class state;
/// population is monotone within a job.
#[derive(Clone)]
pub struct GridMaps {
    maps: Vec<Option<Arc<Array3d<Fl>>>>,
}

impl Default for GridMaps {
    fn default() -> Self {
        Self::new()
    }
}

impl GridMaps {
    pub fn new() -> Self {
        Self {
            maps: vec![None; XS_TYPE_SIZE],
        }
    }

    pub fn is_initialized(&self, t: XsType) -> bool {
        self.maps[t.index()].is_some()
    }

    pub fn map(&self, t: XsType) -> Option<&Array3d<Fl>> {
        self.maps[t.index()].as_deref()
    }

    /// Installs a populated map. A map that already exists is left as-is:
    /// contents depend only on the receptor and the box, so the first
    /// population is definitive.
    pub fn insert(&mut self, t: XsType, map: Array3d<Fl>) {
        self.maps[t.index()].get_or_insert_with(|| Arc::new(map));
    }

    /// Atom types from `wanted` that have no map yet.
    pub fn missing(&self, wanted: &[XsType]) -> Vec<XsType> {
        wanted
            .iter()
            .copied()
            .filter(|t| !self.is_initialized(*t))
            .collect()
    }
}

/// Partition index of a probe coordinate, clamped so the probes on the far
/// box face fall into the last partition.
fn probe_partition(space: &SearchBox, p: &crate::math::Vec3) -> [usize; 3] {
    let mut index = space.partition_index(p);
    for d in 0..3 {
        index[d] = index[d].min(space.num_partitions[d] - 1);
    }
    index
}

/// Computes the `(y, z)` plane at probe slab `x` for each requested atom
/// type. Each probe point visits only the receptor atoms of its partition.
/// Returned planes are in `types` order, row-major over `(y, z)`.
pub fn grid_map_slab(
    x: usize,
    types: &[XsType],
    sf: &ScoringFunction,
    space: &SearchBox,
    receptor: &Receptor,
    partitions: &Array3d<Vec<usize>>,
) -> Vec<Vec<Fl>> {
    let ny = space.num_probes[1];
    let nz = space.num_probes[2];
    let mut planes = vec![vec![0.0; ny * nz]; types.len()];

    for y in 0..ny {
        for z in 0..nz {
            let p = space.grid_corner1([x, y, z]);
            let cell = probe_partition(space, &p);
            for &i in partitions.get(cell[0], cell[1], cell[2]) {
                let atom = &receptor.atoms[i];
                let r2 = distance_sqr(&p, &atom.coordinate);
                if r2 >= CUTOFF_SQR {
                    continue;
                }
                for (k, &t) in types.iter().enumerate() {
                    planes[k][y * nz + z] += sf.evaluate(t, atom.xs, r2).0;
                }
            }
        }
    }
    planes
}

/// Populates the maps for `types` by fanning one task per probe slab over
/// the pool. Tasks write disjoint `x` slabs, assembled on the calling thread
/// after every handle is drained; a task failure aborts the whole batch.
pub fn populate(
    maps: &mut GridMaps,
    types: &[XsType],
    pool: &ThreadPool,
    sf: &Arc<ScoringFunction>,
    space: &Arc<SearchBox>,
    receptor: &Arc<Receptor>,
    partitions: &Arc<Array3d<Vec<usize>>>,
) -> Result<(), TaskError> {
    if types.is_empty() {
        return Ok(());
    }

    let nx = space.num_probes[0];
    let shared_types: Arc<Vec<XsType>> = Arc::new(types.to_vec());

    let mut handles = Vec::with_capacity(nx);
    for x in 0..nx {
        let types = Arc::clone(&shared_types);
        let sf = Arc::clone(sf);
        let space = Arc::clone(space);
        let receptor = Arc::clone(receptor);
        let partitions = Arc::clone(partitions);
        handles.push(
            pool.spawn(move || grid_map_slab(x, &types, &sf, &space, &receptor, &partitions)),
        );
    }

    let mut fresh: Vec<Array3d<Fl>> = types
        .iter()
        .map(|_| Array3d::new(space.num_probes))
        .collect();

    // Drain every handle before failing so no task outlives the batch.
    let mut first_error = None;
    for (x, handle) in handles.into_iter().enumerate() {
        match handle.get() {
            Ok(planes) => {
                for (k, plane) in planes.into_iter().enumerate() {
                    fresh[k].slab_mut(x).copy_from_slice(&plane);
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    pool.sync();
    if let Some(e) = first_error {
        return Err(e);
    }

    for (&t, map) in types.iter().zip(fresh) {
        maps.insert(t, map);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use crate::math::Vec3;
    use crate::scoring::CUTOFF;
    use approx::assert_relative_eq;

    fn small_setup(atoms: Vec<Atom>) -> (Arc<ScoringFunction>, Arc<SearchBox>, Arc<Receptor>) {
        let sf = Arc::new(ScoringFunction::precalculate_serial());
        let space = Arc::new(SearchBox::new(Vec3::zeros(), Vec3::new(8.0, 8.0, 8.0), 1.0));
        let receptor = Arc::new(Receptor::new(atoms));
        (sf, space, receptor)
    }

    fn populate_all(
        types: &[XsType],
        sf: &Arc<ScoringFunction>,
        space: &Arc<SearchBox>,
        receptor: &Arc<Receptor>,
    ) -> GridMaps {
        let pool = ThreadPool::new(4);
        let partitions = Arc::new(space.build_partitions(receptor));
        let mut maps = GridMaps::new();
        populate(&mut maps, types, &pool, sf, space, receptor, &partitions).unwrap();
        maps
    }

    #[test]
    fn empty_receptor_yields_zero_maps() {
        let (sf, space, receptor) = small_setup(Vec::new());
        let maps = populate_all(&[XsType::CH, XsType::OA], &sf, &space, &receptor);
        for &t in &[XsType::CH, XsType::OA] {
            let map = maps.map(t).unwrap();
            assert_eq!(map.dims(), space.num_probes);
            assert!(map.as_slice().iter().all(|&e| e == 0.0));
        }
        assert!(!maps.is_initialized(XsType::NA));
    }

    #[test]
    fn map_matches_brute_force_sum() {
        let atoms = vec![
            Atom::new(1, "C".into(), Vec3::new(0.5, -0.25, 1.0), XsType::CH),
            Atom::new(2, "OA".into(), Vec3::new(-2.0, 1.5, 0.0), XsType::OA),
            Atom::new(3, "N".into(), Vec3::new(9.5, 0.0, 0.0), XsType::NP),
        ];
        let (sf, space, receptor) = small_setup(atoms);
        let maps = populate_all(&[XsType::CH], &sf, &space, &receptor);
        let map = maps.map(XsType::CH).unwrap();

        for x in 0..space.num_probes[0] {
            for y in 0..space.num_probes[1] {
                for z in 0..space.num_probes[2] {
                    let p = space.grid_corner1([x, y, z]);
                    let mut expected = 0.0;
                    for atom in &receptor.atoms {
                        let r2 = distance_sqr(&p, &atom.coordinate);
                        if r2 < CUTOFF_SQR {
                            expected += sf.evaluate(XsType::CH, atom.xs, r2).0;
                        }
                    }
                    assert_relative_eq!(*map.get(x, y, z), expected, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn single_atom_at_center_scores_self_pair_at_origin() {
        let sf = Arc::new(ScoringFunction::precalculate_serial());
        let space = Arc::new(SearchBox::new(Vec3::zeros(), Vec3::new(20.0, 20.0, 20.0), 2.0));
        let receptor = Arc::new(Receptor::new(vec![Atom::new(
            1,
            "C".into(),
            Vec3::zeros(),
            XsType::CH,
        )]));
        let maps = populate_all(&[XsType::CH], &sf, &space, &receptor);
        let map = maps.map(XsType::CH).unwrap();

        // The center of the box is a lattice vertex at index num_grids / 2.
        let c = [
            space.num_grids[0] / 2,
            space.num_grids[1] / 2,
            space.num_grids[2] / 2,
        ];
        assert_relative_eq!(
            *map.get(c[0], c[1], c[2]),
            sf.evaluate(XsType::CH, XsType::CH, 0.0).0,
            epsilon = 1e-12
        );

        // The box corner is farther than the cutoff and scores exactly zero.
        let corner = space.grid_corner1([0, 0, 0]);
        assert!(distance_sqr(&corner, &Vec3::zeros()) >= CUTOFF * CUTOFF);
        assert_eq!(*map.get(0, 0, 0), 0.0);
    }

    #[test]
    fn repopulation_is_a_no_op() {
        let atoms = vec![Atom::new(1, "C".into(), Vec3::zeros(), XsType::CH)];
        let (sf, space, receptor) = small_setup(atoms);
        let mut maps = populate_all(&[XsType::CH], &sf, &space, &receptor);
        let before: Vec<Fl> = maps.map(XsType::CH).unwrap().as_slice().to_vec();

        // Populate again against a different receptor; the map must not move.
        let other = Arc::new(Receptor::new(vec![Atom::new(
            9,
            "OA".into(),
            Vec3::new(1.0, 1.0, 1.0),
            XsType::OA,
        )]));
        let pool = ThreadPool::new(2);
        let partitions = Arc::new(space.build_partitions(&other));
        populate(
            &mut maps,
            &[XsType::CH],
            &pool,
            &sf,
            &space,
            &other,
            &partitions,
        )
        .unwrap();
        assert_eq!(maps.map(XsType::CH).unwrap().as_slice(), &before[..]);
    }

    #[test]
    fn missing_reports_uninitialized_types() {
        let (sf, space, receptor) = small_setup(Vec::new());
        let maps = populate_all(&[XsType::CH], &sf, &space, &receptor);
        assert_eq!(
            maps.missing(&[XsType::CH, XsType::NA, XsType::OA]),
            vec![XsType::NA, XsType::OA]
        );
    }
}
