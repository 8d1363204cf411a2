//! Cubic search region and its probe-grid / partition geometry.

use crate::math::{Array3d, Fl, Vec3};
use crate::molecule::Receptor;
use crate::scoring::CUTOFF_SQR;

/// Default edge length of coarse partitions in Angstroms.
pub const DEFAULT_PARTITION_GRANULARITY: Fl = 3.0;

/// An axis-aligned search box with a uniform probe lattice and a coarse
/// partition decomposition for receptor-atom neighbor lookup.
///
/// Containment is half-open: a coordinate exactly on `corner2` is outside.
#[derive(Debug, Clone)]
pub struct SearchBox {
    pub center: Vec3,
    /// Box extents, expanded to the nearest multiple of `grid_granularity`.
    pub span: Vec3,
    pub corner1: Vec3,
    pub corner2: Vec3,
    pub grid_granularity: Fl,
    pub grid_granularity_inverse: Fl,
    pub num_grids: [usize; 3],
    /// `num_grids + 1` lattice vertices per dimension.
    pub num_probes: [usize; 3],
    pub num_partitions: [usize; 3],
    pub partition_size: Vec3,
    pub partition_size_inverse: Vec3,
}

impl SearchBox {
    /// Builds a search box centered at `center`. The requested `size` is
    /// expanded per-axis to the nearest multiple of `grid_granularity`.
    pub fn new(center: Vec3, size: Vec3, grid_granularity: Fl) -> Self {
        let mut num_grids = [0usize; 3];
        let mut num_probes = [0usize; 3];
        let mut num_partitions = [0usize; 3];
        let mut span = Vec3::zeros();
        let mut partition_size = Vec3::zeros();
        let mut partition_size_inverse = Vec3::zeros();

        for d in 0..3 {
            let n = (size[d] / grid_granularity).ceil() as usize;
            num_grids[d] = n.max(1);
            num_probes[d] = num_grids[d] + 1;
            span[d] = num_grids[d] as Fl * grid_granularity;

            let p = (span[d] / DEFAULT_PARTITION_GRANULARITY).ceil() as usize;
            num_partitions[d] = p.max(1);
            partition_size[d] = span[d] / num_partitions[d] as Fl;
            partition_size_inverse[d] = 1.0 / partition_size[d];
        }

        let corner1 = center - span * 0.5;
        let corner2 = corner1 + span;

        Self {
            center,
            span,
            corner1,
            corner2,
            grid_granularity,
            grid_granularity_inverse: 1.0 / grid_granularity,
            num_grids,
            num_probes,
            num_partitions,
            partition_size,
            partition_size_inverse,
        }
    }

    /// True if `coordinate` lies within `[corner1, corner2)`.
    pub fn within(&self, coordinate: &Vec3) -> bool {
        (0..3).all(|d| self.corner1[d] <= coordinate[d] && coordinate[d] < self.corner2[d])
    }

    /// Squared Euclidean shortfall from `coordinate` to the axis-aligned box
    /// `[corner1, corner2]`; zero for points inside.
    pub fn project_distance_sqr_to(corner1: &Vec3, corner2: &Vec3, coordinate: &Vec3) -> Fl {
        let mut sqr = 0.0;
        for d in 0..3 {
            let v = coordinate[d];
            let shortfall = if v < corner1[d] {
                corner1[d] - v
            } else if v > corner2[d] {
                v - corner2[d]
            } else {
                0.0
            };
            sqr += shortfall * shortfall;
        }
        sqr
    }

    /// Squared shortfall from `coordinate` to this box.
    pub fn project_distance_sqr(&self, coordinate: &Vec3) -> Fl {
        Self::project_distance_sqr_to(&self.corner1, &self.corner2, coordinate)
    }

    /// True if `coordinate` is within the scoring cutoff of this box.
    pub fn within_cutoff(&self, coordinate: &Vec3) -> bool {
        self.project_distance_sqr(coordinate) <= CUTOFF_SQR
    }

    /// True if `coordinate` is within the scoring cutoff of the cuboid
    /// `[corner1, corner2]`.
    pub fn within_cutoff_of(corner1: &Vec3, corner2: &Vec3, coordinate: &Vec3) -> bool {
        Self::project_distance_sqr_to(corner1, corner2, coordinate) <= CUTOFF_SQR
    }

    /// Coordinate of corner1 of the grid cell at `index`.
    pub fn grid_corner1(&self, index: [usize; 3]) -> Vec3 {
        Vec3::new(
            self.corner1[0] + self.grid_granularity * index[0] as Fl,
            self.corner1[1] + self.grid_granularity * index[1] as Fl,
            self.corner1[2] + self.grid_granularity * index[2] as Fl,
        )
    }

    /// Coordinate of corner1 of the partition cell at `index`.
    pub fn partition_corner1(&self, index: [usize; 3]) -> Vec3 {
        Vec3::new(
            self.corner1[0] + self.partition_size[0] * index[0] as Fl,
            self.corner1[1] + self.partition_size[1] * index[1] as Fl,
            self.corner1[2] + self.partition_size[2] * index[2] as Fl,
        )
    }

    /// Index of the half-open grid cell containing `coordinate`.
    pub fn grid_index(&self, coordinate: &Vec3) -> [usize; 3] {
        let mut index = [0usize; 3];
        for d in 0..3 {
            index[d] =
                ((coordinate[d] - self.corner1[d]) * self.grid_granularity_inverse) as usize;
        }
        index
    }

    /// Index of the half-open partition cell containing `coordinate`.
    pub fn partition_index(&self, coordinate: &Vec3) -> [usize; 3] {
        let mut index = [0usize; 3];
        for d in 0..3 {
            index[d] =
                ((coordinate[d] - self.corner1[d]) * self.partition_size_inverse[d]) as usize;
        }
        index
    }

    /// Assigns nearby receptor atoms to partitions: first the indices within
    /// cutoff of the box, then for each partition cuboid the subset within
    /// cutoff of that cuboid. Grid-map construction walks only the list of
    /// the partition containing each probe point.
    pub fn build_partitions(&self, receptor: &Receptor) -> Array3d<Vec<usize>> {
        let mut nearby = Vec::with_capacity(receptor.atoms.len());
        for (i, a) in receptor.atoms.iter().enumerate() {
            if self.within_cutoff(&a.coordinate) {
                nearby.push(i);
            }
        }

        let mut partitions: Array3d<Vec<usize>> = Array3d::new(self.num_partitions);
        for x in 0..self.num_partitions[0] {
            for y in 0..self.num_partitions[1] {
                for z in 0..self.num_partitions[2] {
                    let corner1 = self.partition_corner1([x, y, z]);
                    let corner2 = self.partition_corner1([x + 1, y + 1, z + 1]);
                    let cell = partitions.get_mut(x, y, z);
                    cell.reserve(nearby.len());
                    for &i in &nearby {
                        if Self::within_cutoff_of(&corner1, &corner2, &receptor.atoms[i].coordinate)
                        {
                            cell.push(i);
                        }
                    }
                }
            }
        }
        partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Atom, XsType};
    use approx::assert_relative_eq;

    fn unit_box() -> SearchBox {
        SearchBox::new(Vec3::zeros(), Vec3::new(16.0, 16.0, 16.0), 0.5)
    }

    #[test]
    fn span_is_multiple_of_granularity() {
        let b = SearchBox::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(15.9, 16.0, 16.2), 0.5);
        assert_eq!(b.num_grids, [32, 32, 33]);
        assert_eq!(b.num_probes, [33, 33, 34]);
        assert_relative_eq!(b.span[0], 16.0);
        assert_relative_eq!(b.span[2], 16.5);
        // corner1 + corner2 == 2 * center on every axis.
        for d in 0..3 {
            assert_relative_eq!(b.corner1[d] + b.corner2[d], 2.0 * b.center[d], epsilon = 1e-9);
        }
    }

    #[test]
    fn within_is_half_open() {
        let b = unit_box();
        assert!(b.within(&b.corner1));
        assert!(!b.within(&b.corner2));
        assert!(b.within(&Vec3::zeros()));
        assert!(!b.within(&Vec3::new(8.0, 0.0, 0.0)));
    }

    #[test]
    fn grid_index_round_trip() {
        let b = unit_box();
        for idx in [[0, 0, 0], [5, 12, 31], [31, 31, 31]] {
            assert_eq!(b.grid_index(&b.grid_corner1(idx)), idx);
        }
    }

    #[test]
    fn grid_index_in_range_for_contained_points() {
        let b = unit_box();
        for p in [
            Vec3::new(-7.99, -7.99, -7.99),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(7.99, 7.99, 7.99),
        ] {
            assert!(b.within(&p));
            let idx = b.grid_index(&p);
            for d in 0..3 {
                assert!(idx[d] < b.num_grids[d]);
            }
        }
    }

    #[test]
    fn project_distance_is_shortfall() {
        let b = unit_box();
        assert_relative_eq!(b.project_distance_sqr(&Vec3::zeros()), 0.0);
        assert_relative_eq!(b.project_distance_sqr(&Vec3::new(11.0, 0.0, 0.0)), 9.0);
        assert_relative_eq!(b.project_distance_sqr(&Vec3::new(11.0, 12.0, 0.0)), 25.0);
        // Consistency with within_cutoff at the 8 A boundary.
        assert!(b.within_cutoff(&Vec3::new(16.0, 0.0, 0.0)));
        assert!(!b.within_cutoff(&Vec3::new(16.01, 0.0, 0.0)));
    }

    #[test]
    fn partitions_collect_nearby_atoms() {
        let b = unit_box();
        let atoms = vec![
            Atom::new(1, "C1".into(), Vec3::zeros(), XsType::CH),
            Atom::new(2, "C2".into(), Vec3::new(7.0, 7.0, 7.0), XsType::CH),
            // Within cutoff of the box but outside it.
            Atom::new(3, "C3".into(), Vec3::new(12.0, 0.0, 0.0), XsType::CH),
            // Far beyond the cutoff.
            Atom::new(4, "C4".into(), Vec3::new(40.0, 0.0, 0.0), XsType::CH),
        ];
        let receptor = Receptor { atoms };
        let partitions = b.build_partitions(&receptor);
        assert_eq!(partitions.dims(), b.num_partitions);

        let mut seen = vec![false; receptor.atoms.len()];
        for x in 0..b.num_partitions[0] {
            for y in 0..b.num_partitions[1] {
                for z in 0..b.num_partitions[2] {
                    for &i in partitions.get(x, y, z) {
                        seen[i] = true;
                    }
                }
            }
        }
        assert!(seen[0] && seen[1] && seen[2]);
        assert!(!seen[3]);

        // Each cell's list agrees with a brute-force cutoff check.
        for x in 0..b.num_partitions[0] {
            for y in 0..b.num_partitions[1] {
                for z in 0..b.num_partitions[2] {
                    let c1 = b.partition_corner1([x, y, z]);
                    let c2 = b.partition_corner1([x + 1, y + 1, z + 1]);
                    for (i, a) in receptor.atoms.iter().enumerate() {
                        let expect = b.within_cutoff(&a.coordinate)
                            && SearchBox::within_cutoff_of(&c1, &c2, &a.coordinate);
                        assert_eq!(partitions.get(x, y, z).contains(&i), expect);
                    }
                }
            }
        }
    }
}
