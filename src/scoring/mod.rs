//! Precalculated pairwise scoring function.
//!
//! The continuous scoring terms (two attractive gaussians, quadratic
//! repulsion, piecewise-linear hydrophobic and hydrogen-bond contributions
//! over XScore van der Waals radii) are sampled over squared distance once at
//! startup into a symmetric table indexed by unordered atom-type pair. The
//! hot paths then reduce to an integer lookup returning the energy and its
//! derivative with respect to squared distance.

use crate::atom::{XsType, XS_TYPE_SIZE};
use crate::math::Fl;
use crate::pool::{TaskError, ThreadPool};
use std::sync::Arc;

/// Interaction cutoff distance in Angstroms.
pub const CUTOFF: Fl = 8.0;
pub const CUTOFF_SQR: Fl = CUTOFF * CUTOFF;

/// Number of squared-distance samples on `[0, CUTOFF_SQR]`.
pub const NUM_SAMPLES: usize = 2048;

/// Samples per unit of squared distance.
pub const FACTOR: Fl = NUM_SAMPLES as Fl / CUTOFF_SQR;
pub const FACTOR_INVERSE: Fl = CUTOFF_SQR / NUM_SAMPLES as Fl;

const NUM_PAIRS: usize = XS_TYPE_SIZE * (XS_TYPE_SIZE + 1) / 2;

// Published weights of the scoring terms.
const WEIGHT_GAUSS1: Fl = -0.035579;
const WEIGHT_GAUSS2: Fl = -0.005156;
const WEIGHT_REPULSION: Fl = 0.840245;
const WEIGHT_HYDROPHOBIC: Fl = -0.035069;
const WEIGHT_HBOND: Fl = -0.587439;

/// One sampled point: energy and its derivative over squared distance.
/// Consumers reconstruct linearly from the stored derivative.
pub type Sample = (Fl, Fl);

/// Symmetric table of sampled pair potentials.
pub struct ScoringFunction {
    entries: Vec<Vec<Sample>>,
}

impl ScoringFunction {
    /// Index of the unordered pair `{t1, t2}` in triangular storage.
    #[inline]
    fn pair_index(t1: XsType, t2: XsType) -> usize {
        let (lo, hi) = if t1.index() <= t2.index() {
            (t1.index(), t2.index())
        } else {
            (t2.index(), t1.index())
        };
        hi * (hi + 1) / 2 + lo
    }

    /// The sampled radii: `rs[i] = sqrt(i / FACTOR)`, so `rs[0] = 0` and
    /// `rs[NUM_SAMPLES] = CUTOFF`.
    pub fn sample_radii() -> Vec<Fl> {
        (0..=NUM_SAMPLES)
            .map(|i| (i as Fl * FACTOR_INVERSE).sqrt())
            .collect()
    }

    /// Continuous scoring terms for a type pair at distance `r`.
    pub fn score(t1: XsType, t2: XsType, r: Fl) -> Fl {
        let d = r - (t1.radius() + t2.radius());

        let gauss1 = (-(d / 0.5) * (d / 0.5)).exp();
        let offset = (d - 3.0) / 2.0;
        let gauss2 = (-offset * offset).exp();
        let repulsion = if d < 0.0 { d * d } else { 0.0 };

        let hydrophobic = if t1.is_hydrophobic() && t2.is_hydrophobic() {
            if d <= 0.5 {
                1.0
            } else if d >= 1.5 {
                0.0
            } else {
                1.5 - d
            }
        } else {
            0.0
        };

        let hbond = if XsType::is_hbond_pair(t1, t2) {
            if d <= -0.7 {
                1.0
            } else if d >= 0.0 {
                0.0
            } else {
                d * (-1.0 / 0.7)
            }
        } else {
            0.0
        };

        WEIGHT_GAUSS1 * gauss1
            + WEIGHT_GAUSS2 * gauss2
            + WEIGHT_REPULSION * repulsion
            + WEIGHT_HYDROPHOBIC * hydrophobic
            + WEIGHT_HBOND * hbond
    }

    /// Samples the entry for one unordered pair. `rs` must come from
    /// [`sample_radii`]. The derivative of sample `i` is the forward
    /// difference to sample `i + 1` over squared distance; the final sample
    /// is pinned to zero so the cutoff boundary is exact.
    pub fn pair_entry(t1: XsType, t2: XsType, rs: &[Fl]) -> Vec<Sample> {
        let mut e = vec![0.0; NUM_SAMPLES];
        for (i, value) in e.iter_mut().enumerate().take(NUM_SAMPLES - 1) {
            *value = Self::score(t1, t2, rs[i]);
        }
        e[NUM_SAMPLES - 1] = 0.0;

        let mut entry = Vec::with_capacity(NUM_SAMPLES);
        for i in 0..NUM_SAMPLES - 1 {
            entry.push((e[i], (e[i + 1] - e[i]) * FACTOR));
        }
        entry.push((0.0, 0.0));
        entry
    }

    /// Precalculates all pair entries in parallel over the thread pool. The
    /// tasks are independent and commute; the table is immutable afterwards.
    pub fn precalculate(pool: &ThreadPool) -> Result<Self, TaskError> {
        let rs = Arc::new(Self::sample_radii());

        let mut handles = Vec::with_capacity(NUM_PAIRS);
        for i1 in 0..XS_TYPE_SIZE {
            for i2 in i1..XS_TYPE_SIZE {
                let rs = Arc::clone(&rs);
                let t1 = XsType::ALL[i1];
                let t2 = XsType::ALL[i2];
                handles.push(pool.spawn(move || {
                    (Self::pair_index(t1, t2), Self::pair_entry(t1, t2, &rs))
                }));
            }
        }

        let mut entries = vec![Vec::new(); NUM_PAIRS];
        for handle in handles {
            let (index, entry) = handle.get()?;
            entries[index] = entry;
        }
        pool.sync();

        Ok(Self { entries })
    }

    /// Serial construction, used by tests and benches.
    pub fn precalculate_serial() -> Self {
        let rs = Self::sample_radii();
        let mut entries = vec![Vec::new(); NUM_PAIRS];
        for i1 in 0..XS_TYPE_SIZE {
            for i2 in i1..XS_TYPE_SIZE {
                let t1 = XsType::ALL[i1];
                let t2 = XsType::ALL[i2];
                entries[Self::pair_index(t1, t2)] = Self::pair_entry(t1, t2, &rs);
            }
        }
        Self { entries }
    }

    /// Looks up the sampled energy and derivative for a squared distance
    /// below the cutoff.
    #[inline]
    pub fn evaluate(&self, t1: XsType, t2: XsType, r2: Fl) -> Sample {
        debug_assert!(r2 >= 0.0);
        let index = ((r2 * FACTOR) as usize).min(NUM_SAMPLES - 1);
        self.entries[Self::pair_index(t1, t2)][index]
    }
}
