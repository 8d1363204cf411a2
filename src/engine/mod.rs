//! The worker engine: owns the thread pool, the scoring table and the
//! process RNG, and runs claimed library slices end to end.

use crate::grid::{self, GridMaps};
use crate::io::library::LigandLibrary;
use crate::io::{parse_ligand, parse_receptor, IoError, SliceCsv};
use crate::job::{slice_range, JobDocument};
use crate::math::{Fl, Vec3};
use crate::molecule::Receptor;
use crate::optimization::monte_carlo::{monte_carlo_task, McParams};
use crate::optimization::{
    add_to_result_container, alpha_schedule, DockingResult, NUM_ALPHAS,
};
use crate::pool::{TaskError, ThreadPool};
use crate::scoring::ScoringFunction;
use crate::space::SearchBox;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use thiserror::Error;

/// Probe lattice spacing in Angstroms.
pub const GRID_GRANULARITY: Fl = 0.08;

/// Independent Monte Carlo searches per ligand.
pub const NUM_MC_TASKS: usize = 32;

/// Cap on clustered conformations retained per ligand after the merge.
pub const MAX_CONFORMATIONS: usize = 100;

/// Conformations worse than the best by more than this are discarded.
pub const ENERGY_RANGE: Fl = 3.0;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("scoring function precalculation failed: {0}")]
    Precalculate(TaskError),

    #[error("failed to parse receptor: {0}")]
    Receptor(IoError),

    #[error("job names unknown slice {0}")]
    UnknownSlice(usize),

    #[error("ligand library access failed: {0}")]
    Library(IoError),

    #[error("grid map construction failed: {0}")]
    GridMap(TaskError),

    #[error("Monte Carlo task failed: {0}")]
    MonteCarlo(TaskError),

    #[error("failed to write slice output: {0}")]
    Output(IoError),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub grid_granularity: Fl,
    pub num_mc_tasks: usize,
    pub max_conformations: usize,
    pub energy_range: Fl,
    pub mc: McParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid_granularity: GRID_GRANULARITY,
            num_mc_tasks: NUM_MC_TASKS,
            max_conformations: MAX_CONFORMATIONS,
            energy_range: ENERGY_RANGE,
            mc: McParams::default(),
        }
    }
}

/// Counters reported after a slice finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceSummary {
    /// Ligands in the slice range that exist in the library.
    pub considered: usize,
    /// Ligands passing the descriptor filters and parsing cleanly.
    pub docked: usize,
    /// Rows written to the slice CSV.
    pub emitted: usize,
}

/// Owns the resources shared by all tasks of this worker process.
pub struct Engine {
    pool: ThreadPool,
    sf: Arc<ScoringFunction>,
    alphas: [Fl; NUM_ALPHAS],
    rng: StdRng,
    config: EngineConfig,
}

impl Engine {
    /// Builds the engine: spins up the pool and precalculates the scoring
    /// table in parallel across it.
    pub fn new(config: EngineConfig, num_threads: usize, seed: u64) -> Result<Self, EngineError> {
        let pool = ThreadPool::new(num_threads);
        info!(
            "precalculating scoring function over {} worker threads",
            pool.num_threads()
        );
        let sf = Arc::new(ScoringFunction::precalculate(&pool).map_err(EngineError::Precalculate)?);
        Ok(Self {
            pool,
            sf,
            alphas: alpha_schedule(),
            rng: StdRng::seed_from_u64(seed),
            config,
        })
    }

    /// Screens one claimed slice: builds the search geometry, then docks
    /// every ligand of the slice that passes the job's descriptor filters,
    /// appending the best adjusted energy per ligand to `csv`.
    pub fn run_slice(
        &mut self,
        job: &JobDocument,
        library: &mut LigandLibrary,
        csv: &mut SliceCsv,
    ) -> Result<SliceSummary, EngineError> {
        let space = Arc::new(SearchBox::new(
            Vec3::new(job.center_x, job.center_y, job.center_z),
            Vec3::new(job.size_x, job.size_y, job.size_z),
            self.config.grid_granularity,
        ));

        info!("parsing receptor for job {}", job.id);
        let receptor: Arc<Receptor> =
            Arc::new(parse_receptor(&job.receptor).map_err(EngineError::Receptor)?);
        let partitions = Arc::new(space.build_partitions(&receptor));

        let (start, end) =
            slice_range(job.slice).ok_or(EngineError::UnknownSlice(job.slice))?;
        let end = (end as u64).min(library.num_ligands());
        let start = (start as u64).min(end);
        let filters = job.filters();

        info!(
            "running {} Monte Carlo tasks per ligand over ligands {start}..{end}",
            self.config.num_mc_tasks
        );

        let mut grid_maps = GridMaps::new();
        let mut summary = SliceSummary::default();

        for i in start..end {
            summary.considered += 1;

            let offset = library.offset(i).map_err(EngineError::Library)?;
            let Some(descriptor) = library.descriptor(offset).map_err(EngineError::Library)?
            else {
                // Unreadable descriptor fields count as a filter miss.
                continue;
            };
            if !filters.accept(&descriptor) {
                continue;
            }

            let record = library.record_body().map_err(EngineError::Library)?;
            let lig = match parse_ligand(&record) {
                Ok(lig) => Arc::new(lig),
                Err(e) => {
                    warn!("skipping malformed ligand {}: {e}", descriptor.id);
                    continue;
                }
            };
            summary.docked += 1;

            // Lazily build the maps this ligand's atom types still miss.
            let missing = grid_maps.missing(&lig.xs_types());
            if !missing.is_empty() {
                debug!(
                    "creating {} grid map{} for {}",
                    missing.len(),
                    if missing.len() == 1 { "" } else { "s" },
                    descriptor.id
                );
                grid::populate(
                    &mut grid_maps,
                    &missing,
                    &self.pool,
                    &self.sf,
                    &space,
                    &receptor,
                    &partitions,
                )
                .map_err(EngineError::GridMap)?;
            }

            let mut results = self.dock(&lig, &space, &grid_maps)?;
            if results.is_empty() {
                continue;
            }

            // Adjust the best free energy for ligand flexibility.
            let best = &mut results[0];
            best.e_nd = best.f * lig.flexibility_penalty_factor;
            csv.write_row(&descriptor.id, best.e_nd)
                .map_err(EngineError::Output)?;
            summary.emitted += 1;
        }

        info!(
            "slice {} done: {} considered, {} docked, {} emitted",
            job.slice, summary.considered, summary.docked, summary.emitted
        );
        Ok(summary)
    }

    /// Fans out the per-ligand Monte Carlo tasks and merges their result
    /// lists in task order into one clustered, sorted, bounded list.
    fn dock(
        &mut self,
        lig: &Arc<crate::molecule::Ligand>,
        space: &Arc<SearchBox>,
        grid_maps: &GridMaps,
    ) -> Result<Vec<DockingResult>, EngineError> {
        let mut handles = Vec::with_capacity(self.config.num_mc_tasks);
        for _ in 0..self.config.num_mc_tasks {
            let seed: u64 = self.rng.gen();
            let lig = Arc::clone(lig);
            let params = self.config.mc.clone();
            let alphas = self.alphas;
            let sf = Arc::clone(&self.sf);
            let space = Arc::clone(space);
            let maps = grid_maps.clone();
            handles.push(self.pool.spawn(move || {
                monte_carlo_task(&lig, seed, &params, &alphas, &sf, &space, &maps)
            }));
        }

        let required_square_error = 4.0 * lig.num_heavy_atoms as Fl;
        let mut merged: Vec<DockingResult> = Vec::with_capacity(self.config.max_conformations);
        let mut first_error = None;
        for handle in handles {
            match handle.get() {
                Ok(task_results) => {
                    for r in task_results {
                        add_to_result_container(
                            &mut merged,
                            r,
                            required_square_error,
                            self.config.max_conformations,
                        );
                    }
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        self.pool.sync();
        if let Some(e) = first_error {
            return Err(EngineError::MonteCarlo(e));
        }

        if let Some(best_f) = merged.first().map(|r| r.f) {
            let cutoff = best_f + self.config.energy_range;
            merged.retain(|r| r.f <= cutoff);
        }
        Ok(merged)
    }
}
