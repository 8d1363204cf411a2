//! Job documents, the claim protocol and the library slice table.

use crate::math::Fl;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Ascending ligand-index boundaries partitioning the screening library.
/// Slice `s` covers `[SLICES[s], SLICES[s + 1])`.
pub const SLICES: [usize; 101] = [
    0, 121712, 243424, 365136, 486848, 608560, 730272, 851984,
    973696, 1095408, 1217120, 1338832, 1460544, 1582256, 1703968, 1825680,
    1947392, 2069104, 2190816, 2312528, 2434240, 2555952, 2677664, 2799376,
    2921088, 3042800, 3164512, 3286224, 3407936, 3529648, 3651360, 3773072,
    3894784, 4016496, 4138208, 4259920, 4381632, 4503344, 4625056, 4746768,
    4868480, 4990192, 5111904, 5233616, 5355328, 5477040, 5598752, 5720464,
    5842176, 5963888, 6085600, 6207312, 6329024, 6450736, 6572448, 6694160,
    6815872, 6937584, 7059296, 7181008, 7302720, 7424432, 7546144, 7667856,
    7789568, 7911280, 8032992, 8154704, 8276416, 8398128, 8519840, 8641552,
    8763264, 8884976, 9006688, 9128400, 9250112, 9371824, 9493536, 9615248,
    9736960, 9858672, 9980384, 10102096, 10223808, 10345520, 10467232, 10588944,
    10710655, 10832366, 10954077, 11075788, 11197499, 11319210, 11440921, 11562632,
    11684343, 11806054, 11927765, 12049476, 12171187,
];

pub const NUM_SLICES: usize = SLICES.len() - 1;

/// Ligand index range of a slice, or `None` for an out-of-range slice id.
pub fn slice_range(s: usize) -> Option<(usize, usize)> {
    if s < NUM_SLICES {
        Some((SLICES[s], SLICES[s + 1]))
    } else {
        None
    }
}

// Default filter bounds applied when a job document leaves them out.
const DEFAULT_MWT: (Fl, Fl) = (400.0, 500.0);
const DEFAULT_LOGP: (Fl, Fl) = (-1.0, 6.0);
const DEFAULT_AD: (Fl, Fl) = (-50.0, 50.0);
const DEFAULT_PD: (Fl, Fl) = (-150.0, 0.0);
const DEFAULT_HBD: (u32, u32) = (1, 6);
const DEFAULT_HBA: (u32, u32) = (1, 10);
const DEFAULT_TPSA: (u32, u32) = (20, 80);
const DEFAULT_CHARGE: (i64, i64) = (0, 0);
const DEFAULT_NRB: (u32, u32) = (2, 9);

/// A screening job as stored in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDocument {
    #[serde(rename = "_id")]
    pub id: String,

    /// Library slice assigned to this job.
    pub slice: usize,

    /// Claim counter; zero means unclaimed.
    #[serde(default)]
    pub progress: u32,

    /// Receptor structure as PDBQT text.
    pub receptor: String,

    pub center_x: Fl,
    pub center_y: Fl,
    pub center_z: Fl,
    pub size_x: Fl,
    pub size_y: Fl,
    pub size_z: Fl,

    pub mwt_lb: Option<Fl>,
    pub mwt_ub: Option<Fl>,
    pub logp_lb: Option<Fl>,
    pub logp_ub: Option<Fl>,
    pub ad_lb: Option<Fl>,
    pub ad_ub: Option<Fl>,
    pub pd_lb: Option<Fl>,
    pub pd_ub: Option<Fl>,
    pub hbd_lb: Option<u32>,
    pub hbd_ub: Option<u32>,
    pub hba_lb: Option<u32>,
    pub hba_ub: Option<u32>,
    pub tpsa_lb: Option<u32>,
    pub tpsa_ub: Option<u32>,
    pub charge_lb: Option<i64>,
    pub charge_ub: Option<i64>,
    pub nrb_lb: Option<u32>,
    pub nrb_ub: Option<u32>,

    #[serde(default)]
    pub email: Option<String>,

    /// Unix timestamp of the last claim or heartbeat.
    #[serde(default)]
    pub claimed_at: Option<u64>,

    #[serde(default)]
    pub completed: bool,
}

/// Inclusive descriptor bounds with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Filters {
    pub mwt: (Fl, Fl),
    pub logp: (Fl, Fl),
    pub ad: (Fl, Fl),
    pub pd: (Fl, Fl),
    pub hbd: (u32, u32),
    pub hba: (u32, u32),
    pub tpsa: (u32, u32),
    pub charge: (i64, i64),
    pub nrb: (u32, u32),
}

impl Filters {
    pub fn accept(&self, d: &crate::io::library::Descriptor) -> bool {
        let within_fl = |v: Fl, (lb, ub): (Fl, Fl)| lb <= v && v <= ub;
        within_fl(d.mwt, self.mwt)
            && within_fl(d.logp, self.logp)
            && within_fl(d.ad, self.ad)
            && within_fl(d.pd, self.pd)
            && self.hbd.0 <= d.hbd
            && d.hbd <= self.hbd.1
            && self.hba.0 <= d.hba
            && d.hba <= self.hba.1
            && self.tpsa.0 <= d.tpsa
            && d.tpsa <= self.tpsa.1
            && self.charge.0 <= d.charge
            && d.charge <= self.charge.1
            && self.nrb.0 <= d.nrb
            && d.nrb <= self.nrb.1
    }
}

impl JobDocument {
    pub fn filters(&self) -> Filters {
        Filters {
            mwt: (
                self.mwt_lb.unwrap_or(DEFAULT_MWT.0),
                self.mwt_ub.unwrap_or(DEFAULT_MWT.1),
            ),
            logp: (
                self.logp_lb.unwrap_or(DEFAULT_LOGP.0),
                self.logp_ub.unwrap_or(DEFAULT_LOGP.1),
            ),
            ad: (
                self.ad_lb.unwrap_or(DEFAULT_AD.0),
                self.ad_ub.unwrap_or(DEFAULT_AD.1),
            ),
            pd: (
                self.pd_lb.unwrap_or(DEFAULT_PD.0),
                self.pd_ub.unwrap_or(DEFAULT_PD.1),
            ),
            hbd: (
                self.hbd_lb.unwrap_or(DEFAULT_HBD.0),
                self.hbd_ub.unwrap_or(DEFAULT_HBD.1),
            ),
            hba: (
                self.hba_lb.unwrap_or(DEFAULT_HBA.0),
                self.hba_ub.unwrap_or(DEFAULT_HBA.1),
            ),
            tpsa: (
                self.tpsa_lb.unwrap_or(DEFAULT_TPSA.0),
                self.tpsa_ub.unwrap_or(DEFAULT_TPSA.1),
            ),
            charge: (
                self.charge_lb.unwrap_or(DEFAULT_CHARGE.0),
                self.charge_ub.unwrap_or(DEFAULT_CHARGE.1),
            ),
            nrb: (
                self.nrb_lb.unwrap_or(DEFAULT_NRB.0),
                self.nrb_ub.unwrap_or(DEFAULT_NRB.1),
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed job document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown job: {0}")]
    UnknownJob(String),
}

/// The queue interface the worker runs against.
pub trait JobStore {
    /// Atomically selects an unclaimed job (or one whose claim went stale)
    /// and marks it taken by incrementing its progress.
    fn claim(&mut self) -> Result<Option<JobDocument>, JobStoreError>;

    /// Refreshes the claim timestamp of a running job.
    fn heartbeat(&mut self, id: &str) -> Result<(), JobStoreError>;

    /// Records forward progress on a claimed job.
    fn advance_progress(&mut self, id: &str) -> Result<(), JobStoreError>;

    /// Marks a job finished.
    fn complete(&mut self, id: &str) -> Result<(), JobStoreError>;
}

/// A directory of JSON job documents, one file per job. Suitable for a
/// single queue host; document updates go through a temp-file rename.
pub struct FsJobStore {
    dir: PathBuf,
    claim_timeout_secs: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl FsJobStore {
    pub fn new(dir: impl Into<PathBuf>, claim_timeout_secs: u64) -> Self {
        Self {
            dir: dir.into(),
            claim_timeout_secs,
        }
    }

    fn job_paths(&self) -> Result<Vec<PathBuf>, JobStoreError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn load(&self, path: &PathBuf) -> Result<JobDocument, JobStoreError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn save(&self, path: &PathBuf, job: &JobDocument) -> Result<(), JobStoreError> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(job)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn update<F: FnOnce(&mut JobDocument)>(
        &self,
        id: &str,
        apply: F,
    ) -> Result<(), JobStoreError> {
        let path = self.path_of(id);
        if !path.exists() {
            return Err(JobStoreError::UnknownJob(id.to_string()));
        }
        let mut job = self.load(&path)?;
        apply(&mut job);
        self.save(&path, &job)
    }
}

impl JobStore for FsJobStore {
    fn claim(&mut self) -> Result<Option<JobDocument>, JobStoreError> {
        let now = now_secs();
        for path in self.job_paths()? {
            // A document that fails to parse must not wedge the queue.
            let Ok(mut job) = self.load(&path) else {
                continue;
            };
            if job.completed {
                continue;
            }
            let stale = job
                .claimed_at
                .map(|t| now.saturating_sub(t) >= self.claim_timeout_secs)
                .unwrap_or(true);
            if job.progress == 0 || stale {
                job.progress += 1;
                job.claimed_at = Some(now);
                self.save(&path, &job)?;
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    fn heartbeat(&mut self, id: &str) -> Result<(), JobStoreError> {
        self.update(id, |job| job.claimed_at = Some(now_secs()))
    }

    fn advance_progress(&mut self, id: &str) -> Result<(), JobStoreError> {
        self.update(id, |job| {
            job.progress += 1;
            job.claimed_at = Some(now_secs());
        })
    }

    fn complete(&mut self, id: &str) -> Result<(), JobStoreError> {
        self.update(id, |job| job.completed = true)
    }
}
