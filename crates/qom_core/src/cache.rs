//! On-disk cache of integrated trajectories and reduced measures.
//!
//! Layout: `<dir>/<system code>/dynamics/<t0>_<tN>_<count>/` holding one
//! `V_<vals>.json` trajectory file and one `<measure>_<vals>.json` file per
//! instance, where `<vals>` joins the instance parameter values. Every file
//! stores the fingerprint of the inputs that produced it; a file whose
//! fingerprint does not match is treated as missing.

use crate::dynamics::{SolverKind, Trajectory};
use crate::measures::{MeasureSpec, MeasureValue};
use crate::params::Params;
use crate::solvers::IntegratorSettings;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    fingerprint: String,
    data: T,
}

/// Write content to a file through a temporary sibling and a rename.
fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Underscore-joined values used in file names.
pub fn join_values(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{v}"))
        .collect::<Vec<_>>()
        .join("_")
}

/// Hash of everything that determines a run except the instance parameters.
#[derive(Debug, Clone)]
pub struct RunFingerprint {
    base: Sha256,
}

impl RunFingerprint {
    pub fn new(
        system: &str,
        kind: SolverKind,
        settings: &IntegratorSettings,
        times: &[f64],
    ) -> Result<Self> {
        let mut base = Sha256::new();
        base.update(system.as_bytes());
        base.update([0u8]);
        base.update(kind.as_str().as_bytes());
        base.update(serde_json::to_vec(settings)?);
        base.update((times.len() as u64).to_le_bytes());
        for t in times {
            base.update(t.to_bits().to_le_bytes());
        }
        Ok(Self { base })
    }

    pub fn trajectory(&self, params: &Params) -> Result<String> {
        let mut hasher = self.base.clone();
        hasher.update(b"trajectory");
        hasher.update(serde_json::to_vec(params)?);
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn measure(&self, params: &Params, spec: &MeasureSpec) -> Result<String> {
        let mut hasher = self.base.clone();
        hasher.update(b"measure");
        hasher.update(serde_json::to_vec(params)?);
        hasher.update(serde_json::to_vec(spec)?);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[derive(Debug, Clone)]
pub struct DynamicsCache {
    root: PathBuf,
}

impl DynamicsCache {
    /// Opens (creating if needed) the cache directory for this time grid.
    pub fn open(dir: &Path, system_code: &str, times: &[f64]) -> Result<Self> {
        let first = times.first().copied().unwrap_or(0.0);
        let last = times.last().copied().unwrap_or(0.0);
        let root = dir
            .join(system_code)
            .join("dynamics")
            .join(format!("{}_{}_{}", first, last, times.len()));
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn trajectory_path(&self, key: &[f64]) -> PathBuf {
        self.root.join(format!("V_{}.json", join_values(key)))
    }

    pub fn measure_path(&self, spec: &MeasureSpec, key: &[f64]) -> PathBuf {
        self.root
            .join(format!("measure_{}_{}.json", spec.tag(), join_values(key)))
    }

    fn load<T: DeserializeOwned>(path: &Path, fingerprint: &str) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read(path)
            .with_context(|| format!("Failed to read cache file {}", path.display()))?;
        let entry: CacheEntry<T> = match serde_json::from_slice(&content) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(path = %path.display(), %err, "unreadable cache file, recomputing");
                return Ok(None);
            }
        };
        if entry.fingerprint != fingerprint {
            warn!(path = %path.display(), "stale cache file, recomputing");
            return Ok(None);
        }
        debug!(path = %path.display(), "cache hit");
        Ok(Some(entry.data))
    }

    fn store<T: Serialize>(path: &Path, fingerprint: &str, data: &T) -> Result<()> {
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            data,
        };
        let content = serde_json::to_vec(&entry)?;
        atomic_write(path, &content)
            .with_context(|| format!("Failed to write cache file {}", path.display()))
    }

    pub fn load_trajectory(&self, key: &[f64], fingerprint: &str) -> Result<Option<Trajectory>> {
        Self::load(&self.trajectory_path(key), fingerprint)
    }

    pub fn store_trajectory(&self, key: &[f64], fingerprint: &str, data: &Trajectory) -> Result<()> {
        Self::store(&self.trajectory_path(key), fingerprint, data)
    }

    pub fn load_measure(
        &self,
        spec: &MeasureSpec,
        key: &[f64],
        fingerprint: &str,
    ) -> Result<Option<Vec<MeasureValue>>> {
        Self::load(&self.measure_path(spec, key), fingerprint)
    }

    pub fn store_measure(
        &self,
        spec: &MeasureSpec,
        key: &[f64],
        fingerprint: &str,
        data: &[MeasureValue],
    ) -> Result<()> {
        Self::store(&self.measure_path(spec, key), fingerprint, &data)
    }
}
