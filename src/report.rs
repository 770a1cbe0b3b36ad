//! Simulation reports
//!
//! Turns backend stats into the numbers an operator cares about. The
//! reporting is deliberately asymmetric: waste is quoted as a fraction of
//! physical bytes (how much of the reservation went unused), while savings
//! are quoted as a fraction of logical bytes (how much of the workload's
//! footprint sharing absorbed).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::KvStats;

/// Accounting summary for one backend run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendReport {
    /// Strategy name, e.g. `monolithic` or `paged`
    pub backend: String,
    /// Tokens actually appended
    pub logical_tokens: usize,
    /// Bytes a perfectly packed, unshared cache would need
    pub logical_bytes: usize,
    /// Bytes the backend reserved
    pub physical_bytes: usize,
    /// `max(physical - logical, 0)`
    pub waste_bytes: usize,
    /// `max(logical - physical, 0)`
    pub saved_bytes: usize,
}

impl BackendReport {
    /// Build a report from a stats snapshot
    pub fn new(backend: &str, stats: KvStats) -> Self {
        Self {
            backend: backend.to_string(),
            logical_tokens: stats.logical_tokens,
            logical_bytes: stats.logical_bytes,
            physical_bytes: stats.physical_bytes,
            waste_bytes: stats.physical_bytes.saturating_sub(stats.logical_bytes),
            saved_bytes: stats.logical_bytes.saturating_sub(stats.physical_bytes),
        }
    }

    /// Wasted fraction of the physical reservation
    pub fn waste_ratio(&self) -> f64 {
        ratio(self.waste_bytes, self.physical_bytes)
    }

    /// Saved fraction of the logical footprint
    pub fn saved_ratio(&self) -> f64 {
        ratio(self.saved_bytes, self.logical_bytes)
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl fmt::Display for BackendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.backend)?;
        writeln!(f, "  logical_bytes  = {}", self.logical_bytes)?;
        writeln!(f, "  physical_bytes = {}", self.physical_bytes)?;
        if self.physical_bytes > self.logical_bytes {
            writeln!(
                f,
                "  waste_bytes    = {} ({:.2}%)",
                self.waste_bytes,
                self.waste_ratio() * 100.0
            )
        } else {
            writeln!(
                f,
                "  memory_saved   = {} ({:.2}% due to sharing)",
                self.saved_bytes,
                self.saved_ratio() * 100.0
            )
        }
    }
}

/// Full run output: one report per backend exercised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// KV bytes one token occupies under the configured model dimensions
    pub bytes_per_token: usize,
    /// Per-backend summaries, in execution order
    pub backends: Vec<BackendReport>,
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bytes_per_token = {}", self.bytes_per_token)?;
        for report in &self.backends {
            write!(f, "{report}")?;
        }
        Ok(())
    }
}
