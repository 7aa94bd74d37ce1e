//! Device storage quota governance.
//!
//! Usage is bucketed into three levels. Only `Critical` restricts writes, and
//! even then only writes that can be recomputed or re-fetched are refused:
//! losing an action the agent already committed is worse than over-filling
//! storage.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};

/// Ratio at which the user is warned.
pub const WARNING_RATIO: f64 = 0.80;
/// Ratio at which derived writes are refused.
pub const CRITICAL_RATIO: f64 = 0.95;

/// Storage usage estimate in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEstimate {
    pub used: u64,
    pub limit: u64,
}

impl StorageEstimate {
    pub fn new(used: u64, limit: u64) -> Self {
        Self { used, limit }
    }

    /// `used / limit`; an unknown (zero) limit counts as full.
    pub fn ratio(&self) -> f64 {
        if self.limit == 0 {
            return f64::INFINITY;
        }
        self.used as f64 / self.limit as f64
    }

    pub fn level(&self) -> QuotaLevel {
        QuotaLevel::from_ratio(self.ratio())
    }

    /// Check whether a write of the given class may proceed.
    pub fn admit(&self, class: WriteClass) -> Result<()> {
        match (self.level(), class) {
            (QuotaLevel::Critical, WriteClass::Derived) => Err(Error::QuotaExceeded {
                used: self.used,
                limit: self.limit,
            }),
            _ => Ok(()),
        }
    }
}

/// Quota pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaLevel {
    /// Below 80%: no restriction
    Ok,
    /// 80% to 95%: writes allowed, user notified
    Warning,
    /// 95% and above: derived writes refused
    Critical,
}

impl QuotaLevel {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= CRITICAL_RATIO {
            QuotaLevel::Critical
        } else if ratio >= WARNING_RATIO {
            QuotaLevel::Warning
        } else {
            QuotaLevel::Ok
        }
    }
}

/// How expendable a write is under quota pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteClass {
    /// Represents an action the agent already committed to
    UserCommitted,
    /// Cache or background data that can be re-derived
    Derived,
}
