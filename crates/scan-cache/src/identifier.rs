//! # Scan identifiers
//!
//! Composite keys for downloadable scan content and the scan records the
//! server hands out when listing a slab.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Composite `(site, slab, scan)` key identifying one content bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScanId {
    pub site_id: i64,
    pub slab_id: i64,
    pub scan_id: i64,
}

impl ScanId {
    pub const fn new(site_id: i64, slab_id: i64, scan_id: i64) -> Self {
        Self {
            site_id,
            slab_id,
            scan_id,
        }
    }

    /// Relative cache directory: `<site_id>/<slab_id>/<scan_id>`.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(self.site_id.to_string())
            .join(self.slab_id.to_string())
            .join(self.scan_id.to_string())
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.site_id, self.slab_id, self.scan_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid scan identifier '{0}', expected 'site/slab/scan'")]
pub struct ParseScanIdError(String);

impl FromStr for ScanId {
    type Err = ParseScanIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('/');
        let mut next = || -> Result<i64, ParseScanIdError> {
            parts
                .next()
                .and_then(|p| p.trim().parse::<i64>().ok())
                .ok_or_else(|| ParseScanIdError(s.to_string()))
        };

        let id = ScanId::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(ParseScanIdError(s.to_string()));
        }
        Ok(id)
    }
}

/// A scan entry as returned by the server's scan listing for one slab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanDescriptor {
    pub scan_id: i64,
    #[serde(rename = "type")]
    pub scan_type: String,
    pub timestamp: String,
    pub longitude: f64,
    pub latitude: f64,
    /// Opaque download location, used verbatim.
    pub url: String,
}

impl Default for ScanDescriptor {
    fn default() -> Self {
        Self {
            scan_id: -1,
            scan_type: "none".to_string(),
            timestamp: "none".to_string(),
            longitude: 0.0,
            latitude: 0.0,
            url: String::new(),
        }
    }
}

impl ScanDescriptor {
    /// Full identifier of this scan within the given site and slab.
    pub fn identifier(&self, site_id: i64, slab_id: i64) -> ScanId {
        ScanId::new(site_id, slab_id, self.scan_id)
    }
}
