//! Reduction and analysis version handling.
//!
//! Every data object is bound to an immutable [`VersionContext`] at
//! construction. Analysis (DAP) versions are compared numerically so that
//! minimum-version gates work across releases.

use crate::config::ConfigError;
use crate::error::{MarvinError, MarvinResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Numeric analysis-pipeline version, e.g. `2.0.2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DapVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl DapVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for DapVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for DapVersion {
    type Err = MarvinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MarvinError::Identifier(format!("'{s}' is not a valid dapver"));
        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        match parts.as_slice() {
            [major, minor, patch] => Ok(Self::new(*major, *minor, *patch)),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for DapVersion {
    type Error = MarvinError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DapVersion> for String {
    fn from(value: DapVersion) -> Self {
        value.to_string()
    }
}

/// Reduction and analysis versions a data object is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionContext {
    /// Reduction pipeline version, e.g. `v2_0_1`.
    pub drpver: String,
    /// Analysis pipeline version.
    pub dapver: DapVersion,
    /// Release name the pair came from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
}

impl VersionContext {
    pub fn new(drpver: impl Into<String>, dapver: DapVersion) -> Self {
        Self {
            drpver: drpver.into(),
            dapver,
            release: None,
        }
    }

    /// Parse both versions from text.
    pub fn parse(drpver: &str, dapver: &str) -> MarvinResult<Self> {
        Ok(Self::new(drpver, dapver.parse()?))
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    /// Fail unless `dapver` is at least `minimum`.
    pub fn require_dapver(&self, component: &str, minimum: DapVersion) -> MarvinResult<()> {
        if self.dapver < minimum {
            return Err(MarvinError::VersionIncompatibility {
                component: component.to_string(),
                requested: self.dapver.to_string(),
                minimum: minimum.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for VersionContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "drpver={}, dapver={}", self.drpver, self.dapver)
    }
}

/// Reduction and analysis versions published together under one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseVersions {
    pub drpver: String,
    pub dapver: DapVersion,
}

/// Release name to version pair table.
///
/// Release names are case-insensitive and stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, ReleaseVersions>",
    into = "BTreeMap<String, ReleaseVersions>"
)]
pub struct ReleaseTable(BTreeMap<String, ReleaseVersions>);

impl ReleaseTable {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, release: impl Into<String>, drpver: impl Into<String>, dapver: DapVersion) {
        self.0.insert(
            release.into().to_uppercase(),
            ReleaseVersions {
                drpver: drpver.into(),
                dapver,
            },
        );
    }

    /// Version context for a release name.
    pub fn lookup_versions(&self, release: &str) -> Result<VersionContext, ConfigError> {
        let entry = self
            .0
            .get(&release.to_uppercase())
            .ok_or_else(|| ConfigError::UnknownRelease(release.to_string()))?;
        Ok(VersionContext::new(entry.drpver.clone(), entry.dapver).with_release(release.to_uppercase()))
    }

    /// Release names in sorted order.
    pub fn releases(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl From<BTreeMap<String, ReleaseVersions>> for ReleaseTable {
    fn from(entries: BTreeMap<String, ReleaseVersions>) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(release, versions)| (release.to_uppercase(), versions))
                .collect(),
        )
    }
}

impl From<ReleaseTable> for BTreeMap<String, ReleaseVersions> {
    fn from(table: ReleaseTable) -> Self {
        table.0
    }
}

impl Default for ReleaseTable {
    fn default() -> Self {
        let mut table = Self::new();
        table.insert("MPL-4", "v1_5_1", DapVersion::new(1, 1, 1));
        table.insert("MPL-5", "v2_0_1", DapVersion::new(2, 0, 2));
        table.insert("MPL-6", "v2_3_1", DapVersion::new(2, 1, 3));
        table.insert("DR15", "v2_4_3", DapVersion::new(2, 2, 1));
        table
    }
}
