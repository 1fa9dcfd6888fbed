//! Target identifiers and construction requests.
//!
//! A target is addressed either by plate-IFU (`8485-1901`) or by its
//! galaxy-catalog id (`1-209232`). A construction request carries exactly
//! one of plate-IFU, mangaid or an explicit file path.

use crate::config::DataMode;
use crate::error::{MarvinError, MarvinResult};
use crate::versions::VersionContext;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

static PLATEIFU_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4,5})-(\d{3,5})$").expect("plate-IFU pattern is valid"));

static MANGAID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}-\d+$").expect("mangaid pattern is valid"));

/// Which identifier form a string is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    PlateIfu,
    MangaId,
}

/// Classify a galaxy id string, or `None` when it matches neither form.
pub fn parse_identifier(galid: &str) -> Option<IdentifierKind> {
    let galid = galid.trim();
    if PLATEIFU_RE.is_match(galid) {
        Some(IdentifierKind::PlateIfu)
    } else if MANGAID_RE.is_match(galid) {
        Some(IdentifierKind::MangaId)
    } else {
        None
    }
}

/// Plate and IFU design of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlateIfu {
    pub plate: u32,
    pub ifu: u32,
}

impl PlateIfu {
    pub fn new(plate: u32, ifu: u32) -> Self {
        Self { plate, ifu }
    }
}

impl fmt::Display for PlateIfu {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.plate, self.ifu)
    }
}

impl FromStr for PlateIfu {
    type Err = MarvinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = PLATEIFU_RE
            .captures(s.trim())
            .ok_or_else(|| MarvinError::Identifier(format!("'{s}' is not a valid plate-IFU")))?;
        let plate = caps[1]
            .parse()
            .map_err(|_| MarvinError::Identifier(format!("invalid plate in '{s}'")))?;
        let ifu = caps[2]
            .parse()
            .map_err(|_| MarvinError::Identifier(format!("invalid IFU design in '{s}'")))?;
        Ok(Self { plate, ifu })
    }
}

impl TryFrom<String> for PlateIfu {
    type Error = MarvinError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PlateIfu> for String {
    fn from(value: PlateIfu) -> Self {
        value.to_string()
    }
}

/// Galaxy-catalog identifier, e.g. `1-209232`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MangaId(String);

impl MangaId {
    /// Id `number` of catalog `catalog`; catalogs are numbered below 100.
    pub(crate) fn from_parts(catalog: u8, number: u64) -> Self {
        debug_assert!(catalog < 100);
        Self(format!("{catalog}-{number}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MangaId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MangaId {
    type Err = MarvinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if MANGAID_RE.is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(MarvinError::Identifier(format!("'{s}' is not a valid mangaid")))
        }
    }
}

impl TryFrom<String> for MangaId {
    type Error = MarvinError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MangaId> for String {
    fn from(value: MangaId) -> Self {
        value.0
    }
}

/// Either identifier form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    PlateIfu(PlateIfu),
    MangaId(MangaId),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Identifier::PlateIfu(p) => write!(f, "{p}"),
            Identifier::MangaId(m) => write!(f, "{m}"),
        }
    }
}

impl FromStr for Identifier {
    type Err = MarvinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_identifier(s) {
            Some(IdentifierKind::PlateIfu) => Ok(Identifier::PlateIfu(s.parse()?)),
            Some(IdentifierKind::MangaId) => Ok(Identifier::MangaId(s.parse()?)),
            None => Err(MarvinError::Identifier(format!(
                "galaxy id '{s}' must either be a plate-IFU or mangaid designation"
            ))),
        }
    }
}

/// Fully resolved identity of a constructed object: both forms are known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub plateifu: PlateIfu,
    pub mangaid: MangaId,
}

impl Target {
    pub fn plate(&self) -> u32 {
        self.plateifu.plate
    }

    pub fn ifu(&self) -> u32 {
        self.plateifu.ifu
    }
}

/// What determines the identity of an object under construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Identifier(Identifier),
    File(PathBuf),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Source::Identifier(id) => write!(f, "{id}"),
            Source::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Inputs to a Cube, Maps or ModelCube construction.
///
/// Identity fields are validated lazily by [`ObjectRequest::source`] so that
/// the conflicting-input case surfaces as an error from construction.
#[derive(Debug, Clone, Default)]
pub struct ObjectRequest {
    pub plateifu: Option<String>,
    pub mangaid: Option<String>,
    pub filename: Option<PathBuf>,
    pub versions: Option<VersionContext>,
    pub mode: Option<DataMode>,
    pub bintype: Option<String>,
    pub template: Option<String>,
}

impl ObjectRequest {
    /// Request by plate-IFU.
    pub fn plateifu(plateifu: impl Into<String>) -> Self {
        Self {
            plateifu: Some(plateifu.into()),
            ..Self::default()
        }
    }

    /// Request by mangaid.
    pub fn mangaid(mangaid: impl Into<String>) -> Self {
        Self {
            mangaid: Some(mangaid.into()),
            ..Self::default()
        }
    }

    /// Request an explicit local file.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            filename: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Request from a galaxy id of either form.
    pub fn galaxy_id(galid: &str) -> MarvinResult<Self> {
        match parse_identifier(galid) {
            Some(IdentifierKind::PlateIfu) => Ok(Self::plateifu(galid.trim())),
            Some(IdentifierKind::MangaId) => Ok(Self::mangaid(galid.trim())),
            None => Err(MarvinError::Identifier(format!(
                "galaxy id '{galid}' must either be a plate-IFU or mangaid designation"
            ))),
        }
    }

    pub fn with_versions(mut self, versions: VersionContext) -> Self {
        self.versions = Some(versions);
        self
    }

    pub fn with_mode(mut self, mode: DataMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_bintype(mut self, bintype: impl Into<String>) -> Self {
        self.bintype = Some(bintype.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Validate that exactly one identity form was given and parse it.
    pub fn source(&self) -> MarvinResult<Source> {
        let given = [
            self.plateifu.is_some(),
            self.mangaid.is_some(),
            self.filename.is_some(),
        ]
        .iter()
        .filter(|g| **g)
        .count();

        match given {
            0 => Err(MarvinError::Identifier(
                "one of plateifu, mangaid or filename is required".to_string(),
            )),
            1 => {
                if let Some(plateifu) = &self.plateifu {
                    Ok(Source::Identifier(Identifier::PlateIfu(plateifu.parse()?)))
                } else if let Some(mangaid) = &self.mangaid {
                    Ok(Source::Identifier(Identifier::MangaId(mangaid.parse()?)))
                } else {
                    let path = self.filename.clone().unwrap_or_default();
                    Ok(Source::File(path))
                }
            }
            _ => Err(MarvinError::Identifier(
                "only one of plateifu, mangaid or filename may be given".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_identifier_forms() {
        assert_eq!(parse_identifier("8485-1901"), Some(IdentifierKind::PlateIfu));
        assert_eq!(parse_identifier("10001-12701"), Some(IdentifierKind::PlateIfu));
        assert_eq!(parse_identifier("1-209232"), Some(IdentifierKind::MangaId));
        assert_eq!(parse_identifier("12-193481"), Some(IdentifierKind::MangaId));
        assert_eq!(parse_identifier("galaxy"), None);
        assert_eq!(parse_identifier("8485_1901"), None);
        assert_eq!(parse_identifier(""), None);
    }

    #[test]
    fn test_plateifu_roundtrip_text() {
        let p: PlateIfu = "8485-1901".parse().unwrap();
        assert_eq!(p.plate, 8485);
        assert_eq!(p.ifu, 1901);
        assert_eq!(p.to_string(), "8485-1901");
        assert!("1-209232".parse::<PlateIfu>().is_err());
    }

    #[test]
    fn test_identifier_rejects_garbage() {
        let err = "not-an-id".parse::<Identifier>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Identifier);
    }

    #[test]
    fn test_request_requires_exactly_one_identity() {
        let none = ObjectRequest::default();
        assert_eq!(none.source().unwrap_err().kind(), ErrorKind::Identifier);

        let mut both = ObjectRequest::plateifu("8485-1901");
        both.mangaid = Some("1-209232".to_string());
        assert_eq!(both.source().unwrap_err().kind(), ErrorKind::Identifier);

        let mut with_file = ObjectRequest::mangaid("1-209232");
        with_file.filename = Some(PathBuf::from("cube.fits"));
        assert!(with_file.source().is_err());

        let ok = ObjectRequest::mangaid("1-209232").source().unwrap();
        assert!(matches!(ok, Source::Identifier(Identifier::MangaId(_))));
    }

    #[test]
    fn test_malformed_plateifu_is_rejected_at_source() {
        let req = ObjectRequest::plateifu("84851901");
        assert_eq!(req.source().unwrap_err().kind(), ErrorKind::Identifier);
    }

    #[test]
    fn test_galaxy_id_dispatch() {
        let req = ObjectRequest::galaxy_id("1-209232").unwrap();
        assert_eq!(req.mangaid.as_deref(), Some("1-209232"));
        let req = ObjectRequest::galaxy_id("8485-1901").unwrap();
        assert_eq!(req.plateifu.as_deref(), Some("8485-1901"));
        assert!(ObjectRequest::galaxy_id("nope").is_err());
    }
}
