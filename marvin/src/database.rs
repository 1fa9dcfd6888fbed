//! Database session abstraction.
//!
//! The core only needs keyed lookups filtered by identifier and version, so
//! the session is a trait. [`InMemoryDatabase`] is a self-contained store
//! that can be snapshotted to JSON; hosts with a relational database
//! implement [`DatabaseSession`] over their own connection.

use crate::datamodel::{DataKind, Selectors};
use crate::error::{MarvinError, MarvinResult};
use crate::header::Header;
use crate::identifier::{MangaId, PlateIfu};
use crate::versions::{DapVersion, VersionContext};
use crate::wcs::SpatialShape;
use ndarray::{Array2, ArrayD, Axis, Ix2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Identity and version filter of one product row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DbKey {
    pub kind: DataKind,
    pub plateifu: PlateIfu,
    pub drpver: String,
    /// Absent for cubes.
    pub dapver: Option<DapVersion>,
    /// Absent for cubes.
    pub selectors: Option<Selectors>,
}

impl DbKey {
    pub fn new(
        kind: DataKind,
        plateifu: PlateIfu,
        versions: &VersionContext,
        selectors: Option<&Selectors>,
    ) -> Self {
        let analysis = kind.is_analysis();
        Self {
            kind,
            plateifu,
            drpver: versions.drpver.clone(),
            dapver: analysis.then_some(versions.dapver),
            selectors: if analysis { selectors.cloned() } else { None },
        }
    }
}

/// Metadata of one product row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbMetadata {
    pub mangaid: MangaId,
    pub header: Header,
    pub shape: SpatialShape,
}

/// Query handle onto a product database.
pub trait DatabaseSession: Send + Sync {
    /// Whether any product of `kind` exists for these versions.
    fn has_versions(&self, kind: DataKind, versions: &VersionContext) -> bool;

    /// Plate-IFU observed for a mangaid, if known.
    fn resolve_mangaid(&self, mangaid: &MangaId) -> MarvinResult<Option<PlateIfu>>;

    /// Metadata of the row, or `None` if the row does not exist.
    fn fetch_metadata(&self, key: &DbKey) -> MarvinResult<Option<DbMetadata>>;

    /// A whole stored array.
    fn fetch_array(&self, key: &DbKey, name: &str) -> MarvinResult<ArrayD<f64>>;

    /// One spatial pixel across every plane of an array.
    fn fetch_series(&self, key: &DbKey, name: &str, x: usize, y: usize) -> MarvinResult<Vec<f64>>;

    /// One 2D plane of an array.
    fn fetch_plane(&self, key: &DbKey, name: &str, index: usize) -> MarvinResult<Array2<f64>>;
}

/// One stored product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbRecord {
    pub key: DbKey,
    pub metadata: DbMetadata,
    pub arrays: BTreeMap<String, ArrayD<f64>>,
}

/// Product store held in memory, loadable from a JSON snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryDatabase {
    records: Vec<DbRecord>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, replacing any with the same key.
    pub fn insert(&mut self, record: DbRecord) {
        self.records.retain(|r| r.key != record.key);
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load a JSON snapshot.
    pub fn load(path: &Path) -> MarvinResult<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| MarvinError::Database(format!("cannot parse {}: {e}", path.display())))
    }

    /// Write a JSON snapshot.
    pub fn save(&self, path: &Path) -> MarvinResult<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| MarvinError::Database(format!("cannot serialize database: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn record(&self, key: &DbKey) -> MarvinResult<&DbRecord> {
        self.records
            .iter()
            .find(|r| r.key == *key)
            .ok_or_else(|| MarvinError::NotFound(format!("no {} row for {}", key.kind, key.plateifu)))
    }

    fn array(&self, key: &DbKey, name: &str) -> MarvinResult<&ArrayD<f64>> {
        self.record(key)?.arrays.get(name).ok_or_else(|| {
            MarvinError::NotFound(format!("{} has no array {name} for {}", key.kind, key.plateifu))
        })
    }
}

impl DatabaseSession for InMemoryDatabase {
    fn has_versions(&self, kind: DataKind, versions: &VersionContext) -> bool {
        self.records.iter().any(|r| {
            r.key.kind == kind
                && r.key.drpver == versions.drpver
                && (!kind.is_analysis() || r.key.dapver == Some(versions.dapver))
        })
    }

    fn resolve_mangaid(&self, mangaid: &MangaId) -> MarvinResult<Option<PlateIfu>> {
        Ok(self
            .records
            .iter()
            .find(|r| r.metadata.mangaid == *mangaid)
            .map(|r| r.key.plateifu))
    }

    fn fetch_metadata(&self, key: &DbKey) -> MarvinResult<Option<DbMetadata>> {
        Ok(self
            .records
            .iter()
            .find(|r| r.key == *key)
            .map(|r| r.metadata.clone()))
    }

    fn fetch_array(&self, key: &DbKey, name: &str) -> MarvinResult<ArrayD<f64>> {
        Ok(self.array(key, name)?.clone())
    }

    fn fetch_series(&self, key: &DbKey, name: &str, x: usize, y: usize) -> MarvinResult<Vec<f64>> {
        let array = self.array(key, name)?;
        pixel_series(array, x, y).ok_or_else(|| {
            MarvinError::InvalidData(format!("pixel ({x}, {y}) outside {name} of shape {:?}", array.shape()))
        })
    }

    fn fetch_plane(&self, key: &DbKey, name: &str, index: usize) -> MarvinResult<Array2<f64>> {
        let array = self.array(key, name)?;
        array_plane(array, index).ok_or_else(|| {
            MarvinError::InvalidData(format!("plane {index} outside {name} of shape {:?}", array.shape()))
        })
    }
}

/// Values of spatial pixel (x, y) across the leading axis of a 2D or 3D array.
pub fn pixel_series(array: &ArrayD<f64>, x: usize, y: usize) -> Option<Vec<f64>> {
    let ndim = array.ndim();
    if !(2..=3).contains(&ndim) {
        return None;
    }
    let shape = array.shape();
    if x >= shape[ndim - 1] || y >= shape[ndim - 2] {
        return None;
    }
    let column = array.index_axis(Axis(ndim - 1), x);
    let series = column.index_axis(Axis(ndim - 2), y);
    Some(series.iter().copied().collect())
}

/// Plane `index` of a 3D array, or the array itself for 2D and index 0.
pub fn array_plane(array: &ArrayD<f64>, index: usize) -> Option<Array2<f64>> {
    match array.ndim() {
        2 if index == 0 => array.view().into_dimensionality::<Ix2>().ok().map(|v| v.to_owned()),
        3 if index < array.shape()[0] => array
            .index_axis(Axis(0), index)
            .into_dimensionality::<Ix2>()
            .ok()
            .map(|v| v.to_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use ndarray::Array3;
    use tempfile::TempDir;

    fn sample_record() -> DbRecord {
        let versions = VersionContext::parse("v2_0_1", "2.0.2").unwrap();
        let key = DbKey::new(DataKind::Cube, PlateIfu::new(8485, 1901), &versions, None);
        let flux = Array3::from_shape_fn((4, 3, 2), |(k, y, x)| (k * 100 + y * 10 + x) as f64);
        let mut arrays = BTreeMap::new();
        arrays.insert("flux".to_string(), flux.into_dyn());
        let mut header = Header::new();
        header.insert("PLATEIFU", "8485-1901");
        DbRecord {
            key,
            metadata: DbMetadata {
                mangaid: "1-209232".parse().unwrap(),
                header,
                shape: SpatialShape::new(3, 2),
            },
            arrays,
        }
    }

    #[test]
    fn test_cube_key_ignores_analysis_fields() {
        let versions = VersionContext::parse("v2_0_1", "2.0.2").unwrap();
        let sel = Selectors::resolve(versions.dapver, None, None).unwrap();
        let key = DbKey::new(DataKind::Cube, PlateIfu::new(8485, 1901), &versions, Some(&sel));
        assert_eq!(key.dapver, None);
        assert_eq!(key.selectors, None);

        let key = DbKey::new(DataKind::Maps, PlateIfu::new(8485, 1901), &versions, Some(&sel));
        assert_eq!(key.dapver, Some(versions.dapver));
    }

    #[test]
    fn test_lookups() {
        let mut db = InMemoryDatabase::new();
        let record = sample_record();
        let key = record.key.clone();
        db.insert(record);

        let versions = VersionContext::parse("v2_0_1", "2.0.2").unwrap();
        assert!(db.has_versions(DataKind::Cube, &versions));
        assert!(!db.has_versions(DataKind::Maps, &versions));
        let other = VersionContext::parse("v2_4_3", "2.2.1").unwrap();
        assert!(!db.has_versions(DataKind::Cube, &other));

        let mangaid: MangaId = "1-209232".parse().unwrap();
        assert_eq!(db.resolve_mangaid(&mangaid).unwrap(), Some(PlateIfu::new(8485, 1901)));

        assert_eq!(db.fetch_series(&key, "flux", 1, 2).unwrap(), vec![21.0, 121.0, 221.0, 321.0]);
        assert_eq!(db.fetch_plane(&key, "flux", 2).unwrap()[[2, 1]], 221.0);
        assert!(db.fetch_series(&key, "flux", 2, 0).is_err());
        assert_eq!(db.fetch_array(&key, "ivar").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        let mut db = InMemoryDatabase::new();
        db.insert(sample_record());
        db.save(&path).unwrap();

        let loaded = InMemoryDatabase::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        let key = sample_record().key;
        assert_eq!(loaded.fetch_metadata(&key).unwrap(), db.fetch_metadata(&key).unwrap());
    }

    #[test]
    fn test_plane_of_2d_array() {
        let arr = Array2::from_elem((3, 3), 1.5).into_dyn();
        assert!(array_plane(&arr, 0).is_some());
        assert!(array_plane(&arr, 1).is_none());
        assert_eq!(pixel_series(&arr, 0, 0), Some(vec![1.5]));
    }
}
