//! Deterministic synthetic galaxy products.
//!
//! Produces a small Cube, Maps and ModelCube sharing one spatial grid, with
//! values that are simple functions of (plane, y, x) so that any origin's
//! output can be checked exactly. Products are written as FITS files under a
//! path resolver's layout, or inserted into an [`InMemoryDatabase`].

use crate::database::{DbKey, DbMetadata, DbRecord, InMemoryDatabase};
use crate::datamodel::{self, DataKind, Selectors};
use crate::error::{MarvinError, MarvinResult};
use crate::fits::{FitsTable, ProductWriter};
use crate::header::Header;
use crate::identifier::{MangaId, PlateIfu, Target};
use crate::paths::{product_params, TemplatePathResolver};
use crate::vacs::firefly;
use crate::versions::{DapVersion, VersionContext};
use crate::wcs::SpatialShape;
use ndarray::{Array1, Array3, ArrayD};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Right ascension of the synthetic galaxy centre in degrees.
pub const OBJRA: f64 = 232.544703;
/// Declination of the synthetic galaxy centre in degrees.
pub const OBJDEC: f64 = 48.690201;
/// Spaxel scale in degrees (0.5 arcsec).
pub const PIXEL_SCALE: f64 = 0.000138889;

/// Parameters of a synthetic galaxy.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticGalaxy {
    pub plateifu: PlateIfu,
    pub mangaid: MangaId,
    pub shape: SpatialShape,
    pub n_wave: usize,
    pub versions: VersionContext,
}

impl Default for SyntheticGalaxy {
    fn default() -> Self {
        Self {
            plateifu: PlateIfu::new(8485, 1901),
            mangaid: MangaId::from_parts(1, 209232),
            shape: SpatialShape::new(34, 34),
            n_wave: 16,
            versions: VersionContext::new("v2_0_1", DapVersion::new(2, 0, 2)).with_release("MPL-5"),
        }
    }
}

impl SyntheticGalaxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_versions(mut self, versions: VersionContext) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_plateifu(mut self, plateifu: PlateIfu, mangaid: MangaId) -> Self {
        self.plateifu = plateifu;
        self.mangaid = mangaid;
        self
    }

    pub fn target(&self) -> Target {
        Target {
            plateifu: self.plateifu,
            mangaid: self.mangaid.clone(),
        }
    }

    /// Default analysis variant for the galaxy's versions.
    pub fn selectors(&self) -> Selectors {
        let (bintype, template) = datamodel::default_bintemp(self.versions.dapver);
        Selectors {
            bintype: bintype.to_string(),
            template: template.to_string(),
        }
    }

    /// Kinds that exist at the galaxy's versions.
    pub fn kinds(&self) -> Vec<DataKind> {
        DataKind::ALL
            .into_iter()
            .filter(|kind| {
                datamodel::min_dapver(*kind).map_or(true, |min| self.versions.dapver >= min)
            })
            .collect()
    }

    /// Primary header of the `kind` product.
    pub fn header(&self, kind: DataKind) -> Header {
        let mut header = Header::new();
        header.insert("PLATEIFU", self.plateifu.to_string());
        header.insert("MANGAID", self.mangaid.to_string());
        header.insert("PLATE", i64::from(self.plateifu.plate));
        header.insert("IFUDSGN", self.plateifu.ifu.to_string());
        header.insert("OBJRA", OBJRA);
        header.insert("OBJDEC", OBJDEC);
        header.insert("IFURA", OBJRA);
        header.insert("IFUDEC", OBJDEC);
        header.insert("CTYPE1", "RA---TAN");
        header.insert("CTYPE2", "DEC--TAN");
        header.insert("CUNIT1", "deg");
        header.insert("CUNIT2", "deg");
        header.insert("CRPIX1", (self.shape.cols / 2 + 1) as f64);
        header.insert("CRPIX2", (self.shape.rows / 2 + 1) as f64);
        header.insert("CRVAL1", OBJRA);
        header.insert("CRVAL2", OBJDEC);
        header.insert("CD1_1", -PIXEL_SCALE);
        header.insert("CD1_2", 0.0);
        header.insert("CD2_1", 0.0);
        header.insert("CD2_2", PIXEL_SCALE);
        header.insert("EBVGAL", 0.0165);
        header.insert("DRP3QUAL", 0i64);
        header.insert("MNGTARG1", 2336i64);
        header.insert("MNGTARG2", 0i64);
        header.insert("MNGTARG3", 0i64);
        header.insert("VERSDRP3", self.versions.drpver.clone());
        header.insert("DATAKIND", kind.name());
        if kind.is_analysis() {
            let selectors = self.selectors();
            header.insert("DAPQUAL", 0i64);
            header.insert("VERSDAP", self.versions.dapver.to_string());
            header.insert("BINTYPE", selectors.bintype);
            header.insert("TEMPLATE", selectors.template);
        }
        header
    }

    pub fn wavelength(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.n_wave, |k| 3600.0 + 2.0 * k as f64)
    }

    /// Flux at plane `k`, row `y`, column `x`.
    pub fn flux_value(k: usize, y: usize, x: usize) -> f64 {
        (k + 1) as f64 * 0.5 + y as f64 * 0.25 + x as f64 * 0.015625
    }

    /// Map value of `plane` at row `y`, column `x`.
    pub fn map_value(plane: usize, y: usize, x: usize) -> f64 {
        plane as f64 + y as f64 * 0.5 + x as f64 * 0.25
    }

    fn cube_fn<F: Fn(usize, usize, usize) -> f64>(&self, planes: usize, f: F) -> ArrayD<f64> {
        Array3::from_shape_fn((planes, self.shape.rows, self.shape.cols), |(k, y, x)| f(k, y, x))
            .into_dyn()
    }

    /// One stored array of the `kind` product.
    pub fn array(&self, kind: DataKind, name: &str) -> MarvinResult<ArrayD<f64>> {
        let n = self.n_wave;
        let array = match (kind, name) {
            (DataKind::Cube | DataKind::ModelCube, "flux") => self.cube_fn(n, Self::flux_value),
            (DataKind::Cube | DataKind::ModelCube, "ivar") => {
                self.cube_fn(n, |_, y, x| if x == 0 && y == 0 { 0.0 } else { 4.0 })
            }
            (DataKind::Cube | DataKind::ModelCube, "mask") => self.cube_fn(n, |_, _, _| 0.0),
            (DataKind::Cube | DataKind::ModelCube, "wavelength") => self.wavelength().into_dyn(),
            (DataKind::ModelCube, "model") => {
                self.cube_fn(n, |k, y, x| Self::flux_value(k, y, x) * 0.75)
            }
            (DataKind::ModelCube, "emline") => self.cube_fn(n, |k, _, _| 0.125 * (k % 4) as f64),
            (DataKind::ModelCube, "emline_base") => self.cube_fn(n, |_, _, _| 0.0625),
            (DataKind::ModelCube, "redcorr") => {
                Array1::from_shape_fn(n, |k| 1.0 + k as f64 / 128.0).into_dyn()
            }
            (DataKind::Maps, name) => self.map_array(name)?,
            _ => {
                return Err(MarvinError::NotFound(format!("{kind} has no array {name}")));
            }
        };
        Ok(array)
    }

    fn map_array(&self, name: &str) -> MarvinResult<ArrayD<f64>> {
        let (base, suffix) = match name.rsplit_once('_') {
            Some((base, s @ ("ivar" | "mask"))) => (base, Some(s)),
            _ => (name, None),
        };
        let property = datamodel::find_map(self.versions.dapver, base)?;
        let planes = property.n_planes();
        Ok(match suffix {
            Some("ivar") => self.cube_fn(planes, |_, _, _| 2.0),
            Some(_) => self.cube_fn(planes, |_, _, _| 0.0),
            None => self.cube_fn(planes, Self::map_value),
        })
    }

    /// Every stored array of the `kind` product.
    pub fn arrays(&self, kind: DataKind) -> MarvinResult<BTreeMap<String, ArrayD<f64>>> {
        datamodel::bulk_arrays(kind, self.versions.dapver)
            .into_iter()
            .map(|name| {
                let array = self.array(kind, &name)?;
                Ok((name, array))
            })
            .collect()
    }

    /// Write the `kind` product where `resolver` expects it.
    pub fn write_product(&self, kind: DataKind, resolver: &TemplatePathResolver) -> MarvinResult<PathBuf> {
        let selectors = self.selectors();
        let params = product_params(kind, self.plateifu, &self.versions, Some(&selectors));
        let path = resolver.full_path(kind.path_template(), &params)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = ProductWriter::create(&path, &self.header(kind))?;
        for (name, array) in self.arrays(kind)? {
            writer.write_array(&datamodel::hdu_name(&name), &array)?;
        }
        log::debug!("Wrote synthetic {kind} to {}", path.display());
        Ok(path)
    }

    /// Write every product that exists at the galaxy's versions.
    pub fn write_products(&self, resolver: &TemplatePathResolver) -> MarvinResult<Vec<PathBuf>> {
        self.kinds()
            .into_iter()
            .map(|kind| self.write_product(kind, resolver))
            .collect()
    }

    pub fn db_record(&self, kind: DataKind) -> MarvinResult<DbRecord> {
        let selectors = self.selectors();
        Ok(DbRecord {
            key: DbKey::new(kind, self.plateifu, &self.versions, Some(&selectors)),
            metadata: DbMetadata {
                mangaid: self.mangaid.clone(),
                header: self.header(kind),
                shape: self.shape,
            },
            arrays: self.arrays(kind)?,
        })
    }

    /// Insert every product into `db`.
    pub fn populate(&self, db: &mut InMemoryDatabase) -> MarvinResult<()> {
        for kind in self.kinds() {
            db.insert(self.db_record(kind)?);
        }
        Ok(())
    }

    /// FIREFLY summary table with a row for this galaxy and one neighbour.
    pub fn firefly_table(&self) -> MarvinResult<FitsTable> {
        let plate = f64::from(self.plateifu.plate);
        let mut table = FitsTable::new("GALAXY_INFO");
        table.push_column("PLATE", vec![plate, plate])?;
        table.push_column("IFUDSGN", vec![f64::from(self.plateifu.ifu), 1902.0])?;
        table.push_column("LW_AGE_1RE", vec![9.12, 4.5])?;
        table.push_column("LW_Z_1RE", vec![-0.05, -0.3])?;
        table.push_column("MW_AGE_1RE", vec![10.4, 6.1])?;
        Ok(table)
    }

    /// Write the FIREFLY summary file where `resolver` expects it.
    pub fn write_firefly(&self, resolver: &TemplatePathResolver) -> MarvinResult<PathBuf> {
        let definition = firefly();
        let params = definition.path_params(&self.target());
        let path = resolver.full_path(&definition.path_template, &params)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.firefly_table()?.write(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wcs::Wcs;
    use approx::assert_relative_eq;

    #[test]
    fn test_arrays_cover_data_model() {
        let galaxy = SyntheticGalaxy::new();
        for kind in galaxy.kinds() {
            let arrays = galaxy.arrays(kind).unwrap();
            assert_eq!(arrays.len(), datamodel::bulk_arrays(kind, galaxy.versions.dapver).len());
        }
        let flux = galaxy.array(DataKind::Cube, "flux").unwrap();
        assert_eq!(flux.shape(), &[16, 34, 34]);
        assert_relative_eq!(flux[[2, 3, 4]], SyntheticGalaxy::flux_value(2, 3, 4));

        let gflux = galaxy.array(DataKind::Maps, "emline_gflux").unwrap();
        assert_eq!(gflux.shape(), &[6, 34, 34]);
        let vel_ivar = galaxy.array(DataKind::Maps, "stellar_vel_ivar").unwrap();
        assert_eq!(vel_ivar.shape(), &[1, 34, 34]);
    }

    #[test]
    fn test_kinds_follow_minimum_versions() {
        let mpl4 = SyntheticGalaxy::new().with_versions(VersionContext::parse("v1_5_1", "1.1.1").unwrap());
        assert_eq!(mpl4.kinds(), vec![DataKind::Cube, DataKind::Maps]);
        assert_eq!(SyntheticGalaxy::new().kinds().len(), 3);
    }

    #[test]
    fn test_header_wcs_centres_on_object() {
        let galaxy = SyntheticGalaxy::new();
        let wcs = Wcs::from_header(&galaxy.header(DataKind::Cube)).unwrap();
        let (ra, dec) = wcs.pixel_to_world(17.0, 17.0);
        assert_relative_eq!(ra, OBJRA, epsilon = 1e-9);
        assert_relative_eq!(dec, OBJDEC, epsilon = 1e-9);
    }
}
