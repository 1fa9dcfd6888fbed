//! Per-pixel views of a data object.
//!
//! A [`SpaxelQuery`] addresses one spaxel either in array space or on the
//! sky. Queries are validated, and converted to array indices, before any
//! backend is touched.

use crate::datamodel::DataKind;
use crate::error::{MarvinError, MarvinResult};
use crate::object::DataObject;
use crate::wcs::{SpatialShape, Wcs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where array-space coordinates are measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelOrigin {
    /// Index 0 at the lower-left corner.
    #[default]
    Lower,
    /// Offsets from the central spaxel.
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Coords {
    Pixel { x: i64, y: i64, origin: PixelOrigin },
    Sky { ra: f64, dec: f64 },
}

/// Validated spaxel address.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaxelQuery {
    coords: Coords,
}

impl SpaxelQuery {
    /// Validate a coordinate set; exactly one of (x, y) or (ra, dec) must be given.
    pub fn new(x: Option<i64>, y: Option<i64>, ra: Option<f64>, dec: Option<f64>) -> MarvinResult<Self> {
        let pixel = match (x, y) {
            (Some(x), Some(y)) => Some((x, y)),
            (None, None) => None,
            _ => {
                return Err(MarvinError::Identifier(
                    "both x and y must be given".to_string(),
                ))
            }
        };
        let sky = match (ra, dec) {
            (Some(ra), Some(dec)) => Some((ra, dec)),
            (None, None) => None,
            _ => {
                return Err(MarvinError::Identifier(
                    "both ra and dec must be given".to_string(),
                ))
            }
        };

        match (pixel, sky) {
            (Some((x, y)), None) => Ok(Self::pixel(x, y)),
            (None, Some((ra, dec))) => {
                if !ra.is_finite() || !dec.is_finite() || !(-90.0..=90.0).contains(&dec) {
                    return Err(MarvinError::Identifier(format!(
                        "invalid sky position ra={ra}, dec={dec}"
                    )));
                }
                Ok(Self::sky(ra, dec))
            }
            (Some(_), Some(_)) => Err(MarvinError::Identifier(
                "either (x, y) or (ra, dec) must be given, not both".to_string(),
            )),
            (None, None) => Err(MarvinError::Identifier(
                "either (x, y) or (ra, dec) must be given".to_string(),
            )),
        }
    }

    /// Array-space query from the lower-left corner.
    pub fn pixel(x: i64, y: i64) -> Self {
        Self {
            coords: Coords::Pixel {
                x,
                y,
                origin: PixelOrigin::Lower,
            },
        }
    }

    pub fn sky(ra: f64, dec: f64) -> Self {
        Self {
            coords: Coords::Sky { ra, dec },
        }
    }

    /// Interpret array coordinates relative to `origin`. No effect on sky queries.
    pub fn with_origin(mut self, origin: PixelOrigin) -> Self {
        if let Coords::Pixel { origin: o, .. } = &mut self.coords {
            *o = origin;
        }
        self
    }

    /// Array indices (x, y) on `shape`, failing when outside the grid.
    pub fn to_array_index(&self, shape: SpatialShape, wcs: &Wcs) -> MarvinResult<(usize, usize)> {
        let (x, y) = match self.coords {
            Coords::Pixel { x, y, origin } => match origin {
                PixelOrigin::Lower => (x, y),
                PixelOrigin::Center => {
                    let (cx, cy) = shape.center();
                    (cx + x, cy + y)
                }
            },
            Coords::Sky { ra, dec } => {
                let (px, py) = wcs.world_to_pixel(ra, dec).ok_or_else(|| {
                    MarvinError::Identifier(format!("ra={ra}, dec={dec} is not on this grid"))
                })?;
                ((px + 0.5).floor() as i64, (py + 0.5).floor() as i64)
            }
        };
        if !shape.contains(x, y) {
            return Err(MarvinError::Identifier(format!(
                "spaxel ({x}, {y}) is outside the {}x{} grid",
                shape.cols, shape.rows
            )));
        }
        Ok((x as usize, y as usize))
    }
}

/// Which per-pixel categories a spaxel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaxelOptions {
    pub spectrum: bool,
    pub properties: bool,
    pub model: bool,
}

impl Default for SpaxelOptions {
    fn default() -> Self {
        Self {
            spectrum: true,
            properties: true,
            model: false,
        }
    }
}

impl SpaxelOptions {
    /// Defaults when extracting from an object of `kind`: model fits are
    /// included only from a ModelCube.
    pub fn for_kind(kind: DataKind) -> Self {
        Self {
            model: kind == DataKind::ModelCube,
            ..Self::default()
        }
    }

    pub fn none() -> Self {
        Self {
            spectrum: false,
            properties: false,
            model: false,
        }
    }
}

/// Flux spectrum of one spaxel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub wavelength: Vec<f64>,
    pub flux: Vec<f64>,
    pub ivar: Vec<f64>,
    pub mask: Vec<i32>,
}

/// Model fit of one spaxel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFit {
    pub wavelength: Vec<f64>,
    /// Binned flux the model was fit to.
    pub flux: Vec<f64>,
    pub ivar: Vec<f64>,
    pub mask: Vec<i32>,
    pub model: Vec<f64>,
    pub emline: Vec<f64>,
    pub emline_base: Vec<f64>,
    /// `model - emline - emline_base`.
    pub stellar_continuum: Vec<f64>,
    pub redcorr: Vec<f64>,
}

/// One analysis property value at a spaxel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub value: f64,
    pub ivar: f64,
    pub mask: i32,
    pub unit: String,
}

/// The part of a spaxel a single product holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpaxelData {
    Spectrum(Spectrum),
    Model(ModelFit),
    Properties {
        properties: BTreeMap<String, PropertyValue>,
    },
}

impl SpaxelData {
    fn kind_name(&self) -> &'static str {
        match self {
            SpaxelData::Spectrum(_) => "spectrum",
            SpaxelData::Model(_) => "model",
            SpaxelData::Properties { .. } => "properties",
        }
    }

    pub fn into_spectrum(self) -> MarvinResult<Spectrum> {
        match self {
            SpaxelData::Spectrum(s) => Ok(s),
            other => Err(MarvinError::InvalidData(format!(
                "expected spectrum, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn into_model(self) -> MarvinResult<ModelFit> {
        match self {
            SpaxelData::Model(m) => Ok(m),
            other => Err(MarvinError::InvalidData(format!(
                "expected model, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn into_properties(self) -> MarvinResult<BTreeMap<String, PropertyValue>> {
        match self {
            SpaxelData::Properties { properties } => Ok(properties),
            other => Err(MarvinError::InvalidData(format!(
                "expected properties, got {}",
                other.kind_name()
            ))),
        }
    }
}

/// One spaxel extracted from a parent object.
#[derive(Debug)]
pub struct Spaxel<'a> {
    parent: &'a DataObject,
    pub x: usize,
    pub y: usize,
    pub ra: f64,
    pub dec: f64,
    pub spectrum: Option<Spectrum>,
    pub properties: Option<BTreeMap<String, PropertyValue>>,
    pub model: Option<ModelFit>,
}

impl<'a> Spaxel<'a> {
    pub(crate) fn new(parent: &'a DataObject, x: usize, y: usize) -> Self {
        let (ra, dec) = parent.wcs().pixel_to_world(x as f64, y as f64);
        Self {
            parent,
            x,
            y,
            ra,
            dec,
            spectrum: None,
            properties: None,
            model: None,
        }
    }

    /// Object the spaxel was extracted from.
    pub fn parent(&self) -> &'a DataObject {
        self.parent
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.as_ref().and_then(|p| p.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn grid() -> (SpatialShape, Wcs) {
        let wcs = Wcs::new(
            (18.0, 18.0),
            (232.544703, 48.690201),
            [[-0.000138889, 0.0], [0.0, 0.000138889]],
        )
        .unwrap();
        (SpatialShape::new(34, 34), wcs)
    }

    #[test]
    fn test_query_needs_exactly_one_system() {
        for (x, y, ra, dec) in [
            (None, None, None, None),
            (Some(1), Some(2), Some(232.5), Some(48.6)),
            (Some(1), None, None, None),
            (None, None, Some(232.5), None),
        ] {
            let err = SpaxelQuery::new(x, y, ra, dec).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Identifier);
        }
        assert!(SpaxelQuery::new(Some(1), Some(2), None, None).is_ok());
        assert!(SpaxelQuery::new(None, None, Some(232.5), Some(48.6)).is_ok());
        assert!(SpaxelQuery::new(None, None, Some(232.5), Some(91.0)).is_err());
    }

    #[test]
    fn test_pixel_bounds() {
        let (shape, wcs) = grid();
        assert_eq!(SpaxelQuery::pixel(1, 2).to_array_index(shape, &wcs).unwrap(), (1, 2));
        assert!(SpaxelQuery::pixel(34, 0).to_array_index(shape, &wcs).is_err());
        assert!(SpaxelQuery::pixel(-1, 0).to_array_index(shape, &wcs).is_err());
    }

    #[test]
    fn test_center_origin() {
        let (shape, wcs) = grid();
        let q = SpaxelQuery::pixel(0, 0).with_origin(PixelOrigin::Center);
        assert_eq!(q.to_array_index(shape, &wcs).unwrap(), (17, 17));
        let q = SpaxelQuery::pixel(-17, 16).with_origin(PixelOrigin::Center);
        assert_eq!(q.to_array_index(shape, &wcs).unwrap(), (0, 33));
        let q = SpaxelQuery::pixel(17, 0).with_origin(PixelOrigin::Center);
        assert!(q.to_array_index(shape, &wcs).is_err());
    }

    #[test]
    fn test_sky_query_lands_on_pixel() {
        let (shape, wcs) = grid();
        let (ra, dec) = wcs.pixel_to_world(5.0, 9.0);
        let q = SpaxelQuery::new(None, None, Some(ra), Some(dec)).unwrap();
        assert_eq!(q.to_array_index(shape, &wcs).unwrap(), (5, 9));

        let far = SpaxelQuery::sky(232.544703, 50.0);
        assert_eq!(far.to_array_index(shape, &wcs).unwrap_err().kind(), ErrorKind::Identifier);
    }

    #[test]
    fn test_options_for_kind() {
        assert!(!SpaxelOptions::for_kind(DataKind::Cube).model);
        assert!(SpaxelOptions::for_kind(DataKind::ModelCube).model);
        let none = SpaxelOptions::none();
        assert!(!none.spectrum && !none.properties && !none.model);
    }
}
