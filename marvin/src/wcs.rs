//! Spatial grid and world coordinate system.
//!
//! Products use a gnomonic (TAN) projection described by the standard
//! `CRPIX`/`CRVAL`/`CD` header keywords. Pixel coordinates here are 0-based
//! array indices, `x` along columns and `y` along rows.

use crate::error::{MarvinError, MarvinResult};
use crate::header::Header;
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Spatial dimensions of a product grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpatialShape {
    /// Number of rows (y extent).
    pub rows: usize,
    /// Number of columns (x extent).
    pub cols: usize,
}

impl SpatialShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn to_tuple(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn spaxel_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Whether array indices (x, y) fall on the grid.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.cols && (y as usize) < self.rows
    }

    /// Central spaxel as (x, y).
    pub fn center(&self) -> (i64, i64) {
        ((self.cols / 2) as i64, (self.rows / 2) as i64)
    }
}

impl From<(usize, usize)> for SpatialShape {
    fn from(dimensions: (usize, usize)) -> Self {
        Self::new(dimensions.0, dimensions.1)
    }
}

/// Tangent-plane world coordinate system.
#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    /// Reference pixel, 1-based as written in the header.
    crpix: Vector2<f64>,
    /// Sky position of the reference pixel in degrees (RA, Dec).
    crval: (f64, f64),
    /// Linear pixel to intermediate world transform, degrees per pixel.
    cd: Matrix2<f64>,
    cd_inv: Matrix2<f64>,
    /// Columns are east, north and the line of sight at `crval`.
    rotation: Matrix3<f64>,
}

impl Wcs {
    /// Build a WCS from reference pixel, reference sky position and CD matrix.
    ///
    /// # Arguments
    /// * `crpix` - 1-based reference pixel (x, y)
    /// * `crval` - (RA, Dec) of the reference pixel in degrees
    /// * `cd` - CD matrix rows `[[CD1_1, CD1_2], [CD2_1, CD2_2]]`
    pub fn new(crpix: (f64, f64), crval: (f64, f64), cd: [[f64; 2]; 2]) -> MarvinResult<Self> {
        let cd = Matrix2::new(cd[0][0], cd[0][1], cd[1][0], cd[1][1]);
        let cd_inv = cd
            .try_inverse()
            .ok_or_else(|| MarvinError::InvalidData("CD matrix is singular".to_string()))?;

        let (ra, dec) = (crval.0.to_radians(), crval.1.to_radians());
        let z = Vector3::new(dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin());

        let north_pole = Vector3::new(0.0, 0.0, 1.0);
        let mut east = north_pole.cross(&z);
        if east.norm() < 1e-12 {
            // Reference point at a pole; any east direction is valid.
            east = Vector3::new(0.0, 1.0, 0.0);
        }
        let east = east.normalize();
        let north = z.cross(&east).normalize();

        Ok(Self {
            crpix: Vector2::new(crpix.0, crpix.1),
            crval,
            cd,
            cd_inv,
            rotation: Matrix3::from_columns(&[east, north, z]),
        })
    }

    /// Read the WCS from `CRPIX*`, `CRVAL*` and `CD*_*` header keys.
    pub fn from_header(header: &Header) -> MarvinResult<Self> {
        Self::new(
            (header.require_f64("CRPIX1")?, header.require_f64("CRPIX2")?),
            (header.require_f64("CRVAL1")?, header.require_f64("CRVAL2")?),
            [
                [
                    header.require_f64("CD1_1")?,
                    header.get_f64("CD1_2").unwrap_or(0.0),
                ],
                [
                    header.get_f64("CD2_1").unwrap_or(0.0),
                    header.require_f64("CD2_2")?,
                ],
            ],
        )
    }

    /// Sky position of the reference pixel in degrees.
    pub fn reference(&self) -> (f64, f64) {
        self.crval
    }

    /// 0-based pixel (x, y) to (RA, Dec) in degrees.
    pub fn pixel_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        let offset = Vector2::new(x + 1.0, y + 1.0) - self.crpix;
        let intermediate = self.cd * offset;
        let xi = intermediate.x.to_radians();
        let eta = intermediate.y.to_radians();

        let local = Vector3::new(xi, eta, 1.0).normalize();
        let sky = self.rotation * local;

        let ra = sky.y.atan2(sky.x).to_degrees().rem_euclid(360.0);
        let dec = sky.z.clamp(-1.0, 1.0).asin().to_degrees();
        (ra, dec)
    }

    /// (RA, Dec) in degrees to 0-based pixel (x, y).
    ///
    /// Returns `None` for positions on the far hemisphere, which have no
    /// projection.
    pub fn world_to_pixel(&self, ra: f64, dec: f64) -> Option<(f64, f64)> {
        let (ra, dec) = (ra.to_radians(), dec.to_radians());
        let sky = Vector3::new(dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin());
        let local = self.rotation.transpose() * sky;
        if local.z <= 0.0 {
            return None;
        }
        let intermediate = Vector2::new(
            (local.x / local.z).to_degrees(),
            (local.y / local.z).to_degrees(),
        );
        let pixel = self.cd_inv * intermediate + self.crpix;
        Some((pixel.x - 1.0, pixel.y - 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SCALE: f64 = 0.5 / 3600.0;

    fn sample_wcs() -> Wcs {
        Wcs::new((18.0, 18.0), (232.544703, 48.690201), [[-SCALE, 0.0], [0.0, SCALE]]).unwrap()
    }

    #[test]
    fn test_reference_pixel_maps_to_crval() {
        let wcs = sample_wcs();
        let (ra, dec) = wcs.pixel_to_world(17.0, 17.0);
        assert_relative_eq!(ra, 232.544703, epsilon = 1e-9);
        assert_relative_eq!(dec, 48.690201, epsilon = 1e-9);
    }

    #[test]
    fn test_ra_increases_to_the_left() {
        let wcs = sample_wcs();
        let (ra_left, _) = wcs.pixel_to_world(0.0, 17.0);
        let (ra_right, _) = wcs.pixel_to_world(33.0, 17.0);
        assert!(ra_left > ra_right);

        let (_, dec_low) = wcs.pixel_to_world(17.0, 0.0);
        let (_, dec_high) = wcs.pixel_to_world(17.0, 33.0);
        assert!(dec_high > dec_low);
    }

    #[test]
    fn test_world_pixel_inverse() {
        let wcs = sample_wcs();
        for (x, y) in [(0.0, 0.0), (1.0, 2.0), (33.0, 5.0), (12.5, 30.25)] {
            let (ra, dec) = wcs.pixel_to_world(x, y);
            let (px, py) = wcs.world_to_pixel(ra, dec).unwrap();
            assert_relative_eq!(px, x, epsilon = 1e-6);
            assert_relative_eq!(py, y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_far_side_has_no_projection() {
        let wcs = sample_wcs();
        assert!(wcs.world_to_pixel(52.544703, -48.690201).is_none());
    }

    #[test]
    fn test_singular_cd_is_rejected() {
        assert!(Wcs::new((1.0, 1.0), (0.0, 0.0), [[0.0, 0.0], [0.0, 0.0]]).is_err());
    }

    #[test]
    fn test_shape_bounds() {
        let shape = SpatialShape::new(34, 34);
        assert!(shape.contains(0, 0));
        assert!(shape.contains(33, 33));
        assert!(!shape.contains(34, 0));
        assert!(!shape.contains(-1, 3));
        assert_eq!(shape.center(), (17, 17));
    }
}
