//! FITS product I/O.
//!
//! Product files carry their metadata in the primary HDU and one image
//! extension per bulk array, named by [`crate::datamodel::hdu_name`]. Images
//! are returned in C order: a cube extension with `NAXIS1 = nx`,
//! `NAXIS2 = ny`, `NAXIS3 = n_wave` becomes an array of shape
//! `(n_wave, ny, nx)`.

use crate::header::{Header, HeaderValue, KeyType, HEADER_SCHEMA};
use fitsio::hdu::HduInfo;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::tables::{ColumnDataType, ColumnDescription};
use fitsio::FitsFile;
use ndarray::{Array2, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during FITS file operations
#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error: {0}")]
    FitsIo(#[from] fitsio::errors::Error),
    #[error("HDU not found: {0}")]
    HduNotFound(String),
    #[error("Invalid data type in HDU: {0}")]
    InvalidDataType(String),
}

/// Open product file.
///
/// Each reader owns its cfitsio handle, so it is not shared between threads;
/// backends open a reader per load.
pub struct FitsReader {
    path: PathBuf,
    fptr: FitsFile,
}

impl FitsReader {
    pub fn open(path: &Path) -> Result<Self, FitsError> {
        let fptr = FitsFile::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            fptr,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn hdu(&mut self, extname: &str) -> Result<fitsio::hdu::FitsHdu, FitsError> {
        self.fptr
            .hdu(extname)
            .map_err(|_| FitsError::HduNotFound(format!("{} in {}", extname, self.path.display())))
    }

    /// Read the known header keys from the primary HDU.
    ///
    /// Keys absent from the file are skipped.
    pub fn read_header(&mut self) -> Result<Header, FitsError> {
        let hdu = self.fptr.primary_hdu()?;
        let mut header = Header::new();
        for (key, ty) in HEADER_SCHEMA {
            let value = match ty {
                KeyType::Int => hdu.read_key::<i64>(&mut self.fptr, key).ok().map(HeaderValue::Int),
                KeyType::Float => hdu
                    .read_key::<f64>(&mut self.fptr, key)
                    .ok()
                    .map(HeaderValue::Float),
                KeyType::Str => hdu
                    .read_key::<String>(&mut self.fptr, key)
                    .ok()
                    .map(HeaderValue::Str),
            };
            if let Some(value) = value {
                header.insert(*key, value);
            }
        }
        Ok(header)
    }

    /// Image dimensions in C order (slowest axis first).
    pub fn image_dims(&mut self, extname: &str) -> Result<Vec<usize>, FitsError> {
        let hdu = self.hdu(extname)?;
        let naxis = hdu.read_key::<i64>(&mut self.fptr, "NAXIS")?;
        let mut dims = Vec::with_capacity(naxis.max(0) as usize);
        for axis in (1..=naxis).rev() {
            let len = hdu.read_key::<i64>(&mut self.fptr, &format!("NAXIS{axis}"))?;
            dims.push(len.max(0) as usize);
        }
        Ok(dims)
    }

    /// Read a whole image extension.
    pub fn read_image(&mut self, extname: &str) -> Result<ArrayD<f64>, FitsError> {
        let dims = self.image_dims(extname)?;
        let hdu = self.hdu(extname)?;
        let data: Vec<f64> = hdu.read_image(&mut self.fptr)?;
        ArrayD::from_shape_vec(IxDyn(&dims), data).map_err(|_| {
            FitsError::InvalidDataType(format!(
                "cannot reshape {} to {:?} in {}",
                extname,
                dims,
                self.path.display()
            ))
        })
    }

    /// Values of one spatial pixel across every plane of an image.
    ///
    /// For a 2D image this is a single value.
    pub fn read_pixel_series(&mut self, extname: &str, x: usize, y: usize) -> Result<Vec<f64>, FitsError> {
        let dims = self.image_dims(extname)?;
        let (n_planes, ny, nx) = match dims.as_slice() {
            [ny, nx] => (1, *ny, *nx),
            [n, ny, nx] => (*n, *ny, *nx),
            _ => {
                return Err(FitsError::InvalidDataType(format!(
                    "{extname} has {} axes, expected 2 or 3",
                    dims.len()
                )))
            }
        };
        if x >= nx || y >= ny {
            return Err(FitsError::InvalidDataType(format!(
                "pixel ({x}, {y}) outside {extname} of size {nx}x{ny}"
            )));
        }

        let hdu = self.hdu(extname)?;
        let plane = nx * ny;
        let mut series = Vec::with_capacity(n_planes);
        for k in 0..n_planes {
            let start = k * plane + y * nx + x;
            let value: Vec<f64> = hdu.read_section(&mut self.fptr, start, start + 1)?;
            series.extend(value);
        }
        Ok(series)
    }

    /// One 2D plane of an image; plane 0 of a 2D image is the image itself.
    pub fn read_plane(&mut self, extname: &str, index: usize) -> Result<Array2<f64>, FitsError> {
        let dims = self.image_dims(extname)?;
        let (n_planes, ny, nx) = match dims.as_slice() {
            [ny, nx] => (1, *ny, *nx),
            [n, ny, nx] => (*n, *ny, *nx),
            _ => {
                return Err(FitsError::InvalidDataType(format!(
                    "{extname} has {} axes, expected 2 or 3",
                    dims.len()
                )))
            }
        };
        if index >= n_planes {
            return Err(FitsError::InvalidDataType(format!(
                "plane {index} outside {extname} with {n_planes} planes"
            )));
        }

        let hdu = self.hdu(extname)?;
        let start = index * nx * ny;
        let data: Vec<f64> = hdu.read_section(&mut self.fptr, start, start + nx * ny)?;
        Array2::from_shape_vec((ny, nx), data)
            .map_err(|_| FitsError::InvalidDataType(format!("cannot reshape plane of {extname}")))
    }

    /// Read the first binary-table extension, numeric columns only.
    pub fn read_first_table(&mut self) -> Result<FitsTable, FitsError> {
        let mut index = 1;
        while let Ok(hdu) = self.fptr.hdu(index) {
            if let HduInfo::TableInfo {
                column_descriptions,
                num_rows,
            } = &hdu.info
            {
                let name = hdu
                    .read_key::<String>(&mut self.fptr, "EXTNAME")
                    .unwrap_or_else(|_| format!("HDU_{index}"));
                let mut table = FitsTable::new(name);
                for desc in column_descriptions {
                    let numeric = matches!(
                        desc.data_type.typ,
                        ColumnDataType::Double
                            | ColumnDataType::Float
                            | ColumnDataType::Int
                            | ColumnDataType::Long
                    );
                    if !numeric {
                        log::debug!("Skipping non-numeric column {}", desc.name);
                        continue;
                    }
                    let values: Vec<f64> = hdu.read_col(&mut self.fptr, &desc.name)?;
                    table.push_column(&desc.name, values)?;
                }
                if table.n_rows() != *num_rows && !table.is_empty() {
                    return Err(FitsError::InvalidDataType(format!(
                        "table {} reports {} rows but holds {}",
                        table.name,
                        num_rows,
                        table.n_rows()
                    )));
                }
                return Ok(table);
            }
            index += 1;
        }
        Err(FitsError::HduNotFound(format!(
            "binary table in {}",
            self.path.display()
        )))
    }
}

/// Writes a product file: header in the primary HDU, one image per array.
pub struct ProductWriter {
    fptr: FitsFile,
}

impl ProductWriter {
    /// Create (or overwrite) `path` with `header` in its primary HDU.
    pub fn create(path: &Path, header: &Header) -> Result<Self, FitsError> {
        let mut fptr = FitsFile::create(path).overwrite().open()?;
        let hdu = fptr.primary_hdu()?;
        for (key, value) in header.iter() {
            match value {
                HeaderValue::Int(v) => hdu.write_key(&mut fptr, key, *v)?,
                HeaderValue::Float(v) => hdu.write_key(&mut fptr, key, *v)?,
                HeaderValue::Str(s) => hdu.write_key(&mut fptr, key, s.clone())?,
                HeaderValue::Logical(_) => {
                    log::debug!("Not writing logical header key {key}");
                }
            }
        }
        Ok(Self { fptr })
    }

    /// Append an image extension holding `array`.
    pub fn write_array(&mut self, extname: &str, array: &ArrayD<f64>) -> Result<(), FitsError> {
        let description = ImageDescription {
            data_type: ImageType::Double,
            dimensions: array.shape(),
        };
        let hdu = self.fptr.create_image(extname.to_string(), &description)?;
        let flat: Vec<f64> = array.iter().copied().collect();
        hdu.write_image(&mut self.fptr, &flat)?;
        Ok(())
    }
}

/// Numeric binary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitsTable {
    pub name: String,
    columns: BTreeMap<String, Vec<f64>>,
    order: Vec<String>,
}

impl FitsTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    /// Add a column; every column must have the same length.
    pub fn push_column(&mut self, name: &str, values: Vec<f64>) -> Result<(), FitsError> {
        if !self.is_empty() && values.len() != self.n_rows() {
            return Err(FitsError::InvalidDataType(format!(
                "column {name} has {} rows, table has {}",
                values.len(),
                self.n_rows()
            )));
        }
        let key = name.to_uppercase();
        if !self.columns.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.columns.insert(key, values);
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(&name.to_uppercase()).map(Vec::as_slice)
    }

    /// Column names in file order.
    pub fn column_names(&self) -> &[String] {
        &self.order
    }

    pub fn n_rows(&self) -> usize {
        self.order
            .first()
            .and_then(|c| self.columns.get(c))
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Index of the first row where every `(column, value)` matches.
    pub fn find_row(&self, criteria: &[(&str, f64)]) -> Option<usize> {
        (0..self.n_rows()).find(|&row| {
            criteria.iter().all(|(col, value)| {
                self.column(col)
                    .map(|c| c[row] == *value)
                    .unwrap_or(false)
            })
        })
    }

    /// One row as column name to value.
    pub fn row(&self, index: usize) -> Option<BTreeMap<String, f64>> {
        if index >= self.n_rows() {
            return None;
        }
        Some(
            self.order
                .iter()
                .filter_map(|c| self.columns.get(c).map(|v| (c.clone(), v[index])))
                .collect(),
        )
    }

    /// Write as the first extension of a new file.
    pub fn write(&self, path: &Path) -> Result<(), FitsError> {
        let mut fptr = FitsFile::create(path).overwrite().open()?;
        let descriptions = self
            .order
            .iter()
            .map(|name| {
                ColumnDescription::new(name)
                    .with_type(ColumnDataType::Double)
                    .create()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let hdu = fptr.create_table(self.name.clone(), &descriptions)?;
        for name in &self.order {
            if let Some(values) = self.columns.get(name) {
                hdu.write_col(&mut fptr, name.as_str(), values.as_slice())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;
    use tempfile::TempDir;

    fn sample_header() -> Header {
        let mut header = Header::new();
        header.insert("PLATEIFU", "8485-1901");
        header.insert("PLATE", 8485_i64);
        header.insert("CRVAL1", 232.544703);
        header.insert("CD1_1", -0.000138889);
        header
    }

    #[test]
    fn test_fits_error_display() {
        let error = FitsError::HduNotFound("FLUX".to_string());
        assert!(error.to_string().contains("HDU not found: FLUX"));
    }

    #[test]
    fn test_product_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("product.fits");

        let cube = Array3::from_shape_fn((5, 4, 3), |(k, y, x)| (k * 100 + y * 10 + x) as f64);
        let header = sample_header();
        {
            let mut writer = ProductWriter::create(&path, &header).unwrap();
            writer.write_array("FLUX", &cube.clone().into_dyn()).unwrap();
        }

        let mut reader = FitsReader::open(&path).unwrap();
        let read_header = reader.read_header().unwrap();
        assert_eq!(read_header.get_str("PLATEIFU"), Some("8485-1901"));
        assert_eq!(read_header.get_i64("PLATE"), Some(8485));
        assert_relative_eq!(read_header.get_f64("CRVAL1").unwrap(), 232.544703);
        assert_relative_eq!(read_header.get_f64("CD1_1").unwrap(), -0.000138889);

        assert_eq!(reader.image_dims("FLUX").unwrap(), vec![5, 4, 3]);
        let image = reader.read_image("FLUX").unwrap();
        assert_eq!(image, cube.clone().into_dyn());

        let series = reader.read_pixel_series("FLUX", 2, 1).unwrap();
        assert_eq!(series, vec![12.0, 112.0, 212.0, 312.0, 412.0]);

        let plane = reader.read_plane("FLUX", 3).unwrap();
        assert_eq!(plane[[1, 2]], 312.0);
        assert_eq!(plane.dim(), (4, 3));

        assert!(reader.read_pixel_series("FLUX", 3, 0).is_err());
        assert!(matches!(
            reader.read_image("MISSING"),
            Err(FitsError::HduNotFound(_))
        ));
    }

    #[test]
    fn test_table_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.fits");

        let mut table = FitsTable::new("SUMMARY");
        table.push_column("PLATE", vec![8485.0, 7443.0]).unwrap();
        table.push_column("IFUDSGN", vec![1901.0, 12701.0]).unwrap();
        table.push_column("LW_AGE", vec![0.5, 1.25]).unwrap();
        assert!(table.push_column("SHORT", vec![1.0]).is_err());
        table.write(&path).unwrap();

        let read = FitsReader::open(&path).unwrap().read_first_table().unwrap();
        assert_eq!(read.name, "SUMMARY");
        assert_eq!(read.n_rows(), 2);
        let row = read.find_row(&[("PLATE", 7443.0), ("IFUDSGN", 12701.0)]).unwrap();
        assert_eq!(row, 1);
        assert_eq!(read.row(row).unwrap()["LW_AGE"], 1.25);
        assert!(read.find_row(&[("PLATE", 1.0)]).is_none());
    }
}
