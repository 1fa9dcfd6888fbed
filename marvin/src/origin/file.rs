//! Local FITS file backend.

use super::{assemble_map, assemble_spaxel, Backend, ObjectMetadata, Origin};
use crate::datamodel::{self, DataKind, MapProperty, Selectors};
use crate::error::{MarvinError, MarvinResult};
use crate::fits::FitsReader;
use crate::header::Header;
use crate::identifier::Target;
use crate::maps::MapData;
use crate::spaxel::SpaxelData;
use crate::versions::VersionContext;
use crate::wcs::SpatialShape;
use ndarray::ArrayD;
use std::cell::RefCell;
use std::path::{Path, PathBuf};

/// Serves a product from one FITS file.
///
/// Metadata is read when the backend is opened; arrays are read on demand.
#[derive(Debug)]
pub struct FileBackend {
    kind: DataKind,
    path: PathBuf,
    metadata: ObjectMetadata,
}

/// Versions a file header declares, falling back to the requested ones.
fn header_versions(
    kind: DataKind,
    header: &Header,
    requested: &VersionContext,
) -> MarvinResult<VersionContext> {
    let drpver = header
        .get_str("VERSDRP3")
        .map(str::to_string)
        .unwrap_or_else(|| requested.drpver.clone());
    let dapver = match header.get_str("VERSDAP") {
        Some(v) if kind.is_analysis() => v.parse()?,
        _ => requested.dapver,
    };
    let mut versions = VersionContext::new(drpver, dapver);
    if versions.drpver == requested.drpver && versions.dapver == requested.dapver {
        versions.release = requested.release.clone();
    }
    Ok(versions)
}

/// Target identity from `PLATEIFU` and `MANGAID`.
pub(crate) fn header_target(header: &Header) -> MarvinResult<Target> {
    Ok(Target {
        plateifu: header.require_str("PLATEIFU")?.parse()?,
        mangaid: header.require_str("MANGAID")?.parse()?,
    })
}

impl FileBackend {
    /// Open `path` and read its metadata.
    ///
    /// # Arguments
    /// * `kind` - Product kind the file holds
    /// * `path` - Product file
    /// * `requested` - Versions to assume where the header is silent
    /// * `selectors` - Requested analysis variant, overridden by the header
    pub fn open(
        kind: DataKind,
        path: &Path,
        requested: &VersionContext,
        selectors: Option<Selectors>,
    ) -> MarvinResult<Self> {
        let mut reader = FitsReader::open(path)?;
        let header = reader.read_header()?;

        if let Some(file_kind) = header.get_str("DATAKIND") {
            if !file_kind.eq_ignore_ascii_case(kind.name()) {
                return Err(MarvinError::InvalidData(format!(
                    "{} holds a {file_kind}, not a {kind}",
                    path.display()
                )));
            }
        }

        let target = header_target(&header)?;
        let versions = header_versions(kind, &header, requested)?;
        let selectors = if kind.is_analysis() {
            match (header.get_str("BINTYPE"), header.get_str("TEMPLATE")) {
                (Some(b), Some(t)) => Some(Selectors {
                    bintype: b.to_string(),
                    template: t.to_string(),
                }),
                _ => selectors,
            }
        } else {
            None
        };

        let arrays = datamodel::bulk_arrays(kind, versions.dapver);
        let reference = arrays
            .first()
            .ok_or_else(|| MarvinError::InvalidData(format!("{kind} has no bulk arrays")))?;
        let dims = reader.image_dims(&datamodel::hdu_name(reference))?;
        let shape = match dims.as_slice() {
            [.., rows, cols] => SpatialShape::new(*rows, *cols),
            _ => {
                return Err(MarvinError::InvalidData(format!(
                    "{reference} in {} is not an image",
                    path.display()
                )))
            }
        };

        log::debug!("Opened {kind} file {} with shape {:?}", path.display(), shape);
        Ok(Self {
            kind,
            path: path.to_path_buf(),
            metadata: ObjectMetadata {
                target,
                header,
                shape,
                versions,
                selectors,
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> MarvinResult<FitsReader> {
        Ok(FitsReader::open(&self.path)?)
    }
}

impl Backend for FileBackend {
    fn origin(&self) -> Origin {
        Origin::File
    }

    fn load_header(&self) -> MarvinResult<ObjectMetadata> {
        Ok(self.metadata.clone())
    }

    fn load_array(&self, name: &str) -> MarvinResult<ArrayD<f64>> {
        log::debug!("Reading {name} from {}", self.path.display());
        Ok(self.reader()?.read_image(&datamodel::hdu_name(name))?)
    }

    fn load_spaxel(&self, x: usize, y: usize) -> MarvinResult<SpaxelData> {
        let reader = RefCell::new(self.reader()?);
        assemble_spaxel(
            self.kind,
            &self.metadata.versions,
            |name| Ok(reader.borrow_mut().read_pixel_series(&datamodel::hdu_name(name), x, y)?),
            |name| {
                let image = reader.borrow_mut().read_image(&datamodel::hdu_name(name))?;
                Ok(image.iter().copied().collect())
            },
        )
    }

    fn load_map(&self, property: &MapProperty, channel: Option<&str>) -> MarvinResult<MapData> {
        if self.kind != DataKind::Maps {
            return Err(MarvinError::InvalidData(format!("{} holds no maps", self.kind)));
        }
        let mut reader = self.reader()?;
        assemble_map(property, channel, |name, index| {
            Ok(reader.read_plane(&datamodel::hdu_name(name), index)?)
        })
    }
}
