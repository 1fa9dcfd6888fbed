//! Backend selection.
//!
//! A data object is served by exactly one [`Backend`]: a local file, a
//! database session or the remote API. [`OriginResolver`] applies version
//! gating first and then tries the origins in that order, recording why each
//! rejected origin was passed over.

pub mod database;
pub mod file;
pub mod remote;

use crate::config::{DataMode, MarvinContext};
use crate::database::DbKey;
use crate::datamodel::{self, DataKind, MapProperty, Selectors};
use crate::error::{MarvinError, MarvinResult, OriginAttempt};
use crate::header::Header;
use crate::identifier::{Identifier, ObjectRequest, PlateIfu, Source, Target};
use crate::maps::MapData;
use crate::paths::product_params;
use crate::remote::ObjectRef;
use crate::spaxel::{ModelFit, PropertyValue, Spectrum, SpaxelData};
use crate::versions::VersionContext;
use crate::wcs::SpatialShape;
use ndarray::{Array2, ArrayD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub use self::database::DatabaseBackend;
pub use self::file::FileBackend;
pub use self::remote::RemoteBackend;

/// Which backend serves a data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "db")]
    Database,
    #[serde(rename = "api")]
    Remote,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::File => "file",
            Origin::Database => "db",
            Origin::Remote => "api",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations a backend may be asked to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Header,
    Spaxel,
    Map,
    BulkArray(String),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::Header => write!(f, "get_header"),
            Operation::Spaxel => write!(f, "get_spaxel"),
            Operation::Map => write!(f, "get_map"),
            Operation::BulkArray(name) => write!(f, "get_bulk_array({name})"),
        }
    }
}

/// Everything loaded eagerly at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMetadata {
    pub target: Target,
    pub header: Header,
    pub shape: SpatialShape,
    /// Versions the backend actually serves, which a file header may override.
    pub versions: VersionContext,
    pub selectors: Option<Selectors>,
}

/// One origin's implementation of the data access surface.
pub trait Backend: Send {
    fn origin(&self) -> Origin;

    /// Fail unless the origin permits `operation`.
    fn permits(&self, _operation: &Operation) -> MarvinResult<()> {
        Ok(())
    }

    fn load_header(&self) -> MarvinResult<ObjectMetadata>;

    /// A stored bulk array by data model name.
    fn load_array(&self, name: &str) -> MarvinResult<ArrayD<f64>>;

    /// The part of spaxel (x, y) this product holds.
    fn load_spaxel(&self, x: usize, y: usize) -> MarvinResult<SpaxelData>;

    /// One property/channel map; only Maps products hold maps.
    fn load_map(&self, property: &MapProperty, channel: Option<&str>) -> MarvinResult<MapData>;
}

/// Assemble a product's spaxel part from per-array accessors.
///
/// `series(name)` returns the values of a stored array at the spaxel across
/// its leading axis; `vector(name)` returns a 1D array such as the
/// wavelength grid.
pub(crate) fn assemble_spaxel<S, V>(
    kind: DataKind,
    versions: &VersionContext,
    mut series: S,
    mut vector: V,
) -> MarvinResult<SpaxelData>
where
    S: FnMut(&str) -> MarvinResult<Vec<f64>>,
    V: FnMut(&str) -> MarvinResult<Vec<f64>>,
{
    let to_mask = |values: Vec<f64>| values.into_iter().map(|v| v as i32).collect::<Vec<_>>();
    match kind {
        DataKind::Cube => Ok(SpaxelData::Spectrum(Spectrum {
            wavelength: vector("wavelength")?,
            flux: series("flux")?,
            ivar: series("ivar")?,
            mask: to_mask(series("mask")?),
        })),
        DataKind::ModelCube => {
            let model = series("model")?;
            let emline = series("emline")?;
            let emline_base = series("emline_base")?;
            let stellar_continuum = model
                .iter()
                .zip(&emline)
                .zip(&emline_base)
                .map(|((m, e), b)| m - e - b)
                .collect();
            Ok(SpaxelData::Model(ModelFit {
                wavelength: vector("wavelength")?,
                flux: series("flux")?,
                ivar: series("ivar")?,
                mask: to_mask(series("mask")?),
                model,
                emline,
                emline_base,
                stellar_continuum,
                redcorr: vector("redcorr")?,
            }))
        }
        DataKind::Maps => {
            let mut properties = BTreeMap::new();
            for prop in datamodel::map_properties(versions.dapver) {
                let values = series(&prop.name)?;
                let ivars = series(&format!("{}_ivar", prop.name))?;
                let masks = series(&format!("{}_mask", prop.name))?;
                let channels: Vec<Option<&str>> = if prop.is_multichannel() {
                    prop.channels.iter().map(|c| Some(c.as_str())).collect()
                } else {
                    vec![None]
                };
                for (idx, channel) in channels.into_iter().enumerate() {
                    let (Some(value), Some(ivar), Some(mask)) =
                        (values.get(idx), ivars.get(idx), masks.get(idx))
                    else {
                        return Err(MarvinError::InvalidData(format!(
                            "{} holds {} planes, expected {}",
                            prop.name,
                            values.len(),
                            prop.n_planes()
                        )));
                    };
                    properties.insert(
                        prop.full_name(channel),
                        PropertyValue {
                            value: *value,
                            ivar: *ivar,
                            mask: *mask as i32,
                            unit: prop.unit.clone(),
                        },
                    );
                }
            }
            Ok(SpaxelData::Properties { properties })
        }
    }
}

/// Assemble one map from a per-array plane accessor.
pub(crate) fn assemble_map<P>(
    property: &MapProperty,
    channel: Option<&str>,
    mut plane: P,
) -> MarvinResult<MapData>
where
    P: FnMut(&str, usize) -> MarvinResult<Array2<f64>>,
{
    let index = property.channel_index(channel)?;
    let data = MapData {
        value: plane(&property.name, index)?,
        ivar: plane(&format!("{}_ivar", property.name), index)?,
        mask: plane(&format!("{}_mask", property.name), index)?.mapv(|v| v as i32),
    };
    data.validate()?;
    Ok(data)
}

/// A backend chosen for a construction request.
pub struct Resolved {
    pub backend: Box<dyn Backend>,
    pub mode: DataMode,
    pub filename: Option<PathBuf>,
}

/// Applies the origin selection policy for one context.
pub struct OriginResolver<'a> {
    context: &'a MarvinContext,
}

impl<'a> OriginResolver<'a> {
    pub fn new(context: &'a MarvinContext) -> Self {
        Self { context }
    }

    /// Pick the backend for `request`.
    ///
    /// Order: version gate, explicit or resolvable local file, database
    /// holding the requested versions, remote API. Failure names the target,
    /// the versions and every origin attempted.
    pub fn resolve(&self, kind: DataKind, request: &ObjectRequest) -> MarvinResult<Resolved> {
        let source = request.source()?;
        let versions = request
            .versions
            .clone()
            .unwrap_or_else(|| self.context.versions.clone());
        let mode = request.mode.unwrap_or_else(|| self.context.mode());

        if let Some(minimum) = datamodel::min_dapver(kind) {
            versions.require_dapver(kind.name(), minimum)?;
        }

        let selectors = if kind.is_analysis() {
            Some(Selectors::resolve(
                versions.dapver,
                request.bintype.as_deref(),
                request.template.as_deref(),
            )?)
        } else {
            None
        };

        let identifier = match source {
            Source::File(path) => return self.resolve_file(kind, path, mode, &versions, selectors),
            Source::Identifier(id) => id,
        };

        let mut attempted = Vec::new();

        if mode.allows_local() {
            let plateifu = self.local_plateifu(&identifier, &mut attempted)?;
            if let Some(plateifu) = plateifu {
                if let Some(backend) =
                    self.try_file(kind, plateifu, &versions, selectors.as_ref(), &mut attempted)?
                {
                    return Ok(Resolved {
                        filename: Some(backend.path().to_path_buf()),
                        backend: Box::new(backend),
                        mode,
                    });
                }
            }
            if let Some(backend) =
                self.try_database(kind, plateifu, &versions, selectors.as_ref(), &mut attempted)?
            {
                return Ok(Resolved {
                    backend: Box::new(backend),
                    mode,
                    filename: None,
                });
            }
        } else {
            attempted.push(OriginAttempt {
                origin: Origin::File,
                reason: "local access disabled in remote mode".to_string(),
            });
        }

        if mode.allows_remote() {
            if let Some(client) = &self.context.remote {
                log::debug!("Trying remote API for {identifier}");
                let object = ObjectRef {
                    kind,
                    galid: identifier.to_string(),
                    versions: versions.clone(),
                    bintype: selectors.as_ref().map(|s| s.bintype.clone()),
                    template: selectors.as_ref().map(|s| s.template.clone()),
                };
                let backend = RemoteBackend::connect(kind, object, client.clone())?;
                log::info!("Serving {kind} {identifier} from remote API");
                return Ok(Resolved {
                    backend: Box::new(backend),
                    mode,
                    filename: None,
                });
            }
            attempted.push(OriginAttempt {
                origin: Origin::Remote,
                reason: "no remote client configured".to_string(),
            });
        } else {
            attempted.push(OriginAttempt {
                origin: Origin::Remote,
                reason: "remote access disabled in local mode".to_string(),
            });
        }

        Err(MarvinError::OriginResolution {
            target: identifier.to_string(),
            versions: versions.to_string(),
            attempted,
        })
    }

    fn resolve_file(
        &self,
        kind: DataKind,
        path: PathBuf,
        mode: DataMode,
        versions: &VersionContext,
        selectors: Option<Selectors>,
    ) -> MarvinResult<Resolved> {
        if mode == DataMode::Remote {
            return Err(MarvinError::Capability {
                operation: format!("open {}", path.display()),
                origin: Origin::Remote,
                reason: "explicit files are only read in local or auto mode".to_string(),
            });
        }
        if !path.is_file() {
            return Err(MarvinError::OriginResolution {
                target: path.display().to_string(),
                versions: versions.to_string(),
                attempted: vec![OriginAttempt {
                    origin: Origin::File,
                    reason: "file does not exist".to_string(),
                }],
            });
        }
        let backend = FileBackend::open(kind, &path, versions, selectors)?;
        log::info!("Serving {kind} from file {}", path.display());
        Ok(Resolved {
            backend: Box::new(backend),
            mode,
            filename: Some(path),
        })
    }

    /// Plate-IFU usable for local lookups; a mangaid needs the database.
    fn local_plateifu(
        &self,
        identifier: &Identifier,
        attempted: &mut Vec<OriginAttempt>,
    ) -> MarvinResult<Option<PlateIfu>> {
        match identifier {
            Identifier::PlateIfu(p) => Ok(Some(*p)),
            Identifier::MangaId(mangaid) => match &self.context.database {
                Some(db) => {
                    let found = db.resolve_mangaid(mangaid)?;
                    if found.is_none() {
                        attempted.push(OriginAttempt {
                            origin: Origin::File,
                            reason: format!("mangaid {mangaid} not known to the database"),
                        });
                    }
                    Ok(found)
                }
                None => {
                    attempted.push(OriginAttempt {
                        origin: Origin::File,
                        reason: "locating files by mangaid requires a database".to_string(),
                    });
                    Ok(None)
                }
            },
        }
    }

    fn try_file(
        &self,
        kind: DataKind,
        plateifu: PlateIfu,
        versions: &VersionContext,
        selectors: Option<&Selectors>,
        attempted: &mut Vec<OriginAttempt>,
    ) -> MarvinResult<Option<FileBackend>> {
        let params = product_params(kind, plateifu, versions, selectors);
        match self.context.paths.resolve(kind.path_template(), &params)? {
            Some(path) => {
                log::info!("Serving {kind} {plateifu} from file {}", path.display());
                Ok(Some(FileBackend::open(kind, &path, versions, selectors.cloned())?))
            }
            None => {
                log::debug!("No local {kind} file for {plateifu}");
                attempted.push(OriginAttempt {
                    origin: Origin::File,
                    reason: format!("no local {} file", kind.path_template()),
                });
                Ok(None)
            }
        }
    }

    fn try_database(
        &self,
        kind: DataKind,
        plateifu: Option<PlateIfu>,
        versions: &VersionContext,
        selectors: Option<&Selectors>,
        attempted: &mut Vec<OriginAttempt>,
    ) -> MarvinResult<Option<DatabaseBackend>> {
        let Some(db) = &self.context.database else {
            attempted.push(OriginAttempt {
                origin: Origin::Database,
                reason: "no database session".to_string(),
            });
            return Ok(None);
        };
        if !db.has_versions(kind, versions) {
            log::debug!("Database holds no {kind} for {versions}");
            attempted.push(OriginAttempt {
                origin: Origin::Database,
                reason: format!("{versions} not in database"),
            });
            return Ok(None);
        }
        let Some(plateifu) = plateifu else {
            attempted.push(OriginAttempt {
                origin: Origin::Database,
                reason: "target not in database".to_string(),
            });
            return Ok(None);
        };

        let key = DbKey::new(kind, plateifu, versions, selectors);
        match db.fetch_metadata(&key)? {
            Some(metadata) => {
                log::info!("Serving {kind} {plateifu} from database");
                Ok(Some(DatabaseBackend::new(key, metadata, versions, db.clone())))
            }
            None => Err(MarvinError::NotFound(format!(
                "{kind} {plateifu} not found in database for {versions}"
            ))),
        }
    }
}
