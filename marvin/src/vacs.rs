//! Value-added catalog attachment.
//!
//! VACs are registered in a [`VacRegistry`] at startup; each data object
//! gets a [`VacContainer`] that resolves, downloads if needed, loads and
//! caches a VAC on first access.

use crate::config::MarvinContext;
use crate::datamodel::DataKind;
use crate::error::{ItemFailure, MarvinError, MarvinResult};
use crate::fits::{FitsReader, FitsTable};
use crate::identifier::Target;
use crate::paths::{path_params, PathParams};
use crate::versions::{DapVersion, VersionContext};
use ndarray::ArrayD;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Reads a VAC file into memory for one target.
pub type VacLoader = fn(&Path, &Target) -> MarvinResult<VacData>;

/// Context of the error raised when some VACs could not be loaded.
pub const VAC_SET_FAILURE: &str = "could not load one of the requested VACs";

/// Registration entry of one VAC.
#[derive(Debug, Clone)]
pub struct VacDefinition {
    pub name: String,
    pub description: String,
    /// Release version of the VAC itself.
    pub version: String,
    /// Data release the VAC was built from.
    pub dataset_version: String,
    /// Path template locating the VAC file.
    pub path_template: String,
    /// Object kinds the VAC attaches to.
    pub targets: Vec<DataKind>,
    pub min_dapver: Option<DapVersion>,
    pub loader: VacLoader,
}

impl VacDefinition {
    /// Template parameters for `target`.
    pub fn path_params(&self, target: &Target) -> PathParams {
        path_params(&[
            ("ver", self.version.clone()),
            ("drpver", self.dataset_version.clone()),
            ("plate", target.plate().to_string()),
            ("ifu", target.ifu().to_string()),
        ])
    }

    /// Whether the VAC attaches to an object of `kind` at `versions`.
    pub fn applies_to(&self, kind: DataKind, versions: &VersionContext) -> bool {
        self.targets.contains(&kind) && self.min_dapver.map_or(true, |min| versions.dapver >= min)
    }
}

/// VACs known to the process, by name.
#[derive(Debug, Clone, Default)]
pub struct VacRegistry {
    definitions: BTreeMap<String, VacDefinition>,
}

impl VacRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in VACs.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(firefly());
        registry
    }

    /// Add a VAC, replacing any registered under the same name.
    pub fn register(&mut self, definition: VacDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&VacDefinition> {
        self.definitions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// VACs attaching to `kind` at `versions`.
    pub fn available(&self, kind: DataKind, versions: &VersionContext) -> Vec<&VacDefinition> {
        self.definitions
            .values()
            .filter(|d| d.applies_to(kind, versions))
            .collect()
    }
}

/// A binary-table VAC and the row matching the target.
#[derive(Debug, Clone, PartialEq)]
pub struct VacTable {
    pub table: FitsTable,
    pub target_row: Option<usize>,
}

impl VacTable {
    /// Values of the target's row, if the table holds one.
    pub fn target_values(&self) -> Option<BTreeMap<String, f64>> {
        self.target_row.and_then(|i| self.table.row(i))
    }
}

/// In-memory form of a loaded VAC.
#[derive(Debug, Clone, PartialEq)]
pub enum VacData {
    Table(VacTable),
    Image(ArrayD<f64>),
}

impl VacData {
    pub fn as_table(&self) -> Option<&VacTable> {
        match self {
            VacData::Table(t) => Some(t),
            VacData::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&ArrayD<f64>> {
        match self {
            VacData::Image(a) => Some(a),
            VacData::Table(_) => None,
        }
    }
}

/// Per-object VAC namespace.
///
/// A loaded VAC is cached for the lifetime of the object; later accesses
/// return it without touching the filesystem or the network. Failures are
/// not cached.
#[derive(Debug)]
pub struct VacContainer {
    kind: DataKind,
    target: Target,
    versions: VersionContext,
    context: MarvinContext,
    loaded: RefCell<BTreeMap<String, Arc<VacData>>>,
}

impl VacContainer {
    pub(crate) fn new(
        kind: DataKind,
        target: Target,
        versions: VersionContext,
        context: MarvinContext,
    ) -> Self {
        Self {
            kind,
            target,
            versions,
            context,
            loaded: RefCell::new(BTreeMap::new()),
        }
    }

    /// Names of the VACs available to this object.
    pub fn names(&self) -> Vec<String> {
        self.context
            .vacs
            .available(self.kind, &self.versions)
            .into_iter()
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.borrow().contains_key(name)
    }

    /// Load a VAC on first access and return the cached copy afterwards.
    pub fn get(&self, name: &str) -> MarvinResult<Arc<VacData>> {
        if let Some(data) = self.loaded.borrow().get(name) {
            return Ok(data.clone());
        }

        let definition = self
            .context
            .vacs
            .get(name)
            .ok_or_else(|| MarvinError::NotFound(format!("no VAC named {name}")))?;
        if !definition.applies_to(self.kind, &self.versions) {
            return Err(MarvinError::NotFound(format!(
                "VAC {name} is not available for {} at {}",
                self.kind, self.versions
            )));
        }

        let params = definition.path_params(&self.target);
        let path = match self.context.paths.resolve(&definition.path_template, &params)? {
            Some(path) => path,
            None => {
                let downloader = self.context.downloader.as_ref().ok_or_else(|| {
                    MarvinError::NotFound(format!(
                        "VAC {name} {} is not available locally and downloads are disabled",
                        definition.version
                    ))
                })?;
                log::info!("Downloading VAC {name} {}", definition.version);
                downloader.download(&definition.path_template, &params)?
            }
        };

        log::debug!("Loading VAC {name} from {}", path.display());
        let data = Arc::new((definition.loader)(&path, &self.target)?);
        self.loaded.borrow_mut().insert(name.to_string(), data.clone());
        Ok(data)
    }

    /// Load every available VAC, failing with the list of those that could not be loaded.
    pub fn load_all(&self) -> MarvinResult<BTreeMap<String, Arc<VacData>>> {
        let mut loaded = BTreeMap::new();
        let mut failures: Vec<ItemFailure> = Vec::new();
        for name in self.names() {
            match self.get(&name) {
                Ok(data) => {
                    loaded.insert(name, data);
                }
                Err(e) => {
                    log::warn!("VAC {name} unavailable: {e}");
                    failures.push(e.as_item_failure(name));
                }
            }
        }
        if failures.is_empty() {
            Ok(loaded)
        } else {
            Err(MarvinError::PartialFailure {
                context: VAC_SET_FAILURE.to_string(),
                failures,
            })
        }
    }
}

/// Load the first binary table of a VAC file and locate the target by plate and IFU.
pub fn load_plate_ifu_table(path: &Path, target: &Target) -> MarvinResult<VacData> {
    let table = FitsReader::open(path)?.read_first_table()?;
    let target_row = table.find_row(&[
        ("PLATE", f64::from(target.plate())),
        ("IFUDSGN", f64::from(target.ifu())),
    ]);
    if target_row.is_none() {
        log::warn!("No row for {} in {}", target.plateifu, path.display());
    }
    Ok(VacData::Table(VacTable { table, target_row }))
}

/// FIREFLY stellar population fits, built from the DR15 analysis.
pub fn firefly() -> VacDefinition {
    VacDefinition {
        name: "mangaffly".to_string(),
        description: "FIREFLY stellar population fits".to_string(),
        version: "v1_1_2".to_string(),
        dataset_version: "v2_4_3".to_string(),
        path_template: "mangaffly".to_string(),
        targets: vec![DataKind::Cube, DataKind::Maps, DataKind::ModelCube],
        min_dapver: Some(DapVersion::new(2, 2, 1)),
        loader: load_plate_ifu_table,
    }
}
