//! Cube, Maps and ModelCube data objects.
//!
//! A [`DataObject`] is constructed once through the origin resolver, loads
//! its header, WCS and shape eagerly, and loads everything else on demand
//! through its backend. Bulk arrays, maps, related objects and VACs are
//! memoized per object; nothing is shared between objects.

use crate::config::{DataMode, MarvinContext};
use crate::datamodel::{self, DataKind, Selectors};
use crate::error::{MarvinError, MarvinResult};
use crate::header::Header;
use crate::identifier::{MangaId, ObjectRequest, PlateIfu, Target};
use crate::maps::Map;
use crate::origin::{Backend, Operation, Origin, OriginResolver};
use crate::spaxel::{Spaxel, SpaxelData, SpaxelOptions, SpaxelQuery};
use crate::vacs::VacContainer;
use crate::versions::VersionContext;
use crate::wcs::{SpatialShape, Wcs};
use ndarray::ArrayD;
use once_cell::unsync::OnceCell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One constructed Cube, Maps or ModelCube.
pub struct DataObject {
    kind: DataKind,
    target: Target,
    versions: VersionContext,
    selectors: Option<Selectors>,
    mode: DataMode,
    origin: Origin,
    filename: Option<PathBuf>,
    header: Header,
    wcs: Wcs,
    shape: SpatialShape,
    backend: Box<dyn Backend>,
    context: MarvinContext,
    arrays: RefCell<HashMap<String, Arc<ArrayD<f64>>>>,
    maps: RefCell<HashMap<String, Arc<Map>>>,
    related_cube: OnceCell<Box<DataObject>>,
    related_maps: OnceCell<Box<DataObject>>,
    related_modelcube: OnceCell<Box<DataObject>>,
    vacs: VacContainer,
}

impl DataObject {
    /// Resolve an origin for `request` and load the object's metadata.
    ///
    /// Version gating runs before any origin is tried, so an unsupported
    /// analysis version fails the same way whether or not data exists
    /// locally. No bulk array is read here.
    pub fn construct(
        kind: DataKind,
        request: &ObjectRequest,
        context: &MarvinContext,
    ) -> MarvinResult<Self> {
        let resolved = OriginResolver::new(context).resolve(kind, request)?;
        let backend = resolved.backend;
        let origin = backend.origin();

        backend.permits(&Operation::Header)?;
        let metadata = backend.load_header()?;
        if let Some(minimum) = datamodel::min_dapver(kind) {
            metadata.versions.require_dapver(kind.name(), minimum)?;
        }
        let wcs = Wcs::from_header(&metadata.header)?;

        log::info!(
            "Constructed {kind} {} ({}) from {origin}, shape {}x{}",
            metadata.target.plateifu,
            metadata.versions,
            metadata.shape.rows,
            metadata.shape.cols
        );

        let vacs = VacContainer::new(
            kind,
            metadata.target.clone(),
            metadata.versions.clone(),
            context.clone(),
        );

        Ok(Self {
            kind,
            target: metadata.target,
            versions: metadata.versions,
            selectors: metadata.selectors,
            mode: resolved.mode,
            origin,
            filename: resolved.filename,
            header: metadata.header,
            wcs,
            shape: metadata.shape,
            backend,
            context: context.clone(),
            arrays: RefCell::new(HashMap::new()),
            maps: RefCell::new(HashMap::new()),
            related_cube: OnceCell::new(),
            related_maps: OnceCell::new(),
            related_modelcube: OnceCell::new(),
            vacs,
        })
    }

    pub fn cube(request: &ObjectRequest, context: &MarvinContext) -> MarvinResult<Self> {
        Self::construct(DataKind::Cube, request, context)
    }

    pub fn maps(request: &ObjectRequest, context: &MarvinContext) -> MarvinResult<Self> {
        Self::construct(DataKind::Maps, request, context)
    }

    pub fn modelcube(request: &ObjectRequest, context: &MarvinContext) -> MarvinResult<Self> {
        Self::construct(DataKind::ModelCube, request, context)
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn plateifu(&self) -> PlateIfu {
        self.target.plateifu
    }

    pub fn mangaid(&self) -> &MangaId {
        &self.target.mangaid
    }

    pub fn versions(&self) -> &VersionContext {
        &self.versions
    }

    /// Analysis variant; `None` for cubes.
    pub fn selectors(&self) -> Option<&Selectors> {
        self.selectors.as_ref()
    }

    pub fn bintype(&self) -> Option<&str> {
        self.selectors.as_ref().map(|s| s.bintype.as_str())
    }

    pub fn template(&self) -> Option<&str> {
        self.selectors.as_ref().map(|s| s.template.as_str())
    }

    pub fn mode(&self) -> DataMode {
        self.mode
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Local file the object is served from, if any.
    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn wcs(&self) -> &Wcs {
        &self.wcs
    }

    pub fn shape(&self) -> SpatialShape {
        self.shape
    }

    pub fn context(&self) -> &MarvinContext {
        &self.context
    }

    /// A bulk array by data model name, loaded once and cached.
    ///
    /// Remote objects refuse this with a capability error instead of
    /// transferring the array.
    pub fn get_bulk_array(&self, name: &str) -> MarvinResult<Arc<ArrayD<f64>>> {
        if !datamodel::has_array(self.kind, self.versions.dapver, name) {
            return Err(MarvinError::NotFound(format!("{} has no array {name}", self.kind)));
        }
        self.backend.permits(&Operation::BulkArray(name.to_string()))?;

        if let Some(array) = self.arrays.borrow().get(name) {
            return Ok(array.clone());
        }

        let array = if datamodel::derived_arrays(self.kind).contains(&name) {
            self.derive_array(name)?
        } else {
            log::debug!("Loading {name} for {} {}", self.kind, self.target.plateifu);
            self.backend.load_array(name)?
        };
        self.check_array_shape(name, &array)?;

        let array = Arc::new(array);
        self.arrays.borrow_mut().insert(name.to_string(), array.clone());
        Ok(array)
    }

    fn derive_array(&self, name: &str) -> MarvinResult<ArrayD<f64>> {
        match name {
            "stellar_continuum" => {
                let model = self.get_bulk_array("model")?;
                let emline = self.get_bulk_array("emline")?;
                let emline_base = self.get_bulk_array("emline_base")?;
                Ok(&(&*model - &*emline) - &*emline_base)
            }
            other => Err(MarvinError::NotFound(format!("{} has no array {other}", self.kind))),
        }
    }

    fn check_array_shape(&self, name: &str, array: &ArrayD<f64>) -> MarvinResult<()> {
        let spatial = self.kind == DataKind::Maps
            || datamodel::is_spectral(self.kind, name)
            || datamodel::derived_arrays(self.kind).contains(&name);
        if !spatial {
            return Ok(());
        }
        match array.shape() {
            [.., rows, cols] if (*rows, *cols) == self.shape.to_tuple() => Ok(()),
            other => Err(MarvinError::InvalidData(format!(
                "{name} has shape {other:?}, expected spatial shape {:?}",
                self.shape.to_tuple()
            ))),
        }
    }

    /// The part of spaxel (x, y) this object's own product holds.
    pub fn spaxel_data(&self, x: usize, y: usize) -> MarvinResult<SpaxelData> {
        if x >= self.shape.cols || y >= self.shape.rows {
            return Err(MarvinError::Identifier(format!(
                "spaxel ({x}, {y}) is outside the {}x{} grid",
                self.shape.cols, self.shape.rows
            )));
        }
        self.backend.permits(&Operation::Spaxel)?;
        self.backend.load_spaxel(x, y)
    }

    /// Extract one spaxel.
    ///
    /// The query is converted to array indices and bounds-checked before
    /// any backend is touched. Categories this product does not hold are
    /// taken from the related object that does; categories not requested
    /// stay empty.
    pub fn get_spaxel(&self, query: &SpaxelQuery, options: SpaxelOptions) -> MarvinResult<Spaxel<'_>> {
        let (x, y) = query.to_array_index(self.shape, &self.wcs)?;
        let mut spaxel = Spaxel::new(self, x, y);

        if options.spectrum {
            let source = self.provider(DataKind::Cube)?;
            spaxel.spectrum = Some(source.spaxel_data(x, y)?.into_spectrum()?);
        }
        if options.properties {
            let source = self.provider(DataKind::Maps)?;
            spaxel.properties = Some(source.spaxel_data(x, y)?.into_properties()?);
        }
        if options.model {
            let source = self.provider(DataKind::ModelCube)?;
            spaxel.model = Some(source.spaxel_data(x, y)?.into_model()?);
        }
        Ok(spaxel)
    }

    /// Spaxel at array indices with the defaults for this kind.
    pub fn spaxel(&self, x: i64, y: i64) -> MarvinResult<Spaxel<'_>> {
        self.get_spaxel(&SpaxelQuery::pixel(x, y), SpaxelOptions::for_kind(self.kind))
    }

    fn provider(&self, kind: DataKind) -> MarvinResult<&DataObject> {
        if kind == self.kind {
            Ok(self)
        } else {
            self.get_related(kind)
        }
    }

    /// One analysis map, validated against this version's properties.
    ///
    /// Cubes and ModelCubes answer through their related Maps object.
    pub fn get_map(&self, parameter: &str, channel: Option<&str>) -> MarvinResult<Arc<Map>> {
        let (property, _) = datamodel::validate_map(self.versions.dapver, parameter, channel)?;
        if self.kind != DataKind::Maps {
            return self.get_related(DataKind::Maps)?.get_map(parameter, channel);
        }

        let key = property.full_name(channel);
        if let Some(map) = self.maps.borrow().get(&key) {
            return Ok(map.clone());
        }

        self.backend.permits(&Operation::Map)?;
        let data = self.backend.load_map(&property, channel)?;
        let found = data.validate()?;
        if found != self.shape.to_tuple() {
            return Err(MarvinError::InvalidData(format!(
                "map {key} has shape {found:?}, expected {:?}",
                self.shape.to_tuple()
            )));
        }
        let selectors = self
            .selectors
            .as_ref()
            .ok_or_else(|| MarvinError::InvalidData(format!("{} has no bintype/template", self.kind)))?;

        let map = Arc::new(Map {
            parameter: property.name.clone(),
            channel: channel.map(str::to_string),
            unit: property.unit.clone(),
            bintype: selectors.bintype.clone(),
            template: selectors.template.clone(),
            data,
        });
        self.maps.borrow_mut().insert(key, map.clone());
        Ok(map)
    }

    /// The associated object of another kind for the same target.
    ///
    /// The related object inherits this object's versions, mode and
    /// selectors, is constructed once, and must share its spatial grid.
    pub fn get_related(&self, kind: DataKind) -> MarvinResult<&DataObject> {
        if kind == self.kind {
            return Ok(self);
        }
        let cell = match kind {
            DataKind::Cube => &self.related_cube,
            DataKind::Maps => &self.related_maps,
            DataKind::ModelCube => &self.related_modelcube,
        };
        let related = cell.get_or_try_init(|| {
            let selectors = self.selectors.clone();
            self.build_related(kind, selectors.as_ref()).map(Box::new)
        })?;
        Ok(related.as_ref())
    }

    /// A related object of `kind` with an explicit analysis variant.
    ///
    /// Not cached; each call constructs a new object.
    pub fn related_with(&self, kind: DataKind, selectors: &Selectors) -> MarvinResult<DataObject> {
        self.build_related(kind, Some(selectors))
    }

    fn build_related(&self, kind: DataKind, selectors: Option<&Selectors>) -> MarvinResult<DataObject> {
        let mut request = ObjectRequest::plateifu(self.target.plateifu.to_string())
            .with_versions(self.versions.clone())
            .with_mode(self.mode);
        if let Some(sel) = selectors.filter(|_| kind.is_analysis()) {
            request = request
                .with_bintype(sel.bintype.clone())
                .with_template(sel.template.clone());
        }

        log::debug!("Building related {kind} for {} {}", self.kind, self.target.plateifu);
        let related = DataObject::construct(kind, &request, &self.context)?;
        if related.shape != self.shape {
            return Err(MarvinError::ShapeMismatch {
                related: format!("{kind} {}", related.target.plateifu),
                expected: self.shape.to_tuple(),
                found: related.shape.to_tuple(),
            });
        }
        Ok(related)
    }

    /// VACs attached to this object.
    pub fn vacs(&self) -> &VacContainer {
        &self.vacs
    }
}

impl fmt::Debug for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DataObject")
            .field("kind", &self.kind)
            .field("plateifu", &self.target.plateifu)
            .field("mangaid", &self.target.mangaid)
            .field("versions", &self.versions)
            .field("selectors", &self.selectors)
            .field("origin", &self.origin)
            .field("mode", &self.mode)
            .field("shape", &self.shape)
            .finish()
    }
}

impl fmt::Display for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Marvin {}(plateifu='{}', mode='{}', data_origin='{}')>",
            self.kind.name(),
            self.target.plateifu,
            self.mode,
            self.origin
        )
    }
}
