//! Multi-origin access to MaNGA data products
//!
//! This crate constructs Cube, Maps and ModelCube objects for one target
//! and serves them from a local file, a database session or a remote API,
//! behind one accessor surface: bulk arrays, spaxels, maps, related
//! objects and value-added catalogs.

pub mod api;
pub mod config;
pub mod database;
pub mod datamodel;
pub mod error;
pub mod fits;
pub mod header;
pub mod identifier;
pub mod maps;
pub mod object;
pub mod origin;
pub mod paths;
pub mod remote;
pub mod spaxel;
pub mod synthetic;
pub mod vacs;
pub mod versions;
pub mod wcs;
pub mod web;

// Re-exports for easier access
pub use api::ApiService;
pub use config::{DataMode, MarvinConfig, MarvinContext};
pub use database::{DatabaseSession, InMemoryDatabase};
pub use datamodel::{DataKind, Selectors};
pub use error::{ErrorKind, MarvinError, MarvinResult};
pub use identifier::{MangaId, ObjectRequest, PlateIfu, Target};
pub use maps::{Map, MapDict};
pub use object::DataObject;
pub use origin::Origin;
pub use spaxel::{PixelOrigin, Spaxel, SpaxelOptions, SpaxelQuery};
pub use vacs::{VacData, VacRegistry};
pub use versions::{DapVersion, VersionContext};
