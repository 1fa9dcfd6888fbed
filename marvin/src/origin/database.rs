//! Database session backend.

use super::{assemble_map, assemble_spaxel, Backend, ObjectMetadata, Origin};
use crate::database::{DatabaseSession, DbKey, DbMetadata};
use crate::datamodel::{DataKind, MapProperty};
use crate::error::{MarvinError, MarvinResult};
use crate::identifier::Target;
use crate::maps::MapData;
use crate::spaxel::SpaxelData;
use crate::versions::VersionContext;
use ndarray::ArrayD;
use std::sync::Arc;

/// Serves a product row of a database session.
pub struct DatabaseBackend {
    key: DbKey,
    metadata: ObjectMetadata,
    session: Arc<dyn DatabaseSession>,
}

impl DatabaseBackend {
    pub fn new(
        key: DbKey,
        row: DbMetadata,
        versions: &VersionContext,
        session: Arc<dyn DatabaseSession>,
    ) -> Self {
        let metadata = ObjectMetadata {
            target: Target {
                plateifu: key.plateifu,
                mangaid: row.mangaid,
            },
            header: row.header,
            shape: row.shape,
            versions: versions.clone(),
            selectors: key.selectors.clone(),
        };
        Self {
            key,
            metadata,
            session,
        }
    }

    pub fn key(&self) -> &DbKey {
        &self.key
    }
}

impl Backend for DatabaseBackend {
    fn origin(&self) -> Origin {
        Origin::Database
    }

    fn load_header(&self) -> MarvinResult<ObjectMetadata> {
        Ok(self.metadata.clone())
    }

    fn load_array(&self, name: &str) -> MarvinResult<ArrayD<f64>> {
        log::debug!("Querying {name} for {}", self.key.plateifu);
        self.session.fetch_array(&self.key, name)
    }

    fn load_spaxel(&self, x: usize, y: usize) -> MarvinResult<SpaxelData> {
        assemble_spaxel(
            self.key.kind,
            &self.metadata.versions,
            |name| self.session.fetch_series(&self.key, name, x, y),
            |name| {
                let array = self.session.fetch_array(&self.key, name)?;
                Ok(array.iter().copied().collect())
            },
        )
    }

    fn load_map(&self, property: &MapProperty, channel: Option<&str>) -> MarvinResult<MapData> {
        if self.key.kind != DataKind::Maps {
            return Err(MarvinError::InvalidData(format!("{} holds no maps", self.key.kind)));
        }
        assemble_map(property, channel, |name, index| {
            self.session.fetch_plane(&self.key, name, index)
        })
    }
}
