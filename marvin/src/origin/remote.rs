//! Remote API backend.
//!
//! Only bounded operations cross the network: construction, header, one
//! spaxel, one map. Anything needing a full array is refused rather than
//! rebuilt from many small calls.

use super::{Backend, ObjectMetadata, Operation, Origin};
use crate::datamodel::{DataKind, MapProperty};
use crate::error::{MarvinError, MarvinResult};
use crate::header::Header;
use crate::identifier::Target;
use crate::maps::MapData;
use crate::remote::{call, ObjectRef, RemoteClient, RemoteRequest, RemoteSummary};
use crate::spaxel::SpaxelData;
use ndarray::ArrayD;
use std::sync::Arc;

/// Proxy for an object held by the remote API.
pub struct RemoteBackend {
    kind: DataKind,
    object: ObjectRef,
    summary: RemoteSummary,
    client: Arc<dyn RemoteClient>,
}

impl RemoteBackend {
    /// Construct the object remotely.
    ///
    /// The returned summary pins the identity, versions and selectors that
    /// later calls use.
    pub fn connect(kind: DataKind, object: ObjectRef, client: Arc<dyn RemoteClient>) -> MarvinResult<Self> {
        let summary: RemoteSummary = call(client.as_ref(), &RemoteRequest::Construct {
            object: object.clone(),
        })?;
        let object = ObjectRef {
            kind,
            galid: summary.plateifu.to_string(),
            versions: summary.versions.clone(),
            bintype: summary.selectors.as_ref().map(|s| s.bintype.clone()),
            template: summary.selectors.as_ref().map(|s| s.template.clone()),
        };
        Ok(Self {
            kind,
            object,
            summary,
            client,
        })
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }
}

impl Backend for RemoteBackend {
    fn origin(&self) -> Origin {
        Origin::Remote
    }

    fn permits(&self, operation: &Operation) -> MarvinResult<()> {
        match operation {
            Operation::Header | Operation::Spaxel | Operation::Map => Ok(()),
            Operation::BulkArray(_) => Err(MarvinError::Capability {
                operation: operation.to_string(),
                origin: Origin::Remote,
                reason: "cannot return full array in remote mode".to_string(),
            }),
        }
    }

    fn load_header(&self) -> MarvinResult<ObjectMetadata> {
        self.permits(&Operation::Header)?;
        let header: Header = call(self.client.as_ref(), &RemoteRequest::GetHeader {
            object: self.object.clone(),
        })?;
        Ok(ObjectMetadata {
            target: Target {
                plateifu: self.summary.plateifu,
                mangaid: self.summary.mangaid.clone(),
            },
            header,
            shape: self.summary.shape,
            versions: self.summary.versions.clone(),
            selectors: self.summary.selectors.clone(),
        })
    }

    fn load_array(&self, name: &str) -> MarvinResult<ArrayD<f64>> {
        self.permits(&Operation::BulkArray(name.to_string()))?;
        Err(MarvinError::InvalidData(format!(
            "{} array {name} is not served remotely",
            self.kind
        )))
    }

    fn load_spaxel(&self, x: usize, y: usize) -> MarvinResult<SpaxelData> {
        self.permits(&Operation::Spaxel)?;
        Ok(call(self.client.as_ref(), &RemoteRequest::GetSpaxel {
            object: self.object.clone(),
            x,
            y,
        })?)
    }

    fn load_map(&self, property: &MapProperty, channel: Option<&str>) -> MarvinResult<MapData> {
        self.permits(&Operation::Map)?;
        let data: MapData = call(self.client.as_ref(), &RemoteRequest::GetMap {
            object: self.object.clone(),
            parameter: property.name.clone(),
            channel: channel.map(str::to_string),
        })?;
        data.validate()?;
        Ok(data)
    }
}
