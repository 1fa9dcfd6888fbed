//! Remote API wire types and client.
//!
//! Each request names the object (identifier, versions, selectors) and one
//! bounded operation. Responses arrive in an [`ApiEnvelope`]; a status other
//! than 1 carries the server-side error, which is surfaced with its original
//! [`ErrorKind`].

use crate::datamodel::{DataKind, Selectors};
use crate::error::{ErrorKind, MarvinError};
use crate::header::Header;
use crate::identifier::{MangaId, PlateIfu};
use crate::versions::VersionContext;
use crate::wcs::SpatialShape;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Errors talking to the remote API.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Timeout")]
    Timeout,
    #[error("Server error (status {status}): {message}")]
    ServerError { status: u16, message: String },
    /// The server processed the request and reported a failure.
    #[error("{message}")]
    Rejected { kind: ErrorKind, message: String },
}

impl From<ureq::Error> for RemoteError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(status) => RemoteError::ServerError {
                status,
                message: "request failed".to_string(),
            },
            ureq::Error::Timeout(_) => RemoteError::Timeout,
            ureq::Error::Io(e) => RemoteError::Connection(e.to_string()),
            other => RemoteError::Http(other.to_string()),
        }
    }
}

/// Which remote object a request is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: DataKind,
    /// Plate-IFU or mangaid.
    pub galid: String,
    pub versions: VersionContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bintype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// Operations the remote API serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum RemoteRequest {
    Construct {
        object: ObjectRef,
    },
    GetHeader {
        object: ObjectRef,
    },
    GetSpaxel {
        object: ObjectRef,
        x: usize,
        y: usize,
    },
    GetMap {
        object: ObjectRef,
        parameter: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
}

impl RemoteRequest {
    pub fn object(&self) -> &ObjectRef {
        match self {
            RemoteRequest::Construct { object }
            | RemoteRequest::GetHeader { object }
            | RemoteRequest::GetSpaxel { object, .. }
            | RemoteRequest::GetMap { object, .. } => object,
        }
    }

    /// URL path of the request relative to the API root.
    pub fn route(&self) -> String {
        let collection = match self.object().kind {
            DataKind::Cube => "cubes",
            DataKind::Maps => "maps",
            DataKind::ModelCube => "modelcubes",
        };
        let operation = match self {
            RemoteRequest::Construct { .. } => "construct",
            RemoteRequest::GetHeader { .. } => "header",
            RemoteRequest::GetSpaxel { .. } => "spaxel",
            RemoteRequest::GetMap { .. } => "map",
        };
        format!("{collection}/{operation}")
    }
}

/// Identity and layout of a remotely constructed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSummary {
    pub plateifu: PlateIfu,
    pub mangaid: MangaId,
    pub shape: SpatialShape,
    pub versions: VersionContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<Selectors>,
}

/// Results envelope of every API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
    pub data: Option<Value>,
    /// -1 until processed, 1 on success.
    pub status: i32,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl Default for ApiEnvelope {
    fn default() -> Self {
        Self {
            data: None,
            status: -1,
            error: None,
            error_kind: None,
        }
    }
}

impl ApiEnvelope {
    pub fn success<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                data: Some(value),
                status: 1,
                ..Self::default()
            },
            Err(e) => Self {
                status: 0,
                error: Some(format!("cannot serialize response: {e}")),
                error_kind: Some(ErrorKind::InvalidData),
                ..Self::default()
            },
        }
    }

    pub fn failure(err: &MarvinError) -> Self {
        Self {
            status: 0,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Self::default()
        }
    }

    /// Decode the payload, or the server's error.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, RemoteError> {
        if self.status != 1 {
            return Err(RemoteError::Rejected {
                kind: self.error_kind.unwrap_or(ErrorKind::Remote),
                message: self
                    .error
                    .unwrap_or_else(|| format!("request failed with status {}", self.status)),
            });
        }
        let data = self
            .data
            .ok_or_else(|| RemoteError::Parse("response carries no data".to_string()))?;
        serde_json::from_value(data).map_err(|e| RemoteError::Parse(e.to_string()))
    }
}

/// Transport to the remote API.
pub trait RemoteClient: Send + Sync {
    fn send(&self, request: &RemoteRequest) -> Result<ApiEnvelope, RemoteError>;
}

/// Send `request` and decode its payload.
pub fn call<T: DeserializeOwned>(
    client: &dyn RemoteClient,
    request: &RemoteRequest,
) -> Result<T, RemoteError> {
    log::debug!("Remote call {}", request.route());
    client.send(request)?.into_result()
}

/// Blocking JSON-over-HTTP client.
pub struct HttpRemoteClient {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpRemoteClient {
    /// # Arguments
    /// * `base_url` - API root, e.g. `https://api.sdss.org/marvin/api`
    /// * `timeout` - Timeout applied to each call
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl RemoteClient for HttpRemoteClient {
    fn send(&self, request: &RemoteRequest) -> Result<ApiEnvelope, RemoteError> {
        let url = format!("{}/{}/", self.base_url, request.route());
        let mut response = self.agent.post(&url).send_json(request)?;

        let status = response.status().as_u16();
        if status != 200 {
            let message = response
                .body_mut()
                .read_to_string()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RemoteError::ServerError { status, message });
        }

        response
            .body_mut()
            .read_json::<ApiEnvelope>()
            .map_err(|e| RemoteError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object() -> ObjectRef {
        ObjectRef {
            kind: DataKind::Maps,
            galid: "8485-1901".to_string(),
            versions: VersionContext::parse("v2_0_1", "2.0.2").unwrap(),
            bintype: Some("SPX".to_string()),
            template: None,
        }
    }

    #[test]
    fn test_fresh_envelope() {
        let env = ApiEnvelope::default();
        assert_eq!(env.status, -1);
        assert!(env.data.is_none() && env.error.is_none());
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], -1);
        assert!(json["data"].is_null());
    }

    #[test]
    fn test_request_wire_format() {
        let req = RemoteRequest::GetMap {
            object: object(),
            parameter: "emline_gflux".to_string(),
            channel: Some("ha_6564".to_string()),
        };
        assert_eq!(req.route(), "maps/map");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["operation"], "get_map");
        assert_eq!(json["object"]["versions"]["dapver"], "2.0.2");
        let back: RemoteRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_envelope_results() {
        let ok = ApiEnvelope::success(&vec![1.0, 2.5]);
        assert_eq!(ok.status, 1);
        let values: Vec<f64> = ok.into_result().unwrap();
        assert_eq!(values, vec![1.0, 2.5]);

        let err = MarvinError::NotFound("unknown map foo".to_string());
        let failed = ApiEnvelope::failure(&err);
        match failed.into_result::<Vec<f64>>().unwrap_err() {
            RemoteError::Rejected { kind, message } => {
                assert_eq!(kind, ErrorKind::NotFound);
                assert!(message.contains("unknown map foo"));
            }
            other => panic!("unexpected error {other:?}"),
        }

        let unprocessed = ApiEnvelope::default();
        assert!(unprocessed.into_result::<Value>().is_err());
    }
}
