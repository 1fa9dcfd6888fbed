//! Server side of the remote API.
//!
//! [`ApiService`] answers [`RemoteRequest`]s from local data only, so a
//! host can serve remote clients from files or a database. It also
//! implements [`RemoteClient`], which lets a remote-mode object talk to a
//! local service in-process.

use crate::config::{DataMode, MarvinContext};
use crate::error::{MarvinError, MarvinResult};
use crate::identifier::ObjectRequest;
use crate::object::DataObject;
use crate::remote::{ApiEnvelope, ObjectRef, RemoteClient, RemoteError, RemoteRequest, RemoteSummary};

/// Answers remote API requests from a local context.
#[derive(Debug, Clone)]
pub struct ApiService {
    context: MarvinContext,
}

impl ApiService {
    /// Serve from `context`, restricted to local origins.
    pub fn new(context: MarvinContext) -> Self {
        Self {
            context: context.without_remote().with_mode(DataMode::Local),
        }
    }

    pub fn context(&self) -> &MarvinContext {
        &self.context
    }

    /// Answer one request; failures are reported inside the envelope.
    pub fn handle(&self, request: &RemoteRequest) -> ApiEnvelope {
        match self.dispatch(request) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("API {} failed: {e}", request.route());
                ApiEnvelope::failure(&e)
            }
        }
    }

    /// Answer a JSON-encoded request with a JSON-encoded envelope.
    pub fn handle_json(&self, body: &str) -> String {
        let envelope = match serde_json::from_str::<RemoteRequest>(body) {
            Ok(request) => self.handle(&request),
            Err(e) => ApiEnvelope::failure(&MarvinError::Identifier(format!("malformed request: {e}"))),
        };
        serde_json::to_string(&envelope).unwrap_or_else(|e| {
            format!(r#"{{"data":null,"status":0,"error":"cannot encode response: {e}"}}"#)
        })
    }

    fn construct(&self, object: &ObjectRef) -> MarvinResult<DataObject> {
        let mut request = ObjectRequest::galaxy_id(&object.galid)?.with_versions(object.versions.clone());
        if let Some(bintype) = &object.bintype {
            request = request.with_bintype(bintype.clone());
        }
        if let Some(template) = &object.template {
            request = request.with_template(template.clone());
        }
        DataObject::construct(object.kind, &request, &self.context)
    }

    fn dispatch(&self, request: &RemoteRequest) -> MarvinResult<ApiEnvelope> {
        log::debug!("API {} for {}", request.route(), request.object().galid);
        let object = self.construct(request.object())?;
        let envelope = match request {
            RemoteRequest::Construct { .. } => ApiEnvelope::success(&RemoteSummary {
                plateifu: object.plateifu(),
                mangaid: object.mangaid().clone(),
                shape: object.shape(),
                versions: object.versions().clone(),
                selectors: object.selectors().cloned(),
            }),
            RemoteRequest::GetHeader { .. } => ApiEnvelope::success(object.header()),
            RemoteRequest::GetSpaxel { x, y, .. } => ApiEnvelope::success(&object.spaxel_data(*x, *y)?),
            RemoteRequest::GetMap {
                parameter, channel, ..
            } => {
                let map = object.get_map(parameter, channel.as_deref())?;
                ApiEnvelope::success(&map.data)
            }
        };
        Ok(envelope)
    }
}

impl RemoteClient for ApiService {
    fn send(&self, request: &RemoteRequest) -> Result<ApiEnvelope, RemoteError> {
        let body = serde_json::to_string(request).map_err(|e| RemoteError::Parse(e.to_string()))?;
        let response = self.handle_json(&body);
        serde_json::from_str(&response).map_err(|e| RemoteError::Parse(e.to_string()))
    }
}
