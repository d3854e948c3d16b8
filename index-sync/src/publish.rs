//! Publishing the query surface under a well-known identity.
//!
//! Only the first engine to claim an identity publishes it; later engines
//! adopt the existing publication and keep serving direct calls.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::IndexSync;
use crate::error::{Result, SyncError};

/// Name and object path the query surface is published under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceIdentity {
    pub service_name: String,
    pub object_path: String,
}

impl ServiceIdentity {
    pub fn new(service_name: impl Into<String>, object_path: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            object_path: object_path.into(),
        }
    }
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self::new("io.anything.IndexSync", "/io/anything/IndexSync")
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.service_name, self.object_path)
    }
}

/// Result of asking an endpoint for an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller now owns the identity.
    Claimed,

    /// Someone else already owns it.
    AlreadyClaimed,
}

/// Where identities are registered.
pub trait PublishEndpoint: Send + Sync {
    /// Register `identity` unless it is already taken.
    fn claim_or_adopt(&self, identity: &ServiceIdentity) -> Result<ClaimOutcome>;

    fn is_claimed(&self, identity: &ServiceIdentity) -> bool;
}

/// In-process endpoint keyed by service name.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    names: Arc<Mutex<HashSet<String>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PublishEndpoint for LocalBus {
    fn claim_or_adopt(&self, identity: &ServiceIdentity) -> Result<ClaimOutcome> {
        if identity.service_name.is_empty() {
            return Err(SyncError::Publish("service name must not be empty".to_string()));
        }

        if self.names.lock().insert(identity.service_name.clone()) {
            Ok(ClaimOutcome::Claimed)
        } else {
            Ok(ClaimOutcome::AlreadyClaimed)
        }
    }

    fn is_claimed(&self, identity: &ServiceIdentity) -> bool {
        self.names.lock().contains(&identity.service_name)
    }
}

/// A call arriving on the published surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum IndexRequest {
    Search {
        path: String,
        keywords: String,
        offset: i64,
        max_count: i64,
    },
    AddPath {
        path: String,
    },
    RemovePath {
        path: String,
    },
    HasRecord {
        path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum IndexResponse {
    Paths(Vec<String>),
    Flag(bool),
}

/// What [`PublishedIndex::claim`] ended up doing.
pub enum Publication {
    /// This engine owns the identity and serves the published surface.
    Claimed(PublishedIndex),

    /// Another instance already publishes the identity.
    Adopted,
}

impl Publication {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }
}

/// The query surface of one engine, as served under a claimed identity.
pub struct PublishedIndex {
    engine: Arc<IndexSync>,
    identity: ServiceIdentity,
}

impl PublishedIndex {
    /// Claim `identity` on `endpoint` for `engine`.
    pub fn claim(
        engine: Arc<IndexSync>,
        endpoint: &dyn PublishEndpoint,
        identity: ServiceIdentity,
    ) -> Result<Publication> {
        match endpoint.claim_or_adopt(&identity)? {
            ClaimOutcome::Claimed => {
                info!("Published index surface as {identity}");
                Ok(Publication::Claimed(Self { engine, identity }))
            }
            ClaimOutcome::AlreadyClaimed => {
                info!("{identity} is already published, not publishing again");
                Ok(Publication::Adopted)
            }
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn handle(&self, request: IndexRequest) -> IndexResponse {
        debug!("Handling {request:?}");
        match request {
            IndexRequest::Search {
                path,
                keywords,
                offset,
                max_count,
            } => IndexResponse::Paths(self.engine.query(&path, &keywords, offset, max_count)),
            IndexRequest::AddPath { path } => IndexResponse::Flag(self.engine.add_path(&path)),
            IndexRequest::RemovePath { path } => {
                IndexResponse::Flag(self.engine.remove_path(&path))
            }
            IndexRequest::HasRecord { path } => IndexResponse::Flag(self.engine.has_record(&path)),
        }
    }

    /// Decode a JSON request, handle it and encode the response.
    pub fn handle_json(&self, request: &str) -> Result<String> {
        let request: IndexRequest = serde_json::from_str(request)?;
        Ok(serde_json::to_string(&self.handle(request))?)
    }
}
