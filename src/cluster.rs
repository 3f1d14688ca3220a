use crate::listener::ListenerHandler;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::time::{Duration, timeout};
use tracing::{error, info};

pub const CORE_GROUP: &str = "v1";
const CORE_ALIAS: &str = "api/v1";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("cluster is not connected")]
    NotConnected,
    #[error("resource kind {kind} is not available in api group {group}")]
    UnknownResource { group: String, kind: String },
    #[error("request failed with status {status}: {body}")]
    Service { status: u16, body: String },
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Handshake(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

/// One entry of an API group's resource list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceType {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub namespaced: bool,
}

/// Resource types per API group-version (`v1`, `apps/v1`, ...).
pub type Catalog = HashMap<String, Vec<ResourceType>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Vec<u8>>,
}

/// Raw REST access to a connected cluster.
pub trait ApiHandle: Send + Sync {
    /// Returns the response body of a 2xx answer, `ClusterError::Service`
    /// otherwise.
    fn request(&self, request: ApiRequest) -> BoxFuture<'_, Result<Vec<u8>, ClusterError>>;
}

/// Everything a successful handshake yields.
pub struct Handshake {
    pub handle: Arc<dyn ApiHandle>,
    pub catalog: Catalog,
    pub contexts: Vec<String>,
    pub active_context: Option<String>,
}

/// Loads credentials from a kubeconfig file and discovers the catalog.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        config_file: &'a Path,
        context: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Handshake, ClusterError>>;
}

/// Live connection: installed in one piece by the connect worker.
pub struct Session {
    handle: Arc<dyn ApiHandle>,
    catalog: Catalog,
    contexts: Vec<String>,
    active_context: Option<String>,
}

impl From<Handshake> for Session {
    fn from(handshake: Handshake) -> Self {
        Self {
            handle: handshake.handle,
            catalog: handshake.catalog,
            contexts: handshake.contexts,
            active_context: handshake.active_context,
        }
    }
}

pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(Arc<Session>),
    Error(ClusterError),
}

/// A configured cluster and its connection state machine:
/// disconnected -> connecting -> connected | error.
pub struct Cluster {
    name: String,
    config_file: PathBuf,
    context: Option<String>,
    request_timeout: Duration,
    connector: Arc<dyn Connector>,
    state: RwLock<Arc<ConnectionState>>,
    /// Bumped under the state lock by every connect and disconnect; a worker
    /// installs its result only while its own attempt is still current.
    attempt: AtomicU64,
    on_connect: ListenerHandler<Cluster>,
    on_error: ListenerHandler<Cluster, ClusterError>,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.name)
            .field("config_file", &self.config_file)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Cluster {
    pub fn new(
        name: impl Into<String>,
        config_file: impl Into<PathBuf>,
        context: Option<String>,
        request_timeout: Duration,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            name: name.into(),
            config_file: config_file.into(),
            context,
            request_timeout,
            connector,
            state: RwLock::new(Arc::new(ConnectionState::Disconnected)),
            attempt: AtomicU64::new(0),
            on_connect: ListenerHandler::new(),
            on_error: ListenerHandler::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_connect(&self) -> &ListenerHandler<Cluster> {
        &self.on_connect
    }

    pub fn on_error(&self) -> &ListenerHandler<Cluster, ClusterError> {
        &self.on_error
    }

    pub fn state(&self) -> Arc<ConnectionState> {
        Arc::clone(&self.state.read())
    }

    pub fn connected(&self) -> bool {
        matches!(*self.state(), ConnectionState::Connected(_))
    }

    #[cfg(test)]
    pub fn connecting(&self) -> bool {
        matches!(*self.state(), ConnectionState::Connecting)
    }

    pub fn connection_error(&self) -> Option<ClusterError> {
        match &*self.state() {
            ConnectionState::Error(err) => Some(err.clone()),
            _ => None,
        }
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        match &*self.state() {
            ConnectionState::Connected(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Starts a handshake on a detached worker. Returns false, doing nothing,
    /// while one is already in flight.
    /// The connector bounds each of its calls by the request timeout; the
    /// handshake as a whole is not bounded.
    pub fn connect(self: &Arc<Self>) -> bool {
        let attempt = {
            let mut state = self.state.write();
            if matches!(**state, ConnectionState::Connecting) {
                return false;
            }
            *state = Arc::new(ConnectionState::Connecting);
            self.attempt.fetch_add(1, Ordering::SeqCst) + 1
        };
        info!("connecting to cluster {}", self.name);
        let cluster = Arc::clone(self);
        tokio::spawn(async move { cluster.handshake(attempt).await });
        true
    }

    async fn handshake(&self, attempt: u64) {
        let result = self
            .connector
            .connect(&self.config_file, self.context.as_deref())
            .await;

        let next = match &result {
            Ok(_) => None,
            Err(err) => Some(err.clone()),
        };
        {
            let mut state = self.state.write();
            if self.attempt.load(Ordering::SeqCst) != attempt {
                info!("discarding superseded handshake result for cluster {}", self.name);
                return;
            }
            *state = Arc::new(match result {
                Ok(handshake) => ConnectionState::Connected(Arc::new(handshake.into())),
                Err(err) => ConnectionState::Error(err),
            });
        }

        match next {
            None => {
                info!("connected to cluster {}", self.name);
                self.on_connect.fire(self, &());
            }
            Some(err) => {
                error!("failed to connect to cluster {}: {err}", self.name);
                self.on_error.fire(self, &err);
            }
        }
    }

    /// Drops the API handle and the catalog.
    pub fn disconnect(&self) {
        let mut state = self.state.write();
        self.attempt.fetch_add(1, Ordering::SeqCst);
        if !matches!(**state, ConnectionState::Disconnected) {
            *state = Arc::new(ConnectionState::Disconnected);
            info!("disconnected from cluster {}", self.name);
        }
    }

    pub fn contexts(&self) -> Vec<String> {
        self.session()
            .map(|session| session.contexts.clone())
            .unwrap_or_default()
    }

    pub fn active_context(&self) -> Option<String> {
        self.session()
            .and_then(|session| session.active_context.clone())
    }

    pub fn get_resource(&self, group: &str, kind: &str) -> Result<ResourceType, ClusterError> {
        let session = self.session().ok_or(ClusterError::NotConnected)?;
        find_resource(&session.catalog, group, kind)
    }

    pub async fn do_get(
        &self,
        group: &str,
        kind: &str,
        name: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Vec<u8>, ClusterError> {
        self.send(Method::Get, group, kind, name, namespace, None)
            .await
    }

    pub async fn do_post(
        &self,
        group: &str,
        kind: &str,
        namespace: Option<&str>,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, ClusterError> {
        self.send(Method::Post, group, kind, None, namespace, Some(body))
            .await
    }

    /// JSON merge patch of one resource.
    pub async fn do_patch(
        &self,
        group: &str,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, ClusterError> {
        self.send(Method::Patch, group, kind, Some(name), namespace, Some(body))
            .await
    }

    pub async fn do_delete(
        &self,
        group: &str,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<u8>, ClusterError> {
        self.send(Method::Delete, group, kind, Some(name), namespace, None)
            .await
    }

    pub async fn pod_logs(&self, name: &str, namespace: &str) -> Result<String, ClusterError> {
        let session = self.session().ok_or(ClusterError::NotConnected)?;
        let pods = find_resource(&session.catalog, CORE_GROUP, "Pod")?;
        let path = format!(
            "{}/log",
            resource_path(CORE_GROUP, &pods, Some(name), Some(namespace))
        );
        let request = ApiRequest {
            method: Method::Get,
            path,
            body: None,
        };
        let body = self.execute(&session, request).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn send(
        &self,
        method: Method,
        group: &str,
        kind: &str,
        name: Option<&str>,
        namespace: Option<&str>,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, ClusterError> {
        let session = self.session().ok_or(ClusterError::NotConnected)?;
        let resource = find_resource(&session.catalog, group, kind)?;
        let request = ApiRequest {
            method,
            path: resource_path(group, &resource, name, namespace),
            body,
        };
        self.execute(&session, request).await
    }

    async fn execute(&self, session: &Session, request: ApiRequest) -> Result<Vec<u8>, ClusterError> {
        bounded(self.request_timeout, session.handle.request(request)).await
    }
}

/// Runs one API call, failing with `ClusterError::Timeout` after `limit`.
pub async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, ClusterError>>,
) -> Result<T, ClusterError> {
    timeout(limit, call)
        .await
        .unwrap_or(Err(ClusterError::Timeout))
}

fn normalize_group(group: &str) -> &str {
    if group == CORE_ALIAS { CORE_GROUP } else { group }
}

fn find_resource(catalog: &Catalog, group: &str, kind: &str) -> Result<ResourceType, ClusterError> {
    let group = normalize_group(group);
    catalog
        .get(group)
        .and_then(|resources| resources.iter().find(|resource| resource.kind == kind))
        .cloned()
        .ok_or_else(|| ClusterError::UnknownResource {
            group: group.to_string(),
            kind: kind.to_string(),
        })
}

/// REST path of a resource collection or, with `name`, of one object.
/// Cluster-scoped resources ignore `namespace`; namespaced ones without a
/// namespace address every namespace.
pub fn resource_path(
    group: &str,
    resource: &ResourceType,
    name: Option<&str>,
    namespace: Option<&str>,
) -> String {
    let group = normalize_group(group);
    let mut path = if group == CORE_GROUP {
        format!("/api/{group}")
    } else {
        format!("/apis/{group}")
    };
    if let (true, Some(namespace)) = (resource.namespaced, namespace) {
        path.push_str("/namespaces/");
        path.push_str(namespace);
    }
    path.push('/');
    path.push_str(&resource.name);
    if let Some(name) = name {
        path.push('/');
        path.push_str(name);
    }
    path
}
