use crate::async_list::Fetch;
use crate::cluster::{Cluster, ClusterError, ConnectionState};
use crate::template::{Filter, ItemTemplate, fill_text};
use crate::theme::Theme;
use crate::view::list::{ItemRenderer, ItemState};
use anyhow::{Context, Result, bail};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use ratatui::text::{Line, Span};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Filter key applied to every resource list.
pub const GLOBAL_FILTER: &str = "GLOBAL";

pub fn item_name(item: &Value) -> &str {
    item.pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

pub fn item_namespace(item: &Value) -> Option<&str> {
    item.pointer("/metadata/namespace").and_then(Value::as_str)
}

/// Active filters by kind, shared by every resource fetcher.
#[derive(Debug, Default)]
pub struct FilterSet {
    filters: RwLock<HashMap<String, Arc<Filter>>>,
}

impl FilterSet {
    pub fn new(filters: HashMap<String, Filter>) -> Self {
        Self {
            filters: RwLock::new(
                filters
                    .into_iter()
                    .map(|(kind, filter)| (kind, Arc::new(filter)))
                    .collect(),
            ),
        }
    }

    pub fn get(&self, kind: &str) -> Option<Arc<Filter>> {
        self.filters.read().get(kind).cloned()
    }

    pub fn set(&self, kind: &str, filter: Option<Filter>) {
        let mut filters = self.filters.write();
        match filter {
            Some(filter) => filters.insert(kind.to_string(), Arc::new(filter)),
            None => filters.remove(kind),
        };
    }

    /// Global filter first, then the filter of `kind`.
    pub fn apply(&self, kind: &str, mut items: Vec<Value>) -> Result<Vec<Value>> {
        for (name, filter) in [(GLOBAL_FILTER, self.get(GLOBAL_FILTER)), (kind, self.get(kind))] {
            let Some(filter) = filter else {
                continue;
            };
            debug!("applying filter {name}");
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                if filter
                    .matches(&item)
                    .with_context(|| format!("filter {name} failed"))?
                {
                    kept.push(item);
                }
            }
            items = kept;
        }
        Ok(items)
    }
}

/// Namespace the namespaced resource lists are scoped to, if any.
#[derive(Debug, Clone, Default)]
pub struct NamespaceScope(Arc<RwLock<Option<String>>>);

impl NamespaceScope {
    pub fn get(&self) -> Option<String> {
        self.0.read().clone()
    }

    pub fn is(&self, namespace: &str) -> bool {
        self.0.read().as_deref() == Some(namespace)
    }

    pub fn clear(&self) {
        *self.0.write() = None;
    }

    /// Scopes to `namespace`, or clears the scope when it is already active.
    pub fn toggle(&self, namespace: &str) -> Option<String> {
        let mut scope = self.0.write();
        *scope = match scope.as_deref() {
            Some(active) if active == namespace => None,
            _ => Some(namespace.to_string()),
        };
        scope.clone()
    }
}

/// Cluster picked in the clusters panel.
#[derive(Debug, Clone, Default)]
pub struct SelectedCluster(Arc<RwLock<Option<Arc<Cluster>>>>);

impl SelectedCluster {
    pub fn get(&self) -> Option<Arc<Cluster>> {
        self.0.read().clone()
    }

    pub fn set(&self, cluster: Option<Arc<Cluster>>) {
        *self.0.write() = cluster;
    }
}

/// Lists one resource kind of the selected cluster as raw JSON objects.
pub struct ResourceFetcher {
    group: String,
    kind: String,
    cluster: RwLock<Option<Arc<Cluster>>>,
    namespace: RwLock<Option<String>>,
    filters: Arc<FilterSet>,
}

impl ResourceFetcher {
    pub fn new(group: impl Into<String>, kind: impl Into<String>, filters: Arc<FilterSet>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            cluster: RwLock::new(None),
            namespace: RwLock::new(None),
            filters,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn cluster(&self) -> Option<Arc<Cluster>> {
        self.cluster.read().clone()
    }

    pub fn set_cluster(&self, cluster: Option<Arc<Cluster>>) {
        *self.cluster.write() = cluster;
    }

    pub fn namespace(&self) -> Option<String> {
        self.namespace.read().clone()
    }

    pub fn set_namespace(&self, namespace: Option<String>) {
        *self.namespace.write() = namespace;
    }

    pub fn filters(&self) -> &Arc<FilterSet> {
        &self.filters
    }

    async fn fetch_items(&self) -> Result<Vec<Value>> {
        let Some(cluster) = self.cluster() else {
            return Ok(Vec::new());
        };
        if let Err(err @ ClusterError::UnknownResource { .. }) =
            cluster.get_resource(&self.group, &self.kind)
        {
            info!("{err}");
            return Ok(Vec::new());
        }
        let namespace = self.namespace();
        let body = cluster
            .do_get(&self.group, &self.kind, None, namespace.as_deref())
            .await
            .with_context(|| format!("failed to list {} on {}", self.kind, cluster.name()))?;
        let items = parse_items(&body, &self.group, &self.kind)?;
        self.filters.apply(&self.kind, items)
    }
}

impl Fetch for ResourceFetcher {
    type Item = Value;

    fn enabled(&self) -> bool {
        self.cluster().is_some_and(|cluster| cluster.connected())
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<Value>>> {
        self.fetch_items().boxed()
    }
}

/// Items of a list response. List items come without `kind` and
/// `apiVersion`; both are filled in so dumps can be posted back as-is.
fn parse_items(body: &[u8], group: &str, kind: &str) -> Result<Vec<Value>> {
    let mut list = serde_json::from_slice::<Value>(body)
        .with_context(|| format!("invalid {kind} list response"))?;
    let items = match list.get_mut("items").map(Value::take) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => bail!("{kind} list response has non-array items: {other}"),
    };
    Ok(items
        .into_iter()
        .map(|mut item| {
            if let Value::Object(fields) = &mut item {
                fields
                    .entry("apiVersion")
                    .or_insert_with(|| Value::from(group));
                fields.entry("kind").or_insert_with(|| Value::from(kind));
            }
            item
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextItem {
    pub name: String,
    pub active: bool,
}

/// Kubeconfig contexts of the selected cluster, captured at handshake.
#[derive(Default)]
pub struct ContextsFetcher {
    cluster: RwLock<Option<Arc<Cluster>>>,
}

impl ContextsFetcher {
    pub fn set_cluster(&self, cluster: Option<Arc<Cluster>>) {
        *self.cluster.write() = cluster;
    }
}

impl Fetch for ContextsFetcher {
    type Item = ContextItem;

    fn enabled(&self) -> bool {
        self.cluster.read().is_some()
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<ContextItem>>> {
        let cluster = self.cluster.read().clone();
        async move {
            let Some(cluster) = cluster else {
                return Ok(Vec::new());
            };
            let active = cluster.active_context();
            Ok(cluster
                .contexts()
                .into_iter()
                .map(|name| ContextItem {
                    active: active.as_deref() == Some(name.as_str()),
                    name,
                })
                .collect())
        }
        .boxed()
    }
}

/// `<name>` when marked, ` name ` otherwise, filled to leave room for a
/// three-cell status marker.
fn marked(name: &str, marked: bool, width: u16) -> String {
    let label = if marked {
        format!("<{name}>")
    } else {
        format!(" {name} ")
    };
    fill_text(&label, i64::from(width.saturating_sub(4)))
}

pub fn cluster_renderer(theme: &Theme) -> impl ItemRenderer<Arc<Cluster>> + use<> {
    let connected = theme.get("listview.connected.fg");
    let failed = theme.get("listview.error.fg");
    move |cluster: &Arc<Cluster>, state: ItemState, width: u16| {
        let marker = match &*cluster.state() {
            ConnectionState::Connected(_) => Span::styled("(C)", connected),
            ConnectionState::Connecting => Span::raw("..."),
            ConnectionState::Error(_) => Span::styled("<X>", failed),
            ConnectionState::Disconnected => Span::raw(""),
        };
        Line::from(vec![
            Span::raw(marked(cluster.name(), state.selected, width)),
            marker,
        ])
    }
}

pub fn context_renderer() -> impl ItemRenderer<ContextItem> {
    |context: &ContextItem, _: ItemState, width: u16| {
        Line::from(marked(&context.name, context.active, width))
    }
}

pub fn namespace_renderer(scope: NamespaceScope) -> impl ItemRenderer<Value> {
    move |item: &Value, _: ItemState, width: u16| {
        let name = item_name(item);
        Line::from(marked(name, scope.is(name), width))
    }
}

/// Rows from the kind's item template, or the bare name without one.
pub fn template_renderer(
    templates: Arc<HashMap<String, ItemTemplate>>,
    kind: String,
) -> impl ItemRenderer<Value> {
    move |item: &Value, _: ItemState, width: u16| {
        let row = match templates.get(&kind).map(|template| template.render(item, width)) {
            Some(Ok(row)) => row.replace('\n', ""),
            Some(Err(err)) => {
                debug!("item template for {kind} failed: {err:#}");
                item_name(item).to_string()
            }
            None => item_name(item).to_string(),
        };
        Line::from(row)
    }
}
