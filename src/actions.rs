use crate::app::{AppLink, Application};
use crate::async_list::{AsyncListModel, ListControl, ListHandle};
use crate::cluster::Cluster;
use crate::config::ConfigDir;
use crate::editor::ExternalTools;
use crate::executor::TaskExecutor;
use crate::input::Keystroke;
use crate::resources::{
    FilterSet, GLOBAL_FILTER, ResourceFetcher, SelectedCluster, item_name, item_namespace,
};
use crate::template::{FILTER_TEMPLATE, Filter};
use crate::view::dialog::QuestionDialog;
use crate::view::file::{FileChooser, FileFilter};
use crate::view::list::ListView;
use anyhow::{Context, Result, anyhow};
use ratatui::layout::Rect;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub type ResourceList = ListView<AsyncListModel<ResourceFetcher>>;

const CHOOSER_WIDTH: u16 = 70;
const CHOOSER_HEIGHT: u16 = 20;

pub const HELP_TEXT: &str = "\
kubedash

Global keys
  Tab        move focus to the next panel
  Esc        close the popup, or quit
  h          this help
  c          create resources from a YAML file
  r          refresh every list

Lists
  Up/Down, PgUp/PgDn, Home/End   move the cursor
  Enter      select (clusters, namespaces)

Resource lists
  v          view the resource as YAML
  e          edit the resource in the external editor
  d          delete the resource
  f          edit the filter of this kind
  F          edit the global filter
  l          pod logs (Pods), node labels (Nodes)

Filters and row templates live under the configuration directory in
filters/<Kind>.tpl and item-templates/<Kind>.tpl.
";

/// The item under a list's cursor, detached from the view so it can travel
/// into commands and background tasks.
struct Target {
    item: Value,
    list: ListHandle<ResourceFetcher>,
}

impl Target {
    fn of(list: &ResourceList) -> Option<(AppLink, Self)> {
        let link = list.link()?.clone();
        let item = list.current_item()?.clone();
        Some((
            link,
            Self {
                item,
                list: list.model().handle(),
            },
        ))
    }

    fn fetcher(&self) -> &ResourceFetcher {
        self.list.fetcher()
    }

    fn cluster(&self) -> Result<Arc<Cluster>> {
        self.fetcher()
            .cluster()
            .ok_or_else(|| anyhow!("no cluster selected"))
    }

    fn name(&self) -> &str {
        item_name(&self.item)
    }

    fn namespace(&self) -> Option<&str> {
        item_namespace(&self.item)
    }

    fn describe(&self) -> String {
        match self.namespace() {
            Some(namespace) => format!("{} {namespace}/{}", self.fetcher().kind(), self.name()),
            None => format!("{} {}", self.fetcher().kind(), self.name()),
        }
    }
}

/// User-triggered operations on resources, filters and the dashboard.
///
/// Anything that talks to a cluster runs as a one-shot executor task; its
/// failure is reported through `Application::show_error`.
pub struct Actions {
    tools: ExternalTools,
    config_dir: ConfigDir,
    filters: Arc<FilterSet>,
    cluster: SelectedCluster,
    executor: TaskExecutor,
    lists: Vec<Arc<dyn ListControl>>,
    start_dir: PathBuf,
}

impl Actions {
    pub fn new(
        tools: ExternalTools,
        config_dir: ConfigDir,
        filters: Arc<FilterSet>,
        cluster: SelectedCluster,
        executor: TaskExecutor,
    ) -> Self {
        Self {
            tools,
            config_dir,
            filters,
            cluster,
            executor,
            lists: Vec::new(),
            start_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    #[cfg(test)]
    /// Directory the create file chooser opens in.
    pub fn with_start_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.start_dir = dir.into();
        self
    }

    /// Registers a list refreshed by `refresh_all` and filter changes.
    pub fn add_list(&mut self, list: Arc<dyn ListControl>) {
        self.lists.push(list);
    }

    pub fn refresh_all(&self) {
        for list in &self.lists {
            list.refresh();
        }
    }

    /// Installs the per-item keys of every resource list.
    pub fn bind(self: &Arc<Self>, list: &mut ResourceList, global_filter: Keystroke) {
        let bindings: [(Keystroke, fn(&Arc<Self>, &ResourceList)); 4] = [
            (Keystroke::Char('v'), Self::view),
            (Keystroke::Char('e'), Self::edit),
            (Keystroke::Char('d'), Self::delete),
            (Keystroke::Char('f'), Self::edit_filter),
        ];
        for (key, action) in bindings {
            let actions = Arc::clone(self);
            list.set_key_handler(key, move |list| action(&actions, list));
        }
        let actions = Arc::clone(self);
        list.set_key_handler(global_filter, move |list| {
            if let Some(link) = list.link() {
                actions.edit_global_filter(link);
            }
        });
    }

    pub fn bind_pod_logs(self: &Arc<Self>, list: &mut ResourceList) {
        let actions = Arc::clone(self);
        list.set_key_handler(Keystroke::Char('l'), move |list| actions.show_logs(list));
    }

    pub fn bind_node_labels(list: &mut ResourceList) {
        list.set_key_handler(Keystroke::Char('l'), show_labels);
    }

    fn spawn_reported(
        &self,
        link: AppLink,
        work: impl Future<Output = Result<()>> + Send + 'static,
    ) {
        self.executor.spawn_once(async move {
            if let Err(err) = work.await {
                link.post(move |app| app.show_error(err));
            }
            Ok(())
        });
    }

    /// Hands `text` to the external viewer, or shows it in a popup when none
    /// is configured.
    fn show_file(&self, app: &mut Application, text: &str, suffix: &str) {
        if !self.tools.has_viewer() {
            return app.show_text_popup(text);
        }
        if let Err(err) = self.tools.view(app, text, suffix) {
            app.show_error(err);
        }
    }

    pub fn view(self: &Arc<Self>, list: &ResourceList) {
        let Some((link, target)) = Target::of(list) else {
            return;
        };
        let actions = Arc::clone(self);
        link.post(move |app| match serde_yaml::to_string(&target.item) {
            Ok(text) => actions.show_file(app, &text, ".yaml"),
            Err(err) => app.show_error(err),
        });
    }

    pub fn edit(self: &Arc<Self>, list: &ResourceList) {
        let Some((link, target)) = Target::of(list) else {
            return;
        };
        let actions = Arc::clone(self);
        link.post(move |app| actions.edit_target(app, target));
    }

    fn edit_target(&self, app: &mut Application, target: Target) {
        let body = match self.edited_body(app, &target.item) {
            Ok(Some(body)) => body,
            Ok(None) => return,
            Err(err) => return app.show_error(err),
        };
        self.spawn_reported(app.link(), async move {
            let cluster = target.cluster()?;
            let fetcher = target.fetcher();
            cluster
                .do_patch(fetcher.group(), fetcher.kind(), target.name(), target.namespace(), body)
                .await
                .with_context(|| format!("failed to update {}", target.describe()))?;
            info!("updated {}", target.describe());
            target.list.refresh();
            Ok(())
        });
    }

    /// YAML round trip through the editor; the result is the JSON merge
    /// patch body, if anything changed.
    fn edited_body(&self, app: &mut Application, item: &Value) -> Result<Option<Vec<u8>>> {
        let text = serde_yaml::to_string(item).context("failed to dump resource")?;
        let Some(edited) = self.tools.edit(app, &text, ".yaml")? else {
            return Ok(None);
        };
        let value = serde_yaml::from_str::<Value>(&edited).context("edited resource is not valid YAML")?;
        Ok(Some(serde_json::to_vec(&value)?))
    }

    pub fn delete(self: &Arc<Self>, list: &ResourceList) {
        let Some((link, target)) = Target::of(list) else {
            return;
        };
        let actions = Arc::clone(self);
        link.post(move |app| {
            let dialog = QuestionDialog::new("Warning", "Sure you want to delete the resource?")
                .option(Keystroke::Char('y'), "Yes", move |app| {
                    actions.spawn_reported(app.link(), async move {
                        let cluster = target.cluster()?;
                        let fetcher = target.fetcher();
                        cluster
                            .do_delete(fetcher.group(), fetcher.kind(), target.name(), target.namespace())
                            .await
                            .with_context(|| format!("failed to delete {}", target.describe()))?;
                        info!("deleted {}", target.describe());
                        target.list.refresh();
                        Ok(())
                    });
                })
                .option(Keystroke::Char('n'), "No", |_| {});
            app.show_question_dialog(dialog);
        });
    }

    pub fn show_logs(self: &Arc<Self>, list: &ResourceList) {
        let Some((link, target)) = Target::of(list) else {
            return;
        };
        let actions = Arc::clone(self);
        self.spawn_reported(link.clone(), async move {
            let cluster = target.cluster()?;
            let logs = cluster
                .pod_logs(target.name(), target.namespace().unwrap_or("default"))
                .await
                .with_context(|| format!("failed to fetch logs of {}", target.describe()))?;
            link.post(move |app| actions.show_file(app, &logs, ".log"));
            Ok(())
        });
    }

    pub fn edit_filter(self: &Arc<Self>, list: &ResourceList) {
        let Some(link) = list.link() else {
            return;
        };
        let kind = list.model().fetcher().kind().to_string();
        let actions = Arc::clone(self);
        link.post(move |app| actions.edit_filter_source(app, &kind));
    }

    pub fn edit_global_filter(self: &Arc<Self>, link: &AppLink) {
        let actions = Arc::clone(self);
        link.post(move |app| actions.edit_filter_source(app, GLOBAL_FILTER));
    }

    fn edit_filter_source(&self, app: &mut Application, key: &str) {
        let current = self.filters.get(key);
        let source = current
            .as_ref()
            .map_or(FILTER_TEMPLATE, |filter| filter.source())
            .to_string();
        match self.tools.edit(app, &source, ".tpl") {
            Ok(Some(edited)) => {
                if let Err(err) = self.apply_filter(key, &edited) {
                    app.show_error(err);
                }
            }
            Ok(None) => debug!("filter {key} unchanged"),
            Err(err) => app.show_error(err),
        }
    }

    /// Blank source removes the filter. Either way the change is persisted
    /// and every list refetches.
    pub fn apply_filter(&self, key: &str, source: &str) -> Result<()> {
        if source.trim().is_empty() {
            self.config_dir.save_filter(key, None)?;
            self.filters.set(key, None);
            info!("removed filter {key}");
        } else {
            let filter = Filter::new(source).with_context(|| format!("invalid filter {key}"))?;
            self.config_dir.save_filter(key, Some(source))?;
            self.filters.set(key, Some(filter));
            info!("updated filter {key}");
        }
        self.refresh_all();
        Ok(())
    }

    /// Opens the YAML file chooser; the picked file's documents are posted to
    /// the selected cluster.
    pub fn create(self: &Arc<Self>, app: &mut Application) {
        let Some(cluster) = self.cluster.get().filter(|cluster| cluster.connected()) else {
            debug!("create ignored without a connected cluster");
            return;
        };
        let filter: FileFilter = Box::new(|_: &Path, name: &str| name.contains(".yaml"));
        let rect = Rect::new(0, 0, CHOOSER_WIDTH, CHOOSER_HEIGHT);
        let chooser = match FileChooser::new(rect, &self.start_dir, filter) {
            Ok(chooser) => chooser,
            Err(err) => return app.show_error(err),
        };

        let link = app.link();
        let actions = Arc::clone(self);
        chooser.on_file_selected().add(move |_, path| {
            let actions = Arc::clone(&actions);
            let cluster = Arc::clone(&cluster);
            let path = path.clone();
            link.post(move |app| {
                app.close_popup();
                actions.create_from_file(app, cluster, &path);
            });
        });
        app.open_popup(Box::new(chooser), true);
    }

    fn create_from_file(self: &Arc<Self>, app: &mut Application, cluster: Arc<Cluster>, path: &Path) {
        let documents = match read_documents(path) {
            Ok(documents) => documents,
            Err(err) => return app.show_error(err),
        };
        let actions = Arc::clone(self);
        self.spawn_reported(app.link(), async move {
            for document in documents {
                let (group, kind, namespace) = document_target(&document)?;
                let body = serde_json::to_vec(&document)?;
                cluster
                    .do_post(&group, &kind, namespace.as_deref(), body)
                    .await
                    .with_context(|| format!("failed to create {kind}"))?;
                info!("created {kind} on {}", cluster.name());
            }
            actions.refresh_all();
            Ok(())
        });
    }

    pub fn help(app: &mut Application) {
        app.show_text_popup(HELP_TEXT);
    }

    pub fn refresh(&self, app: &mut Application) {
        self.refresh_all();
        app.refresh();
    }
}

fn show_labels(list: &ResourceList) {
    let Some((link, target)) = Target::of(list) else {
        return;
    };
    let text = labels_text(&target.item);
    link.post(move |app| app.show_text_popup(&text));
}

fn labels_text(node: &Value) -> String {
    let mut lines = vec![
        format!("Labels for node {}", item_name(node)),
        "======================".to_string(),
        String::new(),
    ];
    if let Some(labels) = node.pointer("/metadata/labels").and_then(Value::as_object) {
        for (key, value) in labels {
            let value = value.as_str().map_or_else(|| value.to_string(), str::to_string);
            lines.push(format!("{key:50} : {value}"));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Every non-empty document of a (multi-document) YAML file.
fn read_documents(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&text) {
        let value = Value::deserialize(document)
            .with_context(|| format!("invalid YAML in {}", path.display()))?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// `(apiVersion, kind, metadata.namespace)` of a manifest.
fn document_target(document: &Value) -> Result<(String, String, Option<String>)> {
    let field = |name: &str| {
        document
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("manifest without {name}"))
    };
    Ok((
        field("apiVersion")?,
        field("kind")?,
        item_namespace(document).map(str::to_string),
    ))
}
