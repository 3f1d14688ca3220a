use crate::actions::{Actions, ResourceList};
use crate::app::Application;
use crate::async_list::{AsyncListModel, ListHandle};
use crate::cluster::{CORE_GROUP, Cluster, Connector};
use crate::config::{ConfigDir, Settings};
use crate::editor::ExternalTools;
use crate::resources::{
    ContextsFetcher, FilterSet, NamespaceScope, ResourceFetcher, SelectedCluster,
    cluster_renderer, context_renderer, item_name, namespace_renderer, template_renderer,
};
use crate::view::View;
use crate::view::list::{ListView, VecListModel};
use crate::view::tabbed::TabbedView;
use crate::view::titled::TitledView;
use anyhow::Result;
use ratatui::layout::Rect;
use std::sync::Arc;
use tracing::info;

const LEFT_PANELS: u16 = 4;

/// Shared handles the selection listeners reconfigure.
#[derive(Clone)]
struct Wiring {
    selected: SelectedCluster,
    scope: NamespaceScope,
    contexts: ListHandle<ContextsFetcher>,
    /// Every resource list.
    resources: Vec<ListHandle<ResourceFetcher>>,
    /// Lists following the namespace scope.
    scoped: Vec<ListHandle<ResourceFetcher>>,
}

impl Wiring {
    /// Points every model at `cluster` and drops the namespace scope. A
    /// cluster that failed to connect is reported instead.
    fn select_cluster(&self, app: &mut Application, cluster: Option<Arc<Cluster>>) {
        if let Some(cluster) = &cluster
            && let Some(err) = cluster.connection_error()
        {
            app.show_error(format!("cluster {} is not available: {err}", cluster.name()));
            return;
        }
        if let Some(cluster) = &cluster {
            info!("selected cluster {}", cluster.name());
        }

        self.selected.set(cluster.clone());
        self.scope.clear();
        self.contexts.fetcher().set_cluster(cluster.clone());
        self.contexts.invalidate();
        for list in &self.resources {
            list.fetcher().set_cluster(cluster.clone());
            list.fetcher().set_namespace(None);
            list.invalidate();
        }
    }

    fn toggle_namespace(&self, namespace: &str) {
        let scope = self.scope.toggle(namespace);
        info!("namespace scope: {}", scope.as_deref().unwrap_or("all"));
        for list in &self.scoped {
            list.fetcher().set_namespace(scope.clone());
            list.invalidate();
        }
    }
}

/// The fixed panel layout: clusters, contexts, nodes and namespaces stacked in
/// the left quarter, resource tabs on the right.
pub struct Dashboard {
    clusters: Vec<Arc<Cluster>>,
    #[cfg(test)]
    wiring: Wiring,
}

impl Dashboard {
    /// Builds every panel into `app`, installs the global keys, selects the
    /// first cluster and starts connecting all of them.
    pub fn build(
        app: &mut Application,
        settings: Settings,
        config_dir: ConfigDir,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let Settings {
            config,
            templates,
            filters,
        } = settings;
        let bindings = config.keys.bindings()?;
        let area = app.area();
        let link = app.link();
        let executor = app.executor().clone();
        let filters = Arc::new(FilterSet::new(filters));
        let templates = Arc::new(templates);

        let request_timeout = config.general.request_timeout();
        let clusters = config
            .clusters
            .iter()
            .map(|entry| {
                Arc::new(Cluster::new(
                    entry.name.clone(),
                    entry.config_file.clone(),
                    entry.context.clone(),
                    request_timeout,
                    Arc::clone(&connector),
                ))
            })
            .collect::<Vec<_>>();

        let resource_list = |group: &str, kind: &str| -> ResourceList {
            let fetcher = ResourceFetcher::new(group, kind, Arc::clone(&filters));
            ListView::new(
                AsyncListModel::new(fetcher, executor.clone(), true),
                template_renderer(Arc::clone(&templates), kind.to_string()),
            )
        };

        let mut clusters_view =
            ListView::new(VecListModel::new(clusters.clone()), cluster_renderer(app.theme()))
                .selectable(true);
        let contexts_view = ListView::new(
            AsyncListModel::new(ContextsFetcher::default(), executor.clone(), false),
            context_renderer(),
        );
        let scope = NamespaceScope::default();
        let mut nodes = resource_list(CORE_GROUP, "Node");
        let mut namespaces: ResourceList = ListView::new(
            AsyncListModel::new(
                ResourceFetcher::new(CORE_GROUP, "Namespace", Arc::clone(&filters)),
                executor.clone(),
                true,
            ),
            namespace_renderer(scope.clone()),
        )
        .selectable(true);
        let mut pods = resource_list(CORE_GROUP, "Pod");
        let mut tabs = config
            .tabs
            .iter()
            .map(|tab| (tab.title.clone(), resource_list(&tab.group_version, &tab.kind)))
            .collect::<Vec<_>>();

        let scoped = std::iter::once(&pods)
            .chain(tabs.iter().map(|(_, list)| list))
            .map(|list| list.model().handle())
            .collect::<Vec<_>>();
        let resources = [&nodes, &namespaces]
            .into_iter()
            .map(|list| list.model().handle())
            .chain(scoped.iter().cloned())
            .collect::<Vec<_>>();

        let selected = SelectedCluster::default();
        let tools = ExternalTools::new(
            config.general.editor.as_deref(),
            config.general.viewer.as_deref(),
        );
        let mut actions = Actions::new(
            tools,
            config_dir,
            Arc::clone(&filters),
            selected.clone(),
            executor.clone(),
        );
        for list in &resources {
            actions.add_list(Arc::new(list.clone()));
        }
        let actions = Arc::new(actions);
        for list in [&mut nodes, &mut namespaces, &mut pods]
            .into_iter()
            .chain(tabs.iter_mut().map(|(_, list)| list))
        {
            actions.bind(list, bindings.global_filter);
        }
        actions.bind_pod_logs(&mut pods);
        Actions::bind_node_labels(&mut nodes);

        let wiring = Wiring {
            selected,
            scope,
            contexts: contexts_view.model().handle(),
            resources,
            scoped,
        };

        let clusters_id = clusters_view.id();
        for cluster in &clusters {
            let redraw = link.clone();
            let contexts = wiring.contexts.clone();
            cluster.on_connect().add(move |_, _| {
                redraw.queue_update(clusters_id);
                contexts.refresh();
            });
            let redraw = link.clone();
            cluster
                .on_error()
                .add(move |_, _| redraw.queue_update(clusters_id));
        }
        {
            let wiring = wiring.clone();
            let link = link.clone();
            clusters_view.on_select().add(move |_, cluster| {
                let wiring = wiring.clone();
                let cluster = cluster.clone();
                link.post(move |app| wiring.select_cluster(app, cluster));
            });
        }
        {
            let wiring = wiring.clone();
            namespaces.on_select().add(move |_, namespace| {
                if let Some(namespace) = namespace {
                    wiring.toggle_namespace(item_name(namespace));
                }
            });
        }
        if !clusters.is_empty() {
            clusters_view.select(Some(0));
        }

        let left = area.width / 4;
        let panel = area.height / LEFT_PANELS;
        let panel_rect = |index: u16| {
            let y = area.y + index * panel;
            let height = if index + 1 == LEFT_PANELS {
                area.bottom() - y
            } else {
                panel
            };
            Rect::new(area.x, y, left, height)
        };
        let panels: [(&str, Box<dyn View>); 4] = [
            ("Clusters", Box::new(clusters_view)),
            ("Contexts", Box::new(contexts_view)),
            ("Nodes", Box::new(nodes)),
            ("Namespaces", Box::new(namespaces)),
        ];
        for (index, (title, view)) in (0u16..).zip(panels) {
            app.add_component(Box::new(TitledView::new(panel_rect(index), title, view)));
        }

        let mut tabbed = TabbedView::new(Rect::new(
            area.x + left,
            area.y,
            area.width - left,
            area.height,
        ));
        tabbed.add_tab("Pods", Box::new(pods));
        for (title, list) in tabs {
            tabbed.add_tab(title, Box::new(list));
        }
        app.add_component(Box::new(tabbed));

        app.set_key_handler(bindings.help, Actions::help);
        {
            let actions = Arc::clone(&actions);
            app.set_key_handler(bindings.create, move |app| actions.create(app));
        }
        {
            let actions = Arc::clone(&actions);
            app.set_key_handler(bindings.refresh, move |app| actions.refresh(app));
        }
        app.focus_component(0);

        for cluster in &clusters {
            cluster.connect();
        }
        Ok(Self {
            clusters,
            #[cfg(test)]
            wiring,
        })
    }

    pub fn clusters(&self) -> &[Arc<Cluster>] {
        &self.clusters
    }

    #[cfg(test)]
    fn selected_cluster(&self) -> Option<Arc<Cluster>> {
        self.wiring.selected.get()
    }

    #[cfg(test)]
    fn namespace_scope(&self) -> Option<String> {
        self.wiring.scope.get()
    }
}
