use crate::cluster::CORE_GROUP;
use crate::input::Keystroke;
use crate::template::{DEFAULT_ITEM_TEMPLATES, Filter, ItemTemplate};
use crate::theme::Theme;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tokio::time::Duration;
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "config.yaml";
const LOG_FILE: &str = "kubedash.log";
const TEMPLATES_DIR: &str = "item-templates";
const FILTERS_DIR: &str = "filters";
const TEMPLATE_EXTENSION: &str = "tpl";
const DEFAULT_TICK_MS: u64 = 1_000;
pub const TICK_RANGE_MS: RangeInclusive<u64> = 250..=5_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub clusters: Vec<ClusterConfig>,
    pub tabs: Vec<TabConfig>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub colors: BTreeMap<String, String>,
    pub keys: KeyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick_ms: Option<u64>,
    pub request_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            editor: None,
            viewer: None,
            tick_ms: None,
            request_timeout_secs: 10,
        }
    }
}

impl GeneralConfig {
    /// Executor tick: the command line wins over the file, clamped to
    /// `TICK_RANGE_MS`.
    pub fn tick(&self, cli_tick_ms: Option<u64>) -> Duration {
        let millis = cli_tick_ms
            .or(self.tick_ms)
            .unwrap_or(DEFAULT_TICK_MS)
            .clamp(*TICK_RANGE_MS.start(), *TICK_RANGE_MS.end());
        Duration::from_millis(millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClusterConfig {
    pub name: String,
    pub config_file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Extra resource tab shown next to Pods.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TabConfig {
    pub title: String,
    pub kind: String,
    #[serde(default = "core_group")]
    pub group_version: String,
}

fn core_group() -> String {
    CORE_GROUP.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct KeyConfig {
    pub help: String,
    pub create: String,
    pub global_filter: String,
    pub refresh: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            help: "h".to_string(),
            create: "c".to_string(),
            global_filter: "F".to_string(),
            refresh: "r".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBindings {
    pub help: Keystroke,
    pub create: Keystroke,
    pub global_filter: Keystroke,
    pub refresh: Keystroke,
}

impl KeyConfig {
    pub fn bindings(&self) -> Result<KeyBindings> {
        Ok(KeyBindings {
            help: parse_binding("help", &self.help)?,
            create: parse_binding("create", &self.create)?,
            global_filter: parse_binding("global_filter", &self.global_filter)?,
            refresh: parse_binding("refresh", &self.refresh)?,
        })
    }
}

fn parse_binding(action: &str, binding: &str) -> Result<Keystroke> {
    match Keystroke::parse(binding) {
        Some(key) => Ok(key),
        None => bail!("invalid key binding {binding:?} for {action}"),
    }
}

impl Config {
    /// Default colours overlaid with the `colors` section. Unusable entries
    /// are logged and skipped.
    pub fn theme(&self) -> Theme {
        let mut theme = Theme::with_defaults();
        for (key, value) in &self.colors {
            if let Err(err) = theme.set(key, value) {
                warn!("ignoring colour {key}: {err:#}");
            }
        }
        theme
    }
}

/// Everything read from the configuration directory at startup.
pub struct Settings {
    pub config: Config,
    pub templates: HashMap<String, ItemTemplate>,
    pub filters: HashMap<String, Filter>,
}

/// The configuration directory: `config.yaml`, `item-templates/`,
/// `filters/` and the log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `--config-dir`, else `$KUBEDASH_CONFIG_DIR`, else
    /// `$HOME/.config/kubedash`, else `./.kubedash`.
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        Self::new(resolve_root(
            explicit,
            std::env::var_os("KUBEDASH_CONFIG_DIR"),
            std::env::var_os("HOME"),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Creates the directory. Returns true when it did not exist yet.
    pub fn prepare(&self) -> Result<bool> {
        if self.root.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        Ok(true)
    }

    /// Reads the configuration, writing defaults for whatever is missing.
    pub fn load(&self) -> Result<Settings> {
        let config = self.load_config()?;
        let templates = self
            .load_template_sources()?
            .into_iter()
            .filter_map(|(kind, source)| match ItemTemplate::new(&source) {
                Ok(template) => Some((kind, template)),
                Err(err) => {
                    warn!("ignoring item template {kind}: {err:#}");
                    None
                }
            })
            .collect();
        let filters = read_templates(&self.root.join(FILTERS_DIR))?
            .into_iter()
            .filter_map(|(kind, source)| match Filter::new(source) {
                Ok(filter) => Some((kind, filter)),
                Err(err) => {
                    warn!("ignoring filter {kind}: {err:#}");
                    None
                }
            })
            .collect();
        Ok(Settings {
            config,
            templates,
            filters,
        })
    }

    fn load_config(&self) -> Result<Config> {
        let path = self.root.join(CONFIG_FILE);
        if !path.is_file() {
            let config = Config {
                clusters: default_clusters(std::env::var_os("KUBECONFIG"), std::env::var_os("HOME")),
                ..Config::default()
            };
            let raw = serde_yaml::to_string(&config).context("failed to serialize default config")?;
            fs::write(&path, raw).with_context(|| format!("failed to write {}", path.display()))?;
            info!("wrote default configuration to {}", path.display());
            return Ok(config);
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    fn load_template_sources(&self) -> Result<Vec<(String, String)>> {
        let dir = self.root.join(TEMPLATES_DIR);
        if !dir.is_dir() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            for (kind, source) in DEFAULT_ITEM_TEMPLATES {
                let path = template_path(&dir, kind);
                fs::write(&path, source)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
        }
        read_templates(&dir)
    }

    /// Stores the filter source of `kind`; `None` deletes it.
    pub fn save_filter(&self, kind: &str, source: Option<&str>) -> Result<()> {
        let dir = self.root.join(FILTERS_DIR);
        let path = template_path(&dir, kind);
        match source {
            Some(source) => {
                fs::create_dir_all(&dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                fs::write(&path, source)
                    .with_context(|| format!("failed to write {}", path.display()))
            }
            None if path.is_file() => {
                fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))
            }
            None => Ok(()),
        }
    }
}

fn resolve_root(explicit: Option<PathBuf>, env_dir: Option<OsString>, home: Option<OsString>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    if let Some(dir) = env_dir
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    match home {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(".config").join("kubedash"),
        _ => PathBuf::from(".kubedash"),
    }
}

/// First-run cluster entry: `$KUBECONFIG` if set, else `~/.kube/config` if
/// it exists.
fn default_clusters(kubeconfig: Option<OsString>, home: Option<OsString>) -> Vec<ClusterConfig> {
    if let Some(file) = kubeconfig
        && !file.is_empty()
    {
        return vec![ClusterConfig {
            name: "Default cluster".to_string(),
            config_file: PathBuf::from(file),
            context: None,
        }];
    }
    let Some(home) = home else {
        return Vec::new();
    };
    let local = PathBuf::from(home).join(".kube").join("config");
    if !local.is_file() {
        return Vec::new();
    }
    vec![ClusterConfig {
        name: "Local cluster".to_string(),
        config_file: local,
        context: None,
    }]
}

fn template_path(dir: &Path, kind: &str) -> PathBuf {
    dir.join(kind).with_extension(TEMPLATE_EXTENSION)
}

/// `(<Kind>, source)` for every `<Kind>.tpl` in `dir`, sorted by kind.
fn read_templates(dir: &Path) -> Result<Vec<(String, String)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut templates = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("failed to read {}", dir.display()))?
            .path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(TEMPLATE_EXTENSION) {
            continue;
        }
        let Some(kind) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let source = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        templates.push((kind.to_string(), source));
    }
    templates.sort();
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::{
        CONFIG_FILE, ClusterConfig, Config, ConfigDir, KeyConfig, TabConfig, default_clusters,
        resolve_root,
    };
    use crate::input::Keystroke;
    use ratatui::style::{Color, Style};
    use std::ffi::OsString;
    use std::fs;
    use std::path::PathBuf;
    use tokio::time::Duration;

    const SAMPLE: &str = r#"
general:
  editor: vim
  viewer: less -R
  tick_ms: 100
clusters:
  - name: prod
    config_file: /etc/kube/prod.yaml
    context: admin@prod
tabs:
  - title: Deployments
    kind: Deployment
    group_version: apps/v1
  - title: Services
    kind: Service
colors:
  listview.error.fg: "\\e[38;5;9m"
keys:
  help: f1
"#;

    #[test]
    fn config_dir_resolution_order() {
        let explicit = Some(PathBuf::from("/opt/kd"));
        let env = Some(OsString::from("/env/kd"));
        let home = Some(OsString::from("/home/dev"));

        assert_eq!(resolve_root(explicit, env.clone(), home.clone()), PathBuf::from("/opt/kd"));
        assert_eq!(resolve_root(None, env, home.clone()), PathBuf::from("/env/kd"));
        assert_eq!(
            resolve_root(None, Some(OsString::new()), home),
            PathBuf::from("/home/dev/.config/kubedash")
        );
        assert_eq!(resolve_root(None, None, None), PathBuf::from(".kubedash"));
    }

    #[test]
    fn parses_every_section() {
        let config = serde_yaml::from_str::<Config>(SAMPLE).expect("config");
        assert_eq!(config.general.editor.as_deref(), Some("vim"));
        assert_eq!(config.general.request_timeout_secs, 10);
        assert_eq!(
            config.clusters,
            vec![ClusterConfig {
                name: "prod".to_string(),
                config_file: PathBuf::from("/etc/kube/prod.yaml"),
                context: Some("admin@prod".to_string()),
            }]
        );
        assert_eq!(
            config.tabs[1],
            TabConfig {
                title: "Services".to_string(),
                kind: "Service".to_string(),
                group_version: "v1".to_string(),
            }
        );

        let keys = config.keys.bindings().expect("bindings");
        assert_eq!(keys.help, Keystroke::F(1));
        assert_eq!(keys.refresh, Keystroke::Char('r'));

        let theme = config.theme();
        assert_eq!(
            theme.get("listview.error.fg"),
            Style::default().fg(Color::Indexed(9))
        );
    }

    #[test]
    fn tick_prefers_the_command_line_and_is_clamped() {
        let config = serde_yaml::from_str::<Config>(SAMPLE).expect("config");
        assert_eq!(config.general.tick(None), Duration::from_millis(250));
        assert_eq!(config.general.tick(Some(2_000)), Duration::from_millis(2_000));
        assert_eq!(config.general.tick(Some(60_000)), Duration::from_millis(5_000));
        assert_eq!(Config::default().general.tick(None), Duration::from_secs(1));
    }

    #[test]
    fn bad_key_bindings_are_rejected() {
        let keys = KeyConfig {
            create: "ctrl-".to_string(),
            ..KeyConfig::default()
        };
        assert!(keys.bindings().is_err());
    }

    #[test]
    fn default_cluster_prefers_kubeconfig_env() {
        let clusters = default_clusters(Some(OsString::from("/tmp/kc")), None);
        assert_eq!(clusters[0].name, "Default cluster");
        assert_eq!(clusters[0].config_file, PathBuf::from("/tmp/kc"));

        let home = tempfile::tempdir().expect("tempdir");
        assert!(default_clusters(None, Some(home.path().into())).is_empty());
        fs::create_dir_all(home.path().join(".kube")).expect("mkdir");
        fs::write(home.path().join(".kube/config"), "").expect("write");
        let clusters = default_clusters(Some(OsString::new()), Some(home.path().into()));
        assert_eq!(clusters[0].name, "Local cluster");
        assert_eq!(clusters[0].config_file, home.path().join(".kube/config"));
    }

    #[test]
    fn first_load_writes_defaults() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = ConfigDir::new(root.path().join("kubedash"));
        assert!(dir.prepare().expect("prepare"));
        assert!(!dir.prepare().expect("prepare"));

        let settings = dir.load().expect("load");
        assert!(dir.path().join(CONFIG_FILE).is_file());
        assert!(dir.path().join("item-templates/Pod.tpl").is_file());
        assert!(settings.templates.contains_key("Pod"));
        assert!(settings.filters.is_empty());

        let reloaded = dir.load().expect("reload");
        assert_eq!(reloaded.config, settings.config);
    }

    #[test]
    fn filters_are_saved_loaded_and_removed() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = ConfigDir::new(root.path());
        dir.save_filter("Pod", Some("{{ true }}")).expect("save");
        dir.save_filter("GLOBAL", Some("{{ item.metadata.name != \"\" }}")).expect("save");
        fs::write(root.path().join("filters/Broken.tpl"), "{{ unclosed").expect("write");
        fs::write(root.path().join("filters/notes.txt"), "ignored").expect("write");

        let settings = dir.load().expect("load");
        let mut kinds = settings.filters.keys().cloned().collect::<Vec<_>>();
        kinds.sort();
        assert_eq!(kinds, vec!["GLOBAL", "Pod"]);

        dir.save_filter("Pod", None).expect("remove");
        dir.save_filter("Pod", None).expect("remove twice");
        assert!(!root.path().join("filters/Pod.tpl").exists());
    }
}
