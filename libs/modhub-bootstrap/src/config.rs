use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::home_dir::resolve_home_dir;

/// Host configuration: typed sections for the kernel plus an untyped bag
/// that each module deserializes on its own.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Bind address and home directory.
    pub server: ServerConfig,
    /// Durable storage for module state (optional, in-memory if None).
    pub database: Option<DatabaseConfig>,
    /// Per-subsystem log sinks; `None` falls back to [`default_logging_config`].
    pub logging: Option<LoggingConfig>,
    /// Module lifecycle settings.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Background periodic tasks.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Extra `<module id>.yaml` files merged into `modules`.
    #[serde(default)]
    pub modules_dir: Option<String>,
    /// Per-module configuration bag: module id → arbitrary JSON/YAML value.
    #[serde(default)]
    pub modules: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Absolute after loading; empty means `~/.modhub`.
    pub home_dir: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite DSN. Supports `${VAR}` expansion and `sqlite://@file(name.sqlite)`
    /// relative to the server home directory.
    pub dsn: String,
    #[serde(default)]
    pub max_conns: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    /// Upper bound for a single lifecycle hook.
    #[serde(with = "humantime_serde", default = "default_hook_timeout")]
    pub hook_timeout: Duration,
    /// Permissions allowed outside of the `<module id>:` namespace.
    #[serde(default)]
    pub permission_exceptions: Vec<String>,
    /// Per-module overrides of manifest defaults.
    #[serde(default)]
    pub overrides: HashMap<String, ModuleOverride>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleOverride {
    /// Replaces the manifest's default `enabled` flag at boot.
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(with = "humantime_serde", default = "default_stats_interval")]
    pub stats_interval: Duration,
}

/// Subsystem (tracing target prefix) to sink settings. `default` catches
/// everything no other key claims.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    /// `trace`..`error`, or `off`.
    pub console_level: String,
    /// Relative paths resolve under `server.home_dir`; empty disables the file sink.
    pub file: String,
    #[serde(default)]
    pub file_level: String,
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

fn default_hook_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(300)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            home_dir: String::new(),
            host: "127.0.0.1".to_string(),
            port: 8087,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            hook_timeout: default_hook_timeout(),
            permission_exceptions: Vec::new(),
            overrides: HashMap::new(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stats_interval: default_stats_interval(),
        }
    }
}

/// Info on the console, debug into a rotated `logs/modhub.log`.
pub fn default_logging_config() -> LoggingConfig {
    let catch_all = Section {
        console_level: "info".into(),
        file: "logs/modhub.log".into(),
        file_level: "debug".into(),
        max_age_days: Some(7),
        max_backups: Some(3),
        max_size_mb: Some(100),
    };
    HashMap::from([("default".to_string(), catch_all)])
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: None,
            logging: Some(default_logging_config()),
            lifecycle: LifecycleConfig::default(),
            scheduler: SchedulerConfig::default(),
            modules_dir: None,
            modules: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the YAML file, then `APP__*` environment variables.
    ///
    /// `server.home_dir` comes out absolute and created; module files from
    /// `modules_dir` are folded into `modules`.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        // Optional sections stay None unless YAML/ENV provide them.
        let base = AppConfig {
            logging: None,
            ..AppConfig::default()
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path.as_ref()))
            // APP__LIFECYCLE__HOOK_TIMEOUT=10s -> lifecycle.hook_timeout
            .merge(Env::prefixed("APP__").split("__"));

        let mut config: AppConfig = figment.extract().with_context(|| {
            format!("invalid configuration in {}", config_path.as_ref().display())
        })?;

        config.validate()?;
        normalize_home_dir_inplace(&mut config.server)
            .context("Failed to resolve server.home_dir")?;

        if let Some(dir) = config.modules_dir.clone() {
            merge_module_files(&mut config.modules, dir)?;
        }

        Ok(config)
    }

    /// Layered load when a file is given, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut config = Self::default();
                normalize_home_dir_inplace(&mut config.server)
                    .context("Failed to resolve default server.home_dir")?;
                Ok(config)
            }
        }
    }

    /// Rejects values that parse but cannot drive the runtime.
    pub fn validate(&self) -> Result<()> {
        if self.lifecycle.hook_timeout.is_zero() {
            anyhow::bail!("lifecycle.hook_timeout must be greater than zero");
        }
        if self.scheduler.stats_interval.is_zero() {
            anyhow::bail!("scheduler.stats_interval must be greater than zero");
        }
        Ok(())
    }

    /// Effective configuration, as printed by `--print-config`.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("config is not representable as YAML")
    }

    /// `--port` replaces `server.port`; each `-v` raises the default console level.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }

        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            match args.verbose {
                0 => {}
                1 => default_section.console_level = "debug".to_string(),
                _ => default_section.console_level = "trace".to_string(),
            }
        }
    }

    /// Resolved SQLite DSN, or `None` when state lives in memory only.
    pub fn database_dsn(&self) -> Result<Option<String>> {
        let Some(db) = &self.database else {
            return Ok(None);
        };
        let expanded = expand_env_in_dsn(&db.dsn)?;
        resolve_sqlite_dsn(&expanded, Path::new(&self.server.home_dir)).map(Some)
    }

    /// Effective default `enabled` flag for a module after config overrides.
    pub fn module_enabled_override(&self, module_id: &str) -> Option<bool> {
        self.lifecycle
            .overrides
            .get(module_id)
            .and_then(|o| o.enabled)
    }
}

/// Flags the binary forwards into configuration loading.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub port: Option<u16>,
    pub print_config: bool,
    pub verbose: u8,
}

const HOME_SUBDIR: &str = ".modhub";

fn normalize_home_dir_inplace(server: &mut ServerConfig) -> Result<()> {
    let configured = Some(server.home_dir.trim())
        .filter(|dir| !dir.is_empty())
        .map(str::to_owned);
    let resolved: PathBuf = resolve_home_dir(configured, HOME_SUBDIR, true)
        .with_context(|| format!("cannot prepare home_dir '{}'", server.home_dir))?;
    server.home_dir = resolved.to_string_lossy().into_owned();
    Ok(())
}

/// Adds `<dir>/<module id>.yaml` files to the module bag; a section already
/// present in the main file wins.
fn merge_module_files(
    bag: &mut HashMap<String, serde_json::Value>,
    dir: impl AsRef<Path>,
) -> Result<()> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "modules_dir not found, skipping");
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        let module_id = path.file_stem().and_then(|s| s.to_str());
        let (true, Some(module_id)) = (is_yaml && path.is_file(), module_id) else {
            continue;
        };
        if bag.contains_key(module_id) {
            continue;
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading module config {}", path.display()))?;
        let section: serde_yaml::Value = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing module config {}", path.display()))?;
        bag.insert(module_id.to_string(), serde_json::to_value(section)?);
    }
    Ok(())
}

/// Substitutes every `${VAR}` in a DSN; a missing variable is an error.
pub fn expand_env_in_dsn(dsn: &str) -> Result<String> {
    let placeholder = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;
    let expanded = placeholder
        .captures_iter(dsn)
        .try_fold(dsn.to_owned(), |acc, cap| -> Result<String> {
            let value = std::env::var(&cap[1])
                .with_context(|| format!("DSN references unset variable '{}'", &cap[1]))?;
            Ok(acc.replace(&cap[0], &value))
        });
    expanded
}

/// Resolves `sqlite://@file(name)` against the home directory.
/// - `sqlite://@file(state.sqlite)` → `<home>/state.sqlite`
/// - `sqlite://@file(/abs/path.db)` → absolute path as-is
/// - `sqlite://` → `<home>/modhub.sqlite`
fn resolve_sqlite_dsn(dsn: &str, home_dir: &Path) -> Result<String> {
    if !dsn.starts_with("sqlite:") {
        anyhow::bail!("Unsupported database DSN '{}': only sqlite is supported", dsn);
    }

    let file = if let Some(start) = dsn.find("@file(") {
        let rest = &dsn[start + "@file(".len()..];
        let end = rest
            .find(')')
            .ok_or_else(|| anyhow::anyhow!("Invalid @file() syntax in SQLite DSN: {}", dsn))?;
        let file_path = Path::new(&rest[..end]);
        if file_path.is_absolute() {
            file_path.to_path_buf()
        } else {
            home_dir.join(file_path)
        }
    } else if matches!(dsn, "sqlite:" | "sqlite://" | "sqlite:///") {
        home_dir.join("modhub.sqlite")
    } else {
        return Ok(dsn.to_string());
    };

    let query = dsn.find('?').map(|i| &dsn[i..]).unwrap_or("");
    let normalized = file.to_string_lossy().replace('\\', "/");
    // Windows absolute paths (C:/...) use the sqlite:path form
    if normalized.len() > 1 && normalized.chars().nth(1) == Some(':') {
        Ok(format!("sqlite:{normalized}{query}"))
    } else {
        Ok(format!("sqlite://{normalized}{query}"))
    }
}
