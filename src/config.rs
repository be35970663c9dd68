//! Configuration store: loading, sanitizing, and persisting `config.json`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Current configuration schema version
pub const SCHEMA_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Port used when neither `server.listen_port` nor the deprecated
/// `server.port` is configured
pub const DEFAULT_PORT: &str = "8080";

/// Environment variable consulted when `instance.id` is missing
pub const INSTANCE_ID_ENV: &str = "SPLASH_INSTANCE_ID";

const CONFIG_FILE: &str = "config.json";
const LEGACY_CONFIG_FILE: &str = "data/config.json";

/// Errors from persisting the normalized configuration.
///
/// Loading never fails: a missing or malformed document degrades to an
/// empty one and is healed by the defaulting pass.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to write configuration to {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Root configuration document.
///
/// Unknown keys are captured in `extra` so that rewriting the normalized
/// document does not discard fields written by newer versions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Schema version of the generating app
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Instance identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceConfig>,

    /// Server settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// Project records, one per tenant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<ProjectRecord>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Config {
    /// Schema version, falling back to the current version for documents
    /// that have not been sanitized yet
    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or(SCHEMA_VERSION)
    }

    /// Instance id. Empty until the instance object has been sanitized,
    /// or when the operator explicitly configured an empty id.
    pub fn instance_id(&self) -> &str {
        self.instance
            .as_ref()
            .and_then(|i| i.id.as_deref())
            .unwrap_or("")
    }

    pub fn listen_port(&self) -> &str {
        self.server
            .as_ref()
            .and_then(|s| s.listen_port.as_deref())
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn public_port(&self) -> &str {
        self.server
            .as_ref()
            .and_then(|s| s.public_port.as_deref())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Configured custom error page path, if any
    pub fn error_page(&self) -> Option<&str> {
        self.server.as_ref().and_then(|s| s.error_page.as_deref())
    }

    /// Configured PID file path, if any
    pub fn pid_file(&self) -> Option<&str> {
        self.server.as_ref().and_then(|s| s.pid_file.as_deref())
    }
}

/// Instance identity configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Stable identifier for this deployment. Generated once (UUID v4)
    /// and preserved verbatim on every subsequent load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Server configuration.
///
/// Ports are strings because they are spliced into redirect locations
/// verbatim; the listener parses `listen_port` at bind time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// **Deprecated.** Use `listen_port` instead. Recognized only as a
    /// defaulting source for the split port fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    /// Listening port (i.e. `8080`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<String>,

    /// Public port used in redirect locations, for reverse proxy setups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_port: Option<String>,

    /// Path to a custom error page template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_page: Option<String>,

    /// Path to a PID file locked for the lifetime of the process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One raw project record as it appears in the configuration document.
///
/// Validation happens in the registry; the store carries records through
/// untouched, including invalid ones, so a rewrite never drops operator
/// input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Project ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Common name (i.e. `Project`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cn: Option<String>,

    /// Domain used for request matching (i.e. `project.local`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Redirect target: an absolute URL, or `@<id>` referencing another
    /// project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,

    /// Path to a custom page template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,

    /// Project title (i.e. `Under Construction`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Page title shown in the browser tab
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,

    /// Project subtitle (i.e. `Secret Project`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Owner of the persisted configuration state.
///
/// All reads and writes of `config.json` go through this store; no other
/// component touches the file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory that page paths and the static route resolve against
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical configuration path
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    fn legacy_path(&self) -> PathBuf {
        self.root.join(LEGACY_CONFIG_FILE)
    }

    /// Load the configuration document, apply the defaulting rules, and
    /// persist the normalized result back to the canonical location.
    ///
    /// `sanitize_version_check = false` skips the version upgrade pass;
    /// used on in-process reloads to avoid repeating the upgrade warning.
    pub fn load(&self, sanitize_version_check: bool) -> Result<Config, ConfigError> {
        let canonical = self.config_path();
        let legacy = self.legacy_path();

        let (mut config, migrating) = if canonical.exists() {
            (read_document(&canonical), false)
        } else if legacy.exists() {
            warn!(
                path = %legacy.display(),
                "config.json found in the legacy data/ location. Migrating to the root directory"
            );
            (read_document(&legacy), true)
        } else {
            (Config::default(), false)
        };

        if sanitize_version_check {
            sanitize_version(&mut config);
        }
        sanitize_instance(&mut config, env::var(INSTANCE_ID_ENV).ok());
        sanitize_server(&mut config);

        // Unconditional write-back: this is how synthesized defaults
        // become durable.
        self.persist(&config)?;

        if migrating {
            if let Err(e) = fs::remove_file(&legacy) {
                warn!(
                    path = %legacy.display(),
                    error = %e,
                    "Failed to remove legacy configuration file"
                );
            }
        }

        Ok(config)
    }

    /// Write the normalized document to the canonical path, pretty-printed
    /// with 4-space indentation
    pub fn persist(&self, config: &Config) -> Result<(), ConfigError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        config.serialize(&mut ser).map_err(ConfigError::Serialize)?;

        let path = self.config_path();
        fs::write(&path, buf).map_err(|source| ConfigError::Write { path, source })
    }
}

fn read_document(path: &Path) -> Config {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Failed to read configuration. Starting from an empty document"
            );
            return Config::default();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Malformed configuration. Starting from an empty document"
            );
            Config::default()
        }
    }
}

fn sanitize_version(config: &mut Config) {
    let outdated = config
        .version
        .as_deref()
        .map(|v| version_outdated(v, SCHEMA_VERSION))
        .unwrap_or(true);

    if outdated {
        config.version = Some(SCHEMA_VERSION.to_string());
        warn!(
            version = SCHEMA_VERSION,
            "Configuration version is outdated or missing. Upgrading config file"
        );
    }
}

fn sanitize_instance(config: &mut Config, env_id: Option<String>) {
    let instance = config.instance.get_or_insert_with(InstanceConfig::default);

    // An explicitly configured id, even an empty string, is preserved
    // verbatim.
    if instance.id.is_none() {
        match env_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                warn!(instance_id = %id, "Missing instance.id. Setting from the environment");
                instance.id = Some(id);
            }
            None => {
                let id = Uuid::new_v4().to_string();
                warn!(instance_id = %id, "Missing instance.id. Generating a random id");
                instance.id = Some(id);
            }
        }
    }
}

fn sanitize_server(config: &mut Config) {
    if config.server.is_none() {
        warn!("Missing server configuration. Generating default server configuration");
    }
    let server = config.server.get_or_insert_with(ServerConfig::default);

    if server.port.is_some() {
        warn!("server.port is deprecated and will not be supported in future versions");
    }

    if server.listen_port.is_none() {
        match server.port.clone() {
            Some(port) => {
                warn!(listen_port = %port, "Missing server.listen_port. Setting to server.port");
                server.listen_port = Some(port);
            }
            None => {
                warn!(
                    listen_port = DEFAULT_PORT,
                    "Missing server.listen_port. Setting to the default listen port"
                );
                server.listen_port = Some(DEFAULT_PORT.to_string());
            }
        }
    }

    if server.public_port.is_none() {
        if let Some(port) = server.port.clone() {
            warn!(public_port = %port, "Missing server.public_port. Setting to server.port");
            server.public_port = Some(port);
        } else if let Some(listen) = server.listen_port.clone() {
            warn!(
                public_port = %listen,
                "Missing server.public_port. Setting to server.listen_port"
            );
            server.public_port = Some(listen);
        } else {
            warn!(
                public_port = DEFAULT_PORT,
                "Missing server.public_port. Setting to the default public port"
            );
            server.public_port = Some(DEFAULT_PORT.to_string());
        }
    }
}

fn parse_version(v: &str) -> Option<(u64, u64, u64)> {
    // Pre-release suffixes are ignored for ordering
    let core = v.split('-').next().unwrap_or(v);
    let mut parts = core.split('.');
    let major = parts.next()?.trim().parse().ok()?;
    let minor = parts.next().map_or(Some(0), |p| p.trim().parse().ok())?;
    let patch = parts.next().map_or(Some(0), |p| p.trim().parse().ok())?;
    Some((major, minor, patch))
}

/// `true` when `version` is older than `current`. Unparseable versions
/// count as outdated.
fn version_outdated(version: &str, current: &str) -> bool {
    match (parse_version(version), parse_version(current)) {
        (Some(v), Some(c)) => v < c,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ConfigStore) {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        (dir, store)
    }

    fn write_config(dir: &TempDir, contents: &str) {
        fs::write(dir.path().join("config.json"), contents).unwrap();
    }

    #[test]
    fn test_empty_config_gets_full_defaults() {
        let (_dir, store) = store();
        std::env::remove_var(INSTANCE_ID_ENV);

        let config = store.load(true).unwrap();

        assert_eq!(config.listen_port(), "8080");
        assert_eq!(config.public_port(), "8080");
        assert_eq!(config.version(), SCHEMA_VERSION);

        let id = Uuid::parse_str(config.instance_id()).unwrap();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_defaults_are_persisted() {
        let (dir, store) = store();

        let config = store.load(true).unwrap();

        let written = fs::read_to_string(dir.path().join("config.json")).unwrap();
        let reread: Config = serde_json::from_str(&written).unwrap();
        assert_eq!(reread.listen_port(), "8080");
        assert_eq!(reread.instance_id(), config.instance_id());
        assert_eq!(reread.version(), SCHEMA_VERSION);
    }

    #[test]
    fn test_deprecated_port_feeds_both_port_fields() {
        let (dir, store) = store();
        write_config(&dir, r#"{"server": {"port": "9090"}}"#);

        let config = store.load(true).unwrap();

        assert_eq!(config.listen_port(), "9090");
        assert_eq!(config.public_port(), "9090");
        // The deprecated field survives the rewrite
        assert_eq!(
            config.server.as_ref().unwrap().port.as_deref(),
            Some("9090")
        );
    }

    #[test]
    fn test_public_port_falls_back_to_listen_port() {
        let (dir, store) = store();
        write_config(&dir, r#"{"server": {"listen_port": "3000"}}"#);

        let config = store.load(true).unwrap();

        assert_eq!(config.listen_port(), "3000");
        assert_eq!(config.public_port(), "3000");
    }

    #[test]
    fn test_configured_ports_are_untouched() {
        let (dir, store) = store();
        write_config(
            &dir,
            r#"{"server": {"listen_port": "8080", "public_port": "80"}}"#,
        );

        let config = store.load(true).unwrap();

        assert_eq!(config.listen_port(), "8080");
        assert_eq!(config.public_port(), "80");
    }

    #[test]
    fn test_double_load_is_idempotent() {
        let (dir, store) = store();

        store.load(true).unwrap();
        let first = fs::read(dir.path().join("config.json")).unwrap();

        store.load(true).unwrap();
        let second = fs::read(dir.path().join("config.json")).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_legacy_location_is_migrated_then_deleted() {
        let (dir, store) = store();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(
            dir.path().join("data/config.json"),
            r#"{"server": {"listen_port": "4000"}}"#,
        )
        .unwrap();

        let config = store.load(true).unwrap();

        assert_eq!(config.listen_port(), "4000");
        assert!(dir.path().join("config.json").exists());
        assert!(!dir.path().join("data/config.json").exists());
    }

    #[test]
    fn test_canonical_wins_over_legacy() {
        let (dir, store) = store();
        write_config(&dir, r#"{"server": {"listen_port": "1111"}}"#);
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(
            dir.path().join("data/config.json"),
            r#"{"server": {"listen_port": "2222"}}"#,
        )
        .unwrap();

        let config = store.load(true).unwrap();

        assert_eq!(config.listen_port(), "1111");
        // Only the migration path deletes the legacy file
        assert!(dir.path().join("data/config.json").exists());
    }

    #[test]
    fn test_outdated_version_is_upgraded() {
        let (dir, store) = store();
        write_config(&dir, r#"{"version": "0.3.0"}"#);

        let config = store.load(true).unwrap();
        assert_eq!(config.version(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_version_is_preserved() {
        let (dir, store) = store();
        write_config(&dir, r#"{"version": "9.9.9"}"#);

        let config = store.load(true).unwrap();
        assert_eq!(config.version(), "9.9.9");
    }

    #[test]
    fn test_version_check_is_skippable() {
        let (dir, store) = store();
        write_config(&dir, r#"{"version": "0.3.0"}"#);

        let config = store.load(false).unwrap();
        assert_eq!(config.version(), "0.3.0");
    }

    #[test]
    fn test_explicit_empty_instance_id_is_preserved() {
        let (dir, store) = store();
        write_config(&dir, r#"{"instance": {"id": ""}}"#);

        let config = store.load(true).unwrap();
        assert_eq!(config.instance_id(), "");
    }

    #[test]
    fn test_existing_instance_id_is_stable_across_loads() {
        let (_dir, store) = store();

        let first = store.load(true).unwrap();
        let second = store.load(true).unwrap();

        assert_eq!(first.instance_id(), second.instance_id());
    }

    #[test]
    fn test_instance_id_from_environment_override() {
        let mut config = Config::default();
        sanitize_instance(&mut config, Some("deploy-7".to_string()));
        assert_eq!(config.instance_id(), "deploy-7");
    }

    #[test]
    fn test_empty_environment_override_generates_uuid() {
        let mut config = Config::default();
        sanitize_instance(&mut config, Some(String::new()));

        let id = Uuid::parse_str(config.instance_id()).unwrap();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_malformed_document_degrades_to_defaults() {
        let (dir, store) = store();
        write_config(&dir, "{not json");

        let config = store.load(true).unwrap();
        assert_eq!(config.listen_port(), "8080");
    }

    #[test]
    fn test_unknown_keys_survive_the_rewrite() {
        let (dir, store) = store();
        write_config(&dir, r#"{"custom_section": {"a": 1}}"#);

        store.load(true).unwrap();

        let written = fs::read_to_string(dir.path().join("config.json")).unwrap();
        let value: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["custom_section"]["a"], 1);
    }

    #[test]
    fn test_projects_round_trip() {
        let (dir, store) = store();
        write_config(
            &dir,
            r#"{"projects": [{"id": "a", "domain": "a.test"}, {"id": "b", "redirect": "@a"}]}"#,
        );

        let config = store.load(true).unwrap();

        assert_eq!(config.projects.len(), 2);
        assert_eq!(config.projects[0].id.as_deref(), Some("a"));
        assert_eq!(config.projects[1].redirect.as_deref(), Some("@a"));
    }

    #[test]
    fn test_version_ordering() {
        assert!(version_outdated("0.3.0", "0.5.1"));
        assert!(version_outdated("0.5.0", "0.5.1"));
        assert!(!version_outdated("0.5.1", "0.5.1"));
        assert!(!version_outdated("0.6.0", "0.5.1"));
        assert!(!version_outdated("1.0.0", "0.5.1"));
        // Unparseable input counts as outdated
        assert!(version_outdated("abc", "0.5.1"));
        // Pre-release suffixes are ignored
        assert!(!version_outdated("0.5.1-alpha.1", "0.5.1"));
    }
}
