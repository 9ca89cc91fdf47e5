use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use rein_core::ReinError;

use crate::schema::ReinConfig;

/// Loads and optionally hot-reloads the Rein configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<ReinConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > REIN_CONFIG env > ~/.rein/rein.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("REIN_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rein")
            .join("rein.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> rein_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            ReinConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(ReinError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> ReinConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<ReinConfig>> {
        Arc::clone(&self.config)
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse_file(path: &Path) -> rein_core::Result<ReinConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<ReinConfig>(&raw).map_err(|e| {
            ReinError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply env var overrides (REIN_LOG_LEVEL, REIN_MAX_STEPS, etc.)
    fn apply_env_overrides(mut config: ReinConfig) -> ReinConfig {
        if let Ok(v) = std::env::var("REIN_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("REIN_LOG_FORMAT") {
            config.logging.format = v;
        }
        if let Ok(v) = std::env::var("REIN_MAX_STEPS")
            && let Ok(steps) = v.parse::<u32>()
        {
            config.agent.max_steps = steps;
        }
        if let Ok(v) = std::env::var("REIN_MAX_FAILURES")
            && let Ok(failures) = v.parse::<u32>()
        {
            config.agent.max_failures = failures;
        }
        if let Ok(v) = std::env::var("REIN_SKIP_FAILURES") {
            config.replay.skip_failures = matches!(v.as_str(), "1" | "true" | "yes");
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> rein_core::Result<()> {
        if !self.config_path.exists() {
            return Err(ReinError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::parse_file(&self.config_path)?);
        new_config.validate().map_err(ReinError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that reloads the config when the file changes.
    /// Returns a handle to the watcher (must be kept alive for watching to continue).
    pub fn watch(&self) -> rein_core::Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let path_for_event = self.config_path.clone();

        info!(config_path = ?self.config_path, "starting config file watcher");

        let mut watcher =
            notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "file watcher error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                let is_our_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == path_for_event.file_name());
                if !is_our_file {
                    return;
                }

                // A writer truncates before it writes; wait for the content.
                if std::fs::metadata(&path_for_event).is_ok_and(|m| m.len() == 0) {
                    debug!("config file is empty, waiting for the write to finish");
                    return;
                }
                info!("config file changed, reloading");
                match ConfigLoader::parse_file(&path_for_event) {
                    Ok(new_config) => {
                        let new_config = ConfigLoader::apply_env_overrides(new_config);
                        match new_config.validate() {
                            Ok(_) => {
                                *config.write() = new_config;
                                info!("configuration hot-reloaded successfully");
                            }
                            Err(e) => {
                                warn!(error = %e, "config file is invalid, keeping current config");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "config file has errors, keeping current config");
                    }
                }
            })
            .map_err(|e| ReinError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = match self.config_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| ReinError::Config(format!("failed to watch config directory: {}", e)))?;

        Ok(watcher)
    }
}
