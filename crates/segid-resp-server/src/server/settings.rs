//! Live configuration behind the `cfg.` key prefix.
//!
//! [`Settings`] owns the running [`ServerConfig`]. Writes are validated,
//! persisted to the [`SettingsStore`], and only then made visible, so a value
//! read back with `GET cfg.<name>` is always one that will also be in effect
//! after a restart.

use crate::server::config::{ServerConfig, Setting};
use crate::server::telemetry::LogFilterHandle;
use parking_lot::RwLock;
use segid::SettingsStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(thiserror::Error, Debug)]
pub enum SettingError {
    #[error("unknown config name `{name}`")]
    Unknown { name: String },

    #[error("invalid value for `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("failed to persist setting: {0}")]
    Store(#[from] segid::Error),
}

pub struct Settings<S> {
    config: RwLock<ServerConfig>,
    store: Arc<S>,
    log_filter: Option<LogFilterHandle>,
}

impl<S> Settings<S>
where
    S: SettingsStore,
{
    pub fn new(config: ServerConfig, store: Arc<S>) -> Self {
        Self {
            config: RwLock::new(config),
            store,
            log_filter: None,
        }
    }

    /// Lets `log_level` changes reload the global log filter.
    pub fn with_log_filter(mut self, handle: LogFilterHandle) -> Self {
        self.log_filter = Some(handle);
        self
    }

    /// Returns the current value of the setting called `name`, or `None` if
    /// no such setting exists.
    pub fn get(&self, name: &str) -> Option<String> {
        let setting = name.parse::<Setting>().ok()?;
        Some(self.config.read().get(setting))
    }

    /// Validates, persists and applies `raw` for the setting called `name`.
    ///
    /// Returns the setting that changed. The log filter is reloaded here;
    /// `apply_live` gets the new configuration to push any other live effect
    /// into the components that own it. It runs under the same write lock as
    /// the store write, so concurrent updates reach the store, the running
    /// configuration and those components in the same order.
    #[tracing::instrument(level = "debug", skip(self, apply_live))]
    pub fn set<F>(&self, name: &str, raw: &str, apply_live: F) -> Result<Setting, SettingError>
    where
        F: FnOnce(Setting, &ServerConfig) -> Result<(), SettingError>,
    {
        let setting = name.parse::<Setting>()?;

        let mut config = self.config.write();
        let mut next = config.clone();
        let value = next.apply(setting, raw)?;
        self.store.save_setting(setting.as_str(), &value)?;
        apply_live(setting, &next)?;
        if setting == Setting::LogLevel {
            self.reload_log_filter(&value);
        }
        *config = next;
        drop(config);

        if setting.is_live() {
            tracing::info!(%setting, %value, "setting updated");
        } else {
            tracing::info!(%setting, %value, "setting persisted, applies on next start");
        }

        Ok(setting)
    }

    pub fn batch_size(&self) -> i64 {
        self.config.read().batch_size
    }

    fn reload_log_filter(&self, directive: &str) {
        let Some(handle) = &self.log_filter else {
            return;
        };
        let result = EnvFilter::try_new(directive.trim())
            .map_err(|e| e.to_string())
            .and_then(|filter| handle.reload(filter).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::warn!(directive, error = %e, "failed to reload log filter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::CliArgs;
    use clap::Parser;
    use segid::MemoryStore;

    fn no_live_effects(_: Setting, _: &ServerConfig) -> Result<(), SettingError> {
        Ok(())
    }

    fn settings() -> (Arc<MemoryStore>, Settings<MemoryStore>) {
        let config = ServerConfig::try_from(CliArgs::parse_from(["segid-resp-server"])).unwrap();
        let store = Arc::new(MemoryStore::new());
        (Arc::clone(&store), Settings::new(config, store))
    }

    #[test]
    fn set_then_get_returns_the_new_value() {
        let (_store, settings) = settings();
        assert_eq!(
            settings.set("server_host", "127.0.0.1", no_live_effects).unwrap(),
            Setting::ServerHost
        );
        assert_eq!(settings.get("server_host").unwrap(), "127.0.0.1");
        assert_eq!(settings.get("server_port").unwrap(), "6389");
    }

    #[test]
    fn set_persists_the_canonical_value() {
        let (store, settings) = settings();
        settings.set("batch_size", "250", no_live_effects).unwrap();
        settings.set("log_level", "debug", no_live_effects).unwrap();

        assert_eq!(settings.batch_size(), 250);
        assert_eq!(
            store.settings().unwrap(),
            vec![
                ("batch_size".to_string(), "250".to_string()),
                ("log_level".to_string(), "debug".to_string()),
            ]
        );
    }

    #[test]
    fn values_read_back_exactly_as_written() {
        let (store, settings) = settings();
        settings.set("server_host", " h ", no_live_effects).unwrap();
        settings.set("batch_size", "0500", no_live_effects).unwrap();

        assert_eq!(settings.get("server_host").unwrap(), " h ");
        assert_eq!(settings.get("batch_size").unwrap(), "0500");
        assert_eq!(settings.batch_size(), 500);
        assert_eq!(
            store.settings().unwrap(),
            vec![
                ("batch_size".to_string(), "0500".to_string()),
                ("server_host".to_string(), " h ".to_string()),
            ]
        );
    }

    #[test]
    fn live_effects_see_the_new_configuration() {
        let (_store, settings) = settings();
        let mut seen = None;
        settings
            .set("batch_size", "64", |setting, config| {
                seen = Some((setting, config.batch_size));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, Some((Setting::BatchSize, 64)));
    }

    #[test]
    fn unknown_names() {
        let (store, settings) = settings();
        assert!(settings.get("nope").is_none());
        assert!(matches!(
            settings.set("nope", "1", no_live_effects),
            Err(SettingError::Unknown { name }) if name == "nope"
        ));
        assert!(store.settings().unwrap().is_empty());
    }

    #[test]
    fn invalid_values_are_neither_persisted_nor_applied() {
        let (store, settings) = settings();
        assert!(matches!(
            settings.set("batch_size", "0", no_live_effects),
            Err(SettingError::Invalid {
                name: "batch_size",
                ..
            })
        ));
        assert_eq!(settings.get("batch_size").unwrap(), "1000");
        assert!(store.settings().unwrap().is_empty());
    }
}
