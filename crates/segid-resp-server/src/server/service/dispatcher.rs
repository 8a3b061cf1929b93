//! Command dispatch.
//!
//! [`Dispatcher`] is synchronous: allocator refills and settings writes call
//! straight into the store. Connections run it on the blocking pool.
//!
//! | Command | Reply |
//! |---|---|
//! | `GET key` | next ID as a bulk string, nil for an unregistered key |
//! | `GET cfg.<name>` | setting value, nil for an unknown name |
//! | `SET key n` | `OK` after registering `key` and resetting it to `n` |
//! | `SET cfg.<name> v` | `OK` after persisting the setting |
//! | `EXISTS key [key ...]` | number of registered keys |
//! | `DEL key [key ...]` | number of keys removed |
//! | `SELECT n` | `OK` |
//! | `PING [msg]` | `PONG` or `msg` |

use crate::server::{
    config::Setting,
    service::error::CommandError,
    settings::Settings,
    telemetry::{
        increment_command_errors, increment_commands, increment_ids_issued,
        record_command_duration,
    },
};
use core::str;
use segid::{CounterStore, Registry, SettingsStore};
use segid_resp_core::{Reply, Request};
use std::sync::Arc;
use std::time::Instant;

/// Keys starting with this prefix address live configuration.
pub const CONFIG_PREFIX: &str = "cfg.";

pub struct Dispatcher<S> {
    registry: Arc<Registry<S>>,
    settings: Arc<Settings<S>>,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<S> Dispatcher<S>
where
    S: CounterStore + SettingsStore,
{
    pub fn new(registry: Arc<Registry<S>>, settings: Arc<Settings<S>>) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &Arc<Registry<S>> {
        &self.registry
    }

    /// Runs one command. Failures become error replies; this never fails.
    pub fn dispatch(&self, request: &Request) -> Reply {
        let command = request.command_name();
        let start = Instant::now();
        increment_commands(&command);

        let reply = match self.execute(&command, request) {
            Ok(reply) => reply,
            Err(err) => {
                increment_command_errors(&command);
                if matches!(err, CommandError::Store(_)) {
                    tracing::warn!(%command, error = %err, "command failed");
                } else {
                    tracing::debug!(%command, error = %err, "command rejected");
                }
                err.into()
            }
        };

        record_command_duration(start.elapsed().as_secs_f64() * 1000.0);
        reply
    }

    fn execute(&self, command: &str, request: &Request) -> Result<Reply, CommandError> {
        match command {
            "GET" => self.get(request),
            "SET" => self.set(request),
            "EXISTS" => self.exists(request),
            "DEL" => self.del(request),
            "SELECT" => select(request),
            "PING" => Ok(ping(request)),
            _ => Err(CommandError::NotSupported),
        }
    }

    fn get(&self, request: &Request) -> Result<Reply, CommandError> {
        let key = key_arg(request, 0)?;
        if let Some(name) = key.strip_prefix(CONFIG_PREFIX) {
            return Ok(self.settings.get(name).map_or_else(Reply::nil, Reply::bulk));
        }

        let Some(allocator) = self.registry.get(key) else {
            return Ok(Reply::nil());
        };
        let id = allocator.next_id()?;
        increment_ids_issued(1);
        Ok(Reply::bulk(id.to_string()))
    }

    fn set(&self, request: &Request) -> Result<Reply, CommandError> {
        let key = key_arg(request, 0)?;
        let raw = request.arg(1).ok_or_else(|| not_enough_args(request))?;

        if let Some(name) = key.strip_prefix(CONFIG_PREFIX) {
            let value = str::from_utf8(raw).map_err(|_| CommandError::InvalidUtf8)?;
            self.settings.set(name, value, |setting, config| {
                if setting == Setting::BatchSize {
                    self.registry.set_batch_size(config.batch_size)?;
                }
                Ok(())
            })?;
            return Ok(Reply::ok());
        }

        let value: i64 = str::from_utf8(raw)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .ok_or(CommandError::NotInteger)?;

        let allocator = self.registry.get_or_create(key)?;
        self.registry.store().insert_known_key(key)?;
        allocator.reset(value, false)?;

        tracing::debug!(key, value, "key reset");
        Ok(Reply::ok())
    }

    fn exists(&self, request: &Request) -> Result<Reply, CommandError> {
        if request.args().is_empty() {
            return Err(not_enough_args(request));
        }

        let mut found = 0;
        for index in 0..request.args().len() {
            if self.registry.contains(key_arg(request, index)?) {
                found += 1;
            }
        }
        Ok(Reply::Integer(found))
    }

    fn del(&self, request: &Request) -> Result<Reply, CommandError> {
        if request.args().is_empty() {
            return Err(not_enough_args(request));
        }

        let mut removed = 0;
        for index in 0..request.args().len() {
            let key = key_arg(request, index)?;
            let Some(allocator) = self.registry.get(key) else {
                continue;
            };
            // The key stays registered until the store agrees, so a failed
            // DEL can be retried.
            allocator.delete()?;
            self.registry.store().remove_known_key(key)?;
            self.registry.remove(key);
            tracing::debug!(key, "key deleted");
            removed += 1;
        }
        Ok(Reply::Integer(removed))
    }
}

fn select(request: &Request) -> Result<Reply, CommandError> {
    match request.arg(0) {
        Some(index) if !index.is_empty() => Ok(Reply::ok()),
        _ => Err(not_enough_args(request)),
    }
}

fn ping(request: &Request) -> Reply {
    match request.arg(0) {
        Some(message) => Reply::Bulk(Some(message.clone())),
        None => Reply::status("PONG"),
    }
}

fn key_arg(request: &Request, index: usize) -> Result<&str, CommandError> {
    let raw = request
        .arg(index)
        .ok_or_else(|| not_enough_args(request))?;
    let key = str::from_utf8(raw).map_err(|_| CommandError::InvalidUtf8)?;
    if key.is_empty() {
        return Err(CommandError::EmptyKey);
    }
    Ok(key)
}

fn not_enough_args(request: &Request) -> CommandError {
    CommandError::NotEnoughArgs {
        command: request.command_name().to_ascii_lowercase(),
    }
}
