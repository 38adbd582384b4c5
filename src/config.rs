//! Server configuration.
//!
//! Built from defaults, an optional JSON file and `MULTICHAT_*` environment
//! overrides. Positional CLI arguments are applied last by `main`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::constants::{
    DEFAULT_BACKLOG, DEFAULT_MAX_EVENTS, DEFAULT_REGISTRY_CAPACITY, MAX_CLIENT_MSG_LENGTH,
};
use crate::listener::Family;

/// Configuration for one chat server process.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Port number or TCP service name to listen on.
    pub service: String,
    /// Address family of the listener.
    pub family: Family,
    /// Backlog passed to `listen(2)`.
    pub backlog: i32,
    /// Maximum room size; sizes the initial registry when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_size: Option<usize>,
    /// Bytes read from a peer per service call.
    pub read_chunk: usize,
    /// Events collected per `epoll_wait(2)`.
    pub max_events: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: "9034".to_string(),
            family: Family::Ipv4,
            backlog: DEFAULT_BACKLOG,
            room_size: None,
            read_chunk: MAX_CLIENT_MSG_LENGTH,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

impl Config {
    /// Load configuration: the file at `path` if given, then environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parse config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `MULTICHAT_*` overrides from `lookup`. Unparseable values are
    /// ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(backlog) = lookup("MULTICHAT_BACKLOG") {
            if let Ok(backlog) = backlog.parse::<i32>() {
                self.backlog = backlog;
            }
        }

        if let Some(chunk) = lookup("MULTICHAT_READ_CHUNK") {
            if let Ok(chunk) = chunk.parse::<usize>() {
                self.read_chunk = chunk;
            }
        }

        if let Some(max_events) = lookup("MULTICHAT_MAX_EVENTS") {
            if let Ok(max_events) = max_events.parse::<usize>() {
                self.max_events = max_events;
            }
        }

        if let Some(family) = lookup("MULTICHAT_FAMILY") {
            match family.parse::<Family>() {
                Ok(family) => self.family = family,
                Err(e) => log::warn!("ignoring MULTICHAT_FAMILY: {e}"),
            }
        }
    }

    /// Registry slots to allocate up front.
    ///
    /// One more than the room size so the listener does not count against
    /// the user-facing limit.
    pub fn initial_capacity(&self) -> usize {
        self.room_size
            .map_or(DEFAULT_REGISTRY_CAPACITY, |room| room.saturating_add(1))
    }

    /// Read size per service call, clamped to the payload buffer.
    pub fn read_chunk(&self) -> usize {
        self.read_chunk.clamp(1, MAX_CLIENT_MSG_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service, "9034");
        assert_eq!(config.family, Family::Ipv4);
        assert_eq!(config.backlog, 512);
        assert_eq!(config.read_chunk, 256);
        assert_eq!(config.max_events, 16_384);
        assert_eq!(config.room_size, None);
    }

    #[test]
    fn test_initial_capacity_reserves_listener_slot() {
        let mut config = Config::default();
        assert_eq!(config.initial_capacity(), DEFAULT_REGISTRY_CAPACITY);

        config.room_size = Some(1);
        assert_eq!(config.initial_capacity(), 2);

        config.room_size = Some(usize::MAX);
        assert_eq!(config.initial_capacity(), usize::MAX);
    }

    #[test]
    fn test_read_chunk_is_clamped() {
        let mut config = Config::default();
        config.read_chunk = 0;
        assert_eq!(config.read_chunk(), 1);
        config.read_chunk = 4096;
        assert_eq!(config.read_chunk(), MAX_CLIENT_MSG_LENGTH);
        config.read_chunk = 64;
        assert_eq!(config.read_chunk(), 64);
    }

    #[test]
    fn test_overrides_apply_and_ignore_garbage() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("MULTICHAT_BACKLOG", "64"),
            ("MULTICHAT_READ_CHUNK", "not-a-number"),
            ("MULTICHAT_MAX_EVENTS", "128"),
            ("MULTICHAT_FAMILY", "ipv6"),
        ]));

        assert_eq!(config.backlog, 64);
        assert_eq!(config.read_chunk, 256);
        assert_eq!(config.max_events, 128);
        assert_eq!(config.family, Family::Ipv6);
    }

    #[test]
    fn test_from_file_fills_missing_keys() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("multichat.json");
        fs::write(&path, r#"{"service": "7000", "room_size": 8, "family": "ipv6"}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.service, "7000");
        assert_eq!(config.room_size, Some(8));
        assert_eq!(config.family, Family::Ipv6);
        assert_eq!(config.backlog, DEFAULT_BACKLOG);
    }

    #[test]
    fn test_from_file_reports_bad_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parse config file"));
    }

    #[test]
    fn test_from_file_missing_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(Config::from_file(&tmp.path().join("absent.json")).is_err());
    }

    #[test]
    fn test_serialization_round_trips_room_size_omission() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(!json.contains("room_size"));
        assert!(json.contains("\"family\":\"ipv4\""));
    }
}
