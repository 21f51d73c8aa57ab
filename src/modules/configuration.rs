//! # Configuration propagation.
//!
//! A small set of client-facing settings, each of which several applications
//! may want to override at once. Every key keeps one entry per owner; the
//! effective value is the **most recently pushed** owner's entry, falling
//! back to the documented default (the empty string) when no entries remain.
//!
//! Recency is a per-propagator sequence number, so pushes are totally
//! ordered and ties cannot arise; a repeated push by the same owner
//! refreshes its recency. Whenever an operation changes a key's effective
//! value, a [`ConfigurationChange`] is published on the shared bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ModuleError;
use crate::events::EventBus;

/// The closed set of propagated settings. All string-valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigurationKey {
    ApplicationName,
    LogoUrl,
    FaviconUrl,
}

impl ConfigurationKey {
    pub const ALL: [ConfigurationKey; 3] = [
        ConfigurationKey::ApplicationName,
        ConfigurationKey::LogoUrl,
        ConfigurationKey::FaviconUrl,
    ];

    /// Stable script-facing name of the key.
    pub fn name(self) -> &'static str {
        match self {
            ConfigurationKey::ApplicationName => "applicationName",
            ConfigurationKey::LogoUrl => "logoUrl",
            ConfigurationKey::FaviconUrl => "faviconUrl",
        }
    }

    /// Looks a key up by its script-facing name.
    pub fn from_name(name: &str) -> Result<Self, ModuleError> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == name)
            .ok_or_else(|| ModuleError::not_found("configurable", name))
    }

    fn change(self, value: String) -> ConfigurationChange {
        match self {
            ConfigurationKey::ApplicationName => ConfigurationChange::ApplicationName(value),
            ConfigurationKey::LogoUrl => ConfigurationChange::LogoUrl(value),
            ConfigurationKey::FaviconUrl => ConfigurationChange::FaviconUrl(value),
        }
    }
}

/// One effective-value change, published on the propagator's bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "camelCase")]
pub enum ConfigurationChange {
    ApplicationName(String),
    LogoUrl(String),
    FaviconUrl(String),
}

struct OwnerEntry<T> {
    owner: String,
    value: T,
    seq: u64,
}

/// Multi-owner value store for one key.
struct ConfigurableValue<T> {
    entries: Vec<OwnerEntry<T>>,
}

impl<T: Clone + Default + PartialEq> ConfigurableValue<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn push(&mut self, owner: &str, value: T, seq: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.owner == owner) {
            entry.value = value;
            entry.seq = seq;
        } else {
            self.entries.push(OwnerEntry {
                owner: owner.to_owned(),
                value,
                seq,
            });
        }
    }

    fn reset(&mut self, owner: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.owner != owner);
        self.entries.len() != before
    }

    /// Highest-seq entry's value, or the default when no owner has pushed.
    fn effective(&self) -> T {
        self.entries
            .iter()
            .max_by_key(|e| e.seq)
            .map(|e| e.value.clone())
            .unwrap_or_default()
    }
}

/// Shared fan-out point for configuration overrides.
pub struct ConfigurationPropagator {
    seq: AtomicU64,
    stores: Mutex<HashMap<ConfigurationKey, ConfigurableValue<String>>>,
    changes: EventBus<ConfigurationChange>,
}

impl Default for ConfigurationPropagator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationPropagator {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            stores: Mutex::new(HashMap::new()),
            changes: EventBus::new(),
        }
    }

    /// Bus carrying one event per effective-value change.
    pub fn changes(&self) -> &EventBus<ConfigurationChange> {
        &self.changes
    }

    /// Sets (or overwrites) `owner`'s entry for `key`, making it the most
    /// recent. Publishes a change if the effective value moved.
    pub fn push(&self, owner: &str, key: ConfigurationKey, value: impl Into<String>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.mutate(key, |store| store.push(owner, value.into(), seq));
    }

    /// Removes `owner`'s entry for `key`, if any; the next most recent owner
    /// (or the default) takes over.
    pub fn reset_configurable(&self, key: ConfigurationKey, owner: &str) {
        self.mutate(key, |store| {
            store.reset(owner);
        });
    }

    /// Removes every entry `owner` pushed, across all keys.
    pub fn remove_application(&self, owner: &str) {
        for key in ConfigurationKey::ALL {
            self.reset_configurable(key, owner);
        }
    }

    /// Current effective value for one key.
    pub fn effective_value(&self, key: ConfigurationKey) -> String {
        self.stores
            .lock()
            .get(&key)
            .map(|s| s.effective())
            .unwrap_or_default()
    }

    /// Keys whose effective value differs from the default, with their
    /// values.
    pub fn all_effective_values(&self) -> Vec<(ConfigurationKey, String)> {
        let stores = self.stores.lock();
        ConfigurationKey::ALL
            .into_iter()
            .filter_map(|key| {
                let value = stores.get(&key).map(|s| s.effective()).unwrap_or_default();
                (!value.is_empty()).then_some((key, value))
            })
            .collect()
    }

    fn mutate(&self, key: ConfigurationKey, op: impl FnOnce(&mut ConfigurableValue<String>)) {
        let changed = {
            let mut stores = self.stores.lock();
            let store = stores.entry(key).or_insert_with(ConfigurableValue::new);
            let before = store.effective();
            op(store);
            let after = store.effective();
            (before != after).then_some(after)
        };
        if let Some(value) = changed {
            self.changes.notify(key.change(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BufferingPolicy;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[test]
    fn test_most_recent_owner_wins() {
        let prop = ConfigurationPropagator::new();
        prop.push("app_a", ConfigurationKey::ApplicationName, "Alpha");
        prop.push("app_b", ConfigurationKey::ApplicationName, "Beta");
        assert_eq!(prop.effective_value(ConfigurationKey::ApplicationName), "Beta");

        // Re-push refreshes recency.
        prop.push("app_a", ConfigurationKey::ApplicationName, "Alpha2");
        assert_eq!(prop.effective_value(ConfigurationKey::ApplicationName), "Alpha2");
    }

    #[test]
    fn test_reset_falls_back_to_next_most_recent() {
        let prop = ConfigurationPropagator::new();
        prop.push("app_a", ConfigurationKey::LogoUrl, "a.png");
        prop.push("app_b", ConfigurationKey::LogoUrl, "b.png");

        prop.reset_configurable(ConfigurationKey::LogoUrl, "app_b");
        assert_eq!(prop.effective_value(ConfigurationKey::LogoUrl), "a.png");

        prop.reset_configurable(ConfigurationKey::LogoUrl, "app_a");
        assert_eq!(prop.effective_value(ConfigurationKey::LogoUrl), "");
    }

    #[test]
    fn test_remove_application_clears_every_key() {
        let prop = ConfigurationPropagator::new();
        prop.push("app_a", ConfigurationKey::ApplicationName, "Alpha");
        prop.push("app_a", ConfigurationKey::FaviconUrl, "fav.ico");
        prop.push("app_b", ConfigurationKey::LogoUrl, "b.png");

        prop.remove_application("app_a");
        assert_eq!(
            prop.all_effective_values(),
            vec![(ConfigurationKey::LogoUrl, "b.png".to_owned())]
        );
    }

    #[test]
    fn test_all_effective_values_skips_defaults() {
        let prop = ConfigurationPropagator::new();
        assert!(prop.all_effective_values().is_empty());

        prop.push("app_a", ConfigurationKey::ApplicationName, "Alpha");
        prop.push("app_a", ConfigurationKey::LogoUrl, "");
        assert_eq!(
            prop.all_effective_values(),
            vec![(ConfigurationKey::ApplicationName, "Alpha".to_owned())]
        );
    }

    #[test]
    fn test_key_names_round_trip() {
        for key in ConfigurationKey::ALL {
            assert_eq!(ConfigurationKey::from_name(key.name()), Ok(key));
        }
        let err = ConfigurationKey::from_name("noSuchKey").unwrap_err();
        assert_eq!(err.as_label(), "module_not_found");
    }

    #[tokio::test]
    async fn test_changes_published_only_on_effective_moves() {
        let prop = ConfigurationPropagator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        prop.changes().subscribe(
            move |c: ConfigurationChange| {
                tx.send(c).unwrap();
            },
            BufferingPolicy::Unbounded,
        );

        prop.push("app_a", ConfigurationKey::ApplicationName, "Alpha");
        // New top owner, same value: effective value unchanged, no event.
        prop.push("app_b", ConfigurationKey::ApplicationName, "Alpha");
        prop.push("app_b", ConfigurationKey::ApplicationName, "Beta");
        prop.reset_configurable(ConfigurationKey::ApplicationName, "app_b");

        let mut seen = Vec::new();
        for _ in 0..3 {
            let c = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timed out")
                .expect("closed");
            seen.push(c);
        }
        assert_eq!(
            seen,
            vec![
                ConfigurationChange::ApplicationName("Alpha".into()),
                ConfigurationChange::ApplicationName("Beta".into()),
                ConfigurationChange::ApplicationName("Alpha".into()),
            ]
        );
        // The app_b push of the identical value produced no event.
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[test]
    fn test_change_serialization_shape() {
        let change = ConfigurationChange::LogoUrl("logo.svg".into());
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "key": "logoUrl", "value": "logo.svg" })
        );
    }
}
