//! Device name to address prefix mapping.
//!
//! Each registered device gets a sanitized address key and a
//! subscription slot. Slots are handed out in registration order.
//!
//! Only the slot order of the registration calls is known here. When the
//! number of registered devices differs from the number of subscriptions
//! (for example because a duplicate name was dropped), slots after the
//! gap no longer line up with the upstream subscription ids. Callers
//! resolve updates by slot as-is and drop unknown ones.

use std::collections::HashMap;

use tracing::warn;

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Sanitized address prefix key.
    pub key: String,
    /// Display name, as shown in the ThingsBoard UI.
    pub name: String,
    /// Subscription slot.
    pub slot: usize,
}

/// Table of known devices, append-only.
#[derive(Debug, Clone, Default)]
pub struct DeviceMap {
    entries: Vec<DeviceEntry>,
    by_key: HashMap<String, usize>,
}

impl DeviceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device by display name.
    ///
    /// Returns the new entry, or `None` when the sanitized key is empty
    /// or already taken (the first registration wins).
    pub fn register_device(&mut self, name: &str) -> Option<&DeviceEntry> {
        let key = sanitize_key(name);
        if key.is_empty() {
            warn!(name, "Ignoring device without usable key");
            return None;
        }
        if self.by_key.contains_key(&key) {
            warn!(key = %key, name, "Ignoring duplicate device");
            return None;
        }

        let slot = self.entries.len();
        self.by_key.insert(key.clone(), slot);
        self.entries.push(DeviceEntry {
            key,
            name: name.to_string(),
            slot,
        });
        self.entries.last()
    }

    pub fn resolve_by_key(&self, key: &str) -> Option<&DeviceEntry> {
        self.by_key.get(key).map(|&slot| &self.entries[slot])
    }

    pub fn resolve_by_slot(&self, slot: usize) -> Option<&DeviceEntry> {
        self.entries.get(slot)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.entries.iter()
    }

    /// Display names in slot order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }
}

/// Derive an address key from a device name.
///
/// Strips everything but alphanumerics and lower-cases the rest.
///
/// # Example
/// ```
/// use thoscy_common::devices::sanitize_key;
///
/// assert_eq!(sanitize_key("Sensor Box #1"), "sensorbox1");
/// assert_eq!(sanitize_key("foo_bar-baz"), "foobarbaz");
/// ```
pub fn sanitize_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
