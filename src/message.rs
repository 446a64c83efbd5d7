//! Key/value message envelope shared by requests and responses

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{Acknowledgement, Command, Notification};

/// Key carrying a client command
pub const REQUEST_KEY: &str = "Request";
/// Key carrying a sensor state push
pub const NOTIFICATION_KEY: &str = "Perimeter Notification";
/// Key carrying the acknowledgement of any request
pub const RESPONSE_KEY: &str = "Response";

/// An ordered mapping from string keys to string values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    entries: BTreeMap<String, String>,
}

impl Message {
    /// Create an empty message
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any previous value for the key
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// A command request: `{"Request": "<command>"}`
    pub fn request(command: Command) -> Self {
        Self::new().with(REQUEST_KEY, command.as_wire())
    }

    /// A state push: `{"Perimeter Notification": "<state>"}`
    pub fn notification(notification: Notification) -> Self {
        Self::new().with(NOTIFICATION_KEY, notification.as_wire())
    }

    /// An acknowledgement: `{"Response": "OK" | "Failed: <text>"}`
    pub fn response(ack: &Acknowledgement) -> Self {
        Self::new().with(RESPONSE_KEY, ack.to_string())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Message {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
