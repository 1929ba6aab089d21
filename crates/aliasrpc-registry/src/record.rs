use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Methods a published alias accepts: everything, or an explicit set.
///
/// Serialized as the JSON string `"all"` or as an array of method names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllowedMethods {
    Only(BTreeSet<String>),
    All(AllMarker),
}

/// The `"all"` literal of [`AllowedMethods::All`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllMarker {
    #[serde(rename = "all")]
    All,
}

impl AllowedMethods {
    pub fn all() -> Self {
        AllowedMethods::All(AllMarker::All)
    }

    pub fn only<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AllowedMethods::Only(methods.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, method: &str) -> bool {
        match self {
            AllowedMethods::All(_) => true,
            AllowedMethods::Only(methods) => methods.contains(method),
        }
    }
}

impl From<Option<&BTreeSet<String>>> for AllowedMethods {
    fn from(whitelist: Option<&BTreeSet<String>>) -> Self {
        match whitelist {
            Some(methods) => AllowedMethods::Only(methods.clone()),
            None => AllowedMethods::all(),
        }
    }
}

/// Where a server serving an alias can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Server identity
    pub id: String,
    pub host: String,
    pub port: u16,
    pub methods: AllowedMethods,
    /// Wall clock time of the last publish, in milliseconds since the epoch
    #[serde(default)]
    pub published_at_ms: u64,
}

impl ServiceRecord {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16, methods: AllowedMethods) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            methods,
            published_at_ms: now_ms(),
        }
    }

    /// `host:port`, ready to connect to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Stamps the record with the current time.
    pub fn touch(&mut self) {
        self.published_at_ms = now_ms();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
