use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Environment variables passed to a container.
///
/// Keys are unique and iterated in sorted order, so two equal environments
/// always produce the same container creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Env(BTreeMap<String, String>);

impl Env {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the environment is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Set a variable, replacing any previous value for the same key.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get the value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterate through all variables as `(&str, &str)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge two environments; entries from `other` win on conflicts.
    pub fn merged(&self, other: &Env) -> Env {
        let mut out = self.0.clone();
        out.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Env(out)
    }
}

impl<K, V> FromIterator<(K, V)> for Env
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
