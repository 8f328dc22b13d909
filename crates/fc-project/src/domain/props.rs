//! Property Bundles
//!
//! Ordered key/value configuration addressed by a logical path name
//! (e.g. "jobs/common.properties") within a project version.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Props {
    pub path_name: String,
    #[serde(default)]
    pub entries: IndexMap<String, String>,
}

impl Props {
    pub fn new(path_name: impl Into<String>) -> Self {
        Self {
            path_name: path_name.into(),
            entries: IndexMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(key, value);
        self
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.entries)
    }

    pub(crate) fn from_entries_json(path_name: impl Into<String>, json: &str) -> serde_json::Result<Self> {
        Ok(Self {
            path_name: path_name.into(),
            entries: serde_json::from_str(json)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_keep_insertion_order() {
        let props = Props::new("common.properties")
            .with("zeta", "1")
            .with("alpha", "2")
            .with("mid", "3");

        let json = props.entries_json().unwrap();
        let restored = Props::from_entries_json("common.properties", &json).unwrap();

        let keys: Vec<&str> = restored.entries.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(restored, props);
    }

    #[test]
    fn test_put_overwrites_in_place() {
        let mut props = Props::new("a").with("k", "v1").with("other", "x");
        props.put("k", "v2");
        assert_eq!(props.get("k"), Some("v2"));
        assert_eq!(props.entries.get_index_of("k"), Some(0));
        assert_eq!(props.len(), 2);
    }
}
