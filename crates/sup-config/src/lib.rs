//! # Supervisor Config
//!
//! Read-only hierarchical configuration store.
//!
//! The store is loaded once from a YAML document at daemon start and is
//! immutable afterwards.  Consumers open [`ReadTxn`] views on a slash
//! separated path and read leaves relative to that node.  A missing node
//! is not an error; it reads as empty, and boolean leaves fall back to
//! their defaults.
//!
//! The list of installed applications lives under the
//! [`CFG_NODE_APPS_LIST`] node; an app is installed iff
//! `apps/<name>` exists and is non-empty.

use serde_yaml::Value;
use std::path::Path;
use sup_common::{Error, Result};
use tracing::debug;

/// Name of the node that contains the list of all apps.
///
/// If this node is missing or empty then no apps will be launched.
pub const CFG_NODE_APPS_LIST: &str = "apps";

/// Name of the boolean leaf that defers an app's launch to a manual
/// start request.  Missing or empty reads as false (automatic start).
pub const CFG_NODE_START_MANUAL: &str = "startManual";

/// The configuration store: one immutable YAML tree.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: Value,
}

impl ConfigStore {
    /// Creates an empty store (no apps installed).
    pub fn empty() -> Self {
        Self { root: Value::Null }
    }

    /// Loads the store from a YAML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;

        let store = Self::from_yaml_str(&text)
            .map_err(|e| Error::fault(format!("config file '{}': {e}", path.display())))?;

        debug!("Loaded configuration from '{}'.", path.display());

        Ok(store)
    }

    /// Parses the store from a YAML string.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(text)
            .map_err(|e| Error::fault(format!("invalid configuration: {e}")))?;

        Ok(Self { root })
    }

    /// Opens a read transaction rooted at the given slash-separated path.
    ///
    /// The transaction is valid even if the path does not exist; the
    /// resulting node simply reads as empty.
    pub fn read_txn(&self, path: &str) -> ReadTxn<'_> {
        ReadTxn {
            node: lookup(&self.root, path),
        }
    }
}

/// A read-only view of one node in the configuration tree.
#[derive(Debug, Clone, Copy)]
pub struct ReadTxn<'a> {
    node: Option<&'a Value>,
}

impl<'a> ReadTxn<'a> {
    /// True if the node is missing, null, or an empty mapping.
    pub fn is_empty(&self) -> bool {
        match self.node {
            None | Some(Value::Null) => true,
            Some(Value::Mapping(m)) => m.is_empty(),
            Some(_) => false,
        }
    }

    /// Reads a boolean leaf relative to this node.
    ///
    /// Missing nodes and non-boolean values read as `default`.
    pub fn get_bool(&self, rel_path: &str, default: bool) -> bool {
        match self.node.and_then(|n| lookup(n, rel_path)) {
            Some(Value::Bool(b)) => *b,
            _ => default,
        }
    }

    /// Reads a string leaf relative to this node.
    ///
    /// Missing nodes and non-string values read as None.
    pub fn get_string(&self, rel_path: &str) -> Option<String> {
        match self.node.and_then(|n| lookup(n, rel_path)) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Reads a list of strings relative to this node.
    ///
    /// Missing nodes read as an empty list; non-string elements are
    /// skipped.
    pub fn get_string_list(&self, rel_path: &str) -> Vec<String> {
        match self.node.and_then(|n| lookup(n, rel_path)) {
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Descends to a child node.
    pub fn child(&self, name: &str) -> ReadTxn<'a> {
        ReadTxn {
            node: self.node.and_then(|n| lookup(n, name)),
        }
    }

    /// The names of this node's children, in document order.
    ///
    /// Non-mapping nodes have no children.
    pub fn child_names(&self) -> Vec<String> {
        match self.node {
            Some(Value::Mapping(m)) => m
                .keys()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Walks a slash-separated path through nested mappings.
fn lookup<'a>(mut node: &'a Value, path: &str) -> Option<&'a Value> {
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        node = node.get(segment)?;
    }

    Some(node)
}
