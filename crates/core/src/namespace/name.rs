use std::fmt;

use serde::{Deserialize, Serialize};

/**
 * Names
 * =====
 * Every node in the namespace tree is addressed by a hierarchical
 *  name: an ordered sequence of opaque byte components, written
 *  `/like/unix/paths` when the components are printable.
 * The one invariant the rest of the crate leans on: a node's name
 *  is exactly its parent's name plus one trailing component.
 */

/// One opaque component of a hierarchical name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Component(Vec<u8>);

impl Component {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Component(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Component {
    fn from(s: &str) -> Self {
        Component(s.as_bytes().to_vec())
    }
}

impl From<String> for Component {
    fn from(s: String) -> Self {
        Component(s.into_bytes())
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // components are arbitrary bytes; fall back to hex when not printable
        match std::str::from_utf8(&self.0) {
            Ok(s) if !s.contains('/') && !s.chars().any(char::is_control) => write!(f, "{s}"),
            _ => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

/// A hierarchical name: an ordered sequence of components
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Name(Vec<Component>);

impl Name {
    pub fn new() -> Self {
        Name(Vec::new())
    }

    /// Parse a `/`-separated name. Empty segments are dropped,
    /// so `"/a//b/"` and `"/a/b"` name the same node.
    pub fn parse(path: &str) -> Self {
        Name(
            path.split('/')
                .filter(|segment| !segment.is_empty())
                .map(Component::from)
                .collect(),
        )
    }

    /// A new name with one more trailing component
    pub fn append(&self, component: impl Into<Component>) -> Name {
        let mut components = self.0.clone();
        components.push(component.into());
        Name(components)
    }

    /// A new name with all of `suffix` appended
    pub fn extend(&self, suffix: &Name) -> Name {
        let mut components = self.0.clone();
        components.extend_from_slice(&suffix.0);
        Name(components)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Component> {
        self.0.get(index)
    }

    pub fn components(&self) -> &[Component] {
        &self.0
    }

    pub fn is_prefix_of(&self, other: &Name) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl From<&str> for Name {
    fn from(path: &str) -> Self {
        Name::parse(path)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for component in &self.0 {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}
