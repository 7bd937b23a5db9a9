//! URNs: hierarchical object names in the `aff4:/` namespace.

use serde::{Deserialize, Serialize};
use std::fmt;

const SCHEME: &str = "aff4:";

/// Hierarchical object identifier.
///
/// URNs are normalized on construction, so `C.1`, `/C.1/` and `aff4:/C.1`
/// all name the same object and compare equal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Urn(String);

impl Urn {
    pub fn new(path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        let path = path.strip_prefix(SCHEME).unwrap_or(path);

        let mut components: Vec<&str> = Vec::new();
        for component in path.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                other => components.push(other),
            }
        }

        Self(format!("{}/{}", SCHEME, components.join("/")))
    }

    /// The namespace root, `aff4:/`.
    pub fn root() -> Self {
        Self(format!("{}/", SCHEME))
    }

    pub fn is_root(&self) -> bool {
        self.path() == "/"
    }

    /// Child URN with `component` appended (itself normalized).
    pub fn add(&self, component: impl AsRef<str>) -> Self {
        Self::new(format!("{}/{}", self.path(), component.as_ref()))
    }

    /// Full text form including the scheme.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path without the scheme, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.0[SCHEME.len()..]
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.path().split('/').filter(|c| !c.is_empty())
    }

    pub fn depth(&self) -> usize {
        self.components().count()
    }

    pub fn basename(&self) -> &str {
        self.components().last().unwrap_or("")
    }

    pub fn parent(&self) -> Option<Urn> {
        if self.is_root() {
            return None;
        }
        let components: Vec<&str> = self.components().collect();
        Some(Self::new(components[..components.len() - 1].join("/")))
    }

    /// True if `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Urn) -> bool {
        let mine: Vec<&str> = self.components().collect();
        let theirs: Vec<&str> = ancestor.components().collect();
        mine.len() > theirs.len() && mine[..theirs.len()] == theirs[..]
    }

    /// The client identifier when this URN lives in a client namespace
    /// (first component of the form `C.<hex>`).
    pub fn client_id(&self) -> Option<&str> {
        self.components()
            .next()
            .filter(|first| first.starts_with("C.") && first.len() > 2)
    }

    /// URN of the client root this URN belongs to.
    pub fn client_root(&self) -> Option<Urn> {
        self.client_id().map(Urn::new)
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Urn({})", self.0)
    }
}

impl From<&str> for Urn {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl TryFrom<String> for Urn {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self::new(value))
    }
}

impl From<Urn> for String {
    fn from(value: Urn) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(Urn::new("C.1234"), Urn::new("aff4:/C.1234"));
        assert_eq!(Urn::new("/C.1234/"), Urn::new("aff4:/C.1234"));
        assert_eq!(Urn::new("/C.1/fs/../x").as_str(), "aff4:/C.1/x");
        assert_eq!(Urn::new("").as_str(), "aff4:/");
        assert!(Urn::new("aff4:/").is_root());
    }

    #[test]
    fn test_add_and_basename() {
        let urn = Urn::new("C.1").add("fs").add("os/c");
        assert_eq!(urn.as_str(), "aff4:/C.1/fs/os/c");
        assert_eq!(urn.basename(), "c");
        assert_eq!(urn.depth(), 4);
        assert_eq!(urn.parent(), Some(Urn::new("C.1/fs/os")));
        assert_eq!(Urn::root().parent(), None);
    }

    #[test]
    fn test_containment_is_structural() {
        let client = Urn::new("C.1");
        assert!(Urn::new("C.1/fs").is_descendant_of(&client));
        assert!(!Urn::new("C.10/fs").is_descendant_of(&client));
        assert!(!client.is_descendant_of(&client));
        assert!(client.is_descendant_of(&Urn::root()));
    }

    #[test]
    fn test_client_id() {
        assert_eq!(Urn::new("C.abcd/acl_check").client_id(), Some("C.abcd"));
        assert_eq!(Urn::new("C.abcd/acl_check").client_root(), Some(Urn::new("C.abcd")));
        assert_eq!(Urn::new("flows/W:1").client_id(), None);
        assert_eq!(Urn::new("C.").client_id(), None);
    }

    #[test]
    fn test_serde_normalizes() {
        let urn: Urn = serde_json::from_str("\"/C.1//fs\"").unwrap();
        assert_eq!(urn.as_str(), "aff4:/C.1/fs");
        assert_eq!(serde_json::to_string(&urn).unwrap(), "\"aff4:/C.1/fs\"");
    }
}
