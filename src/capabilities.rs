//! Capability registry
//!
//! Tools declare the capabilities they need; flows receive grants from the
//! invocation and from policies. The set of capability names is fixed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Network,
    Filesystem,
    Scheduling,
    Secrets,
    Subprocess,
    Environment,
}

impl Capability {
    pub const ALL: &'static [Capability] = &[
        Capability::Network,
        Capability::Filesystem,
        Capability::Scheduling,
        Capability::Secrets,
        Capability::Subprocess,
        Capability::Environment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Network => "network",
            Capability::Filesystem => "filesystem",
            Capability::Scheduling => "scheduling",
            Capability::Secrets => "secrets",
            Capability::Subprocess => "subprocess",
            Capability::Environment => "environment",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide name table.
#[derive(Debug)]
pub struct CapabilityRegistry {
    by_name: BTreeMap<&'static str, Capability>,
}

impl CapabilityRegistry {
    pub fn standard() -> &'static CapabilityRegistry {
        static REGISTRY: OnceLock<CapabilityRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| CapabilityRegistry {
            by_name: Capability::ALL.iter().map(|c| (c.as_str(), *c)).collect(),
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Capability> {
        self.by_name.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_name.keys().copied()
    }
}

/// Granted capabilities for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse grant names, returning the first unknown name as the error.
    pub fn from_names<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = CapabilityRegistry::standard();
        let mut set = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            let cap = registry.lookup(name).ok_or_else(|| name.to_string())?;
            set.insert(cap);
        }
        Ok(Self(set))
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn union(&self, other: &CapabilitySet) -> CapabilitySet {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// First capability in `required` that is not granted.
    pub fn missing<'a>(&self, required: &'a [Capability]) -> Option<&'a Capability> {
        required.iter().find(|c| !self.0.contains(c))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = CapabilityRegistry::standard();
        assert_eq!(registry.lookup("network"), Some(Capability::Network));
        assert_eq!(registry.lookup("teleport"), None);
        assert_eq!(registry.names().count(), Capability::ALL.len());
    }

    #[test]
    fn test_grants() {
        let grants = CapabilitySet::from_names(["network"]).unwrap();
        let policy: CapabilitySet = [Capability::Secrets].into_iter().collect();
        let effective = grants.union(&policy);
        assert!(effective.contains(Capability::Network));
        assert!(effective.contains(Capability::Secrets));
        assert_eq!(
            effective.missing(&[Capability::Network, Capability::Filesystem]),
            Some(&Capability::Filesystem)
        );
        assert_eq!(
            CapabilitySet::from_names(["network", "bogus"]).unwrap_err(),
            "bogus"
        );
    }
}
