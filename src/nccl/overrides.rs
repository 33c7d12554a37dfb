//! User-supplied values that take precedence over detection

use super::vars::NcclVar;
use std::collections::BTreeMap;

/// Variable name → value set by the operator
///
/// Names may be environment names (`OMP_NUM_THREADS`) or logical keys
/// (`omp_threads`). Both spellings land on the same entry, so a later layer
/// replaces an earlier one whichever spelling each used. Empty values are
/// kept but never win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    values: BTreeMap<String, String>,
}

impl Overrides {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Harvest known variables from an environment snapshot
    ///
    /// Only names in the catalogue are kept, so unrelated environment
    /// variables never leak into the generated file.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut overrides = Self::new();
        for (name, value) in vars {
            let name = name.into();
            if NcclVar::from_name(&name).is_some() {
                overrides.insert(name, value);
            }
        }
        overrides
    }

    /// Harvest known variables from the current process environment
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Set an override, replacing any previous value for the same variable
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let name = match NcclVar::from_name(&name) {
            Some(var) => var.env_name().to_string(),
            None => name,
        };
        self.values.insert(name, value.into());
    }

    /// Non-empty override for a catalogued variable
    pub fn get(&self, var: NcclVar) -> Option<&str> {
        self.values
            .get(var.env_name())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Non-empty overrides whose names are not in the catalogue, by name
    pub fn extra(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .filter(|(name, value)| !value.is_empty() && NcclVar::from_name(name).is_none())
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Overrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut overrides = Self::new();
        for (name, value) in iter {
            overrides.insert(name, value);
        }
        overrides
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Overrides {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}
