// src/attempt/counters.rs

use std::collections::BTreeMap;
use std::fmt;

/// Named counters reported by an attempt, grouped like `group -> name -> value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    groups: BTreeMap<String, BTreeMap<String, u64>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&mut self, group: &str, name: &str, by: u64) {
        *self
            .groups
            .entry(group.to_string())
            .or_default()
            .entry(name.to_string())
            .or_insert(0) += by;
    }

    pub fn get(&self, group: &str, name: &str) -> u64 {
        self.groups
            .get(group)
            .and_then(|g| g.get(name))
            .copied()
            .unwrap_or(0)
    }

    /// Add every counter of `other` into `self`.
    pub fn merge(&mut self, other: &Counters) {
        for (group, names) in &other.groups {
            for (name, value) in names {
                self.incr(group, name, *value);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, u64)> {
        self.groups.iter().flat_map(|(group, names)| {
            names
                .iter()
                .map(move |(name, value)| (group.as_str(), name.as_str(), *value))
        })
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (group, names) in &self.groups {
            writeln!(f, "{group}")?;
            for (name, value) in names {
                writeln!(f, "  {name}={value}")?;
            }
        }
        Ok(())
    }
}
