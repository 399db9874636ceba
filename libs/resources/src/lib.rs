//! # armada-resources
//!
//! The resource algebra shared by the master and the agent.
//!
//! A [`Resources`] value is a multiset of named resources. Each resource has
//! one of three shapes:
//!
//! - **scalar**: a non-negative real (`cpus:4`, `mem:8192`)
//! - **ranges**: a union of closed integer intervals (`ports:[31000-32000]`)
//! - **set**: labelled items (`disks:{sda,sdb}`)
//!
//! Addition and subtraction are commutative and act per-name, per-shape.
//! Subtracting below zero (or removing range/set elements that are not
//! present) is a programmer error: the agent only ever subtracts resources
//! it previously accounted, so the algebra asserts instead of saturating.

mod error;
mod value;

pub use error::ResourceError;
pub use value::{Range, Value};

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A single named resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub value: Value,
}

impl Resource {
    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: Value::Scalar(value),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.value)
    }
}

/// A multiset of named resources.
///
/// Internally keyed by name so addition and subtraction are O(log n) per
/// resource and formatting is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources {
    entries: BTreeMap<String, Value>,
}

impl Resources {
    /// An empty resource vector.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a scalar resource by name, returning `default` when the name
    /// is absent or has a non-scalar shape.
    pub fn get_scalar(&self, name: &str, default: f64) -> f64 {
        match self.entries.get(name) {
            Some(Value::Scalar(v)) => *v,
            _ => default,
        }
    }

    /// Looks up a resource value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Iterates resources in name order.
    pub fn iter(&self) -> impl Iterator<Item = Resource> + '_ {
        self.entries.iter().map(|(name, value)| Resource {
            name: name.clone(),
            value: value.clone(),
        })
    }
}

impl From<Vec<Resource>> for Resources {
    fn from(resources: Vec<Resource>) -> Self {
        let mut out = Resources::new();
        for resource in resources {
            out += resource;
        }
        out
    }
}

impl AddAssign<Resource> for Resources {
    fn add_assign(&mut self, rhs: Resource) {
        match self.entries.get_mut(&rhs.name) {
            Some(existing) => existing.add_in_place(&rhs.value),
            None => {
                self.entries.insert(rhs.name, rhs.value);
            }
        }
    }
}

impl AddAssign<&Resources> for Resources {
    fn add_assign(&mut self, rhs: &Resources) {
        for resource in rhs.iter() {
            *self += resource;
        }
    }
}

impl Add<&Resources> for Resources {
    type Output = Resources;

    fn add(mut self, rhs: &Resources) -> Resources {
        self += rhs;
        self
    }
}

impl SubAssign<Resource> for Resources {
    fn sub_assign(&mut self, rhs: Resource) {
        let existing = self
            .entries
            .get_mut(&rhs.name)
            .unwrap_or_else(|| panic!("subtracting unknown resource {}", rhs.name));
        existing.sub_in_place(&rhs.value);
        if existing.is_none() {
            self.entries.remove(&rhs.name);
        }
    }
}

impl SubAssign<&Resources> for Resources {
    fn sub_assign(&mut self, rhs: &Resources) {
        for resource in rhs.iter() {
            *self -= resource;
        }
    }
}

impl Sub<&Resources> for Resources {
    type Output = Resources;

    fn sub(mut self, rhs: &Resources) -> Resources {
        self -= rhs;
        self
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.entries {
            if !first {
                write!(f, ";")?;
            }
            first = false;
            write!(f, "{}:{}", name, value)?;
        }
        Ok(())
    }
}

impl FromStr for Resources {
    type Err = ResourceError;

    /// Parses the textual form, e.g. `cpus:4;mem:8192;ports:[31000-32000]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = Resources::new();

        for part in s.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (name, text) = part
                .split_once(':')
                .ok_or_else(|| ResourceError::MissingSeparator(part.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ResourceError::EmptyName(part.to_string()));
            }

            out += Resource {
                name: name.to_string(),
                value: text.trim().parse()?,
            };
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn parse(s: &str) -> Resources {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_scalars() {
        let r = parse("cpus:4;mem:8192");
        assert_eq!(r.get_scalar("cpus", 0.0), 4.0);
        assert_eq!(r.get_scalar("mem", 0.0), 8192.0);
        assert_eq!(r.get_scalar("disk", 7.0), 7.0);
    }

    #[test]
    fn test_parse_ranges() {
        let r = parse("ports:[31000-32000,33000-34000]");
        match r.get("ports") {
            Some(Value::Ranges(ranges)) => {
                assert_eq!(ranges.len(), 2);
                assert_eq!(ranges[0], Range::new(31000, 32000));
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_parse_set() {
        let r = parse("disks:{sda,sdb}");
        let expected: BTreeSet<String> = ["sda", "sdb"].iter().map(|s| s.to_string()).collect();
        assert_eq!(r.get("disks"), Some(&Value::Set(expected)));
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert!(matches!(
            "cpus".parse::<Resources>(),
            Err(ResourceError::MissingSeparator(_))
        ));
    }

    #[test]
    fn test_add_is_commutative() {
        let a = parse("cpus:1;mem:256");
        let b = parse("cpus:2;ports:[1-10]");
        let ab = a.clone() + &b;
        let ba = b + &a;
        assert_eq!(ab, ba);
        assert_eq!(ab.get_scalar("cpus", 0.0), 3.0);
        assert_eq!(ab.get_scalar("mem", 0.0), 256.0);
    }

    #[test]
    fn test_sub_restores_original() {
        let total = parse("cpus:4;mem:8192");
        let task = parse("cpus:1;mem:256");
        let rest = total.clone() - &task;
        assert_eq!(rest.get_scalar("cpus", 0.0), 3.0);
        assert_eq!(rest + &task, total);
    }

    #[test]
    fn test_sub_to_zero_removes_entry() {
        let total = parse("cpus:1");
        let rest = total - &parse("cpus:1");
        assert!(rest.is_empty());
    }

    #[test]
    #[should_panic(expected = "subtracting unknown resource")]
    fn test_sub_unknown_name_panics() {
        let mut r = parse("cpus:1");
        r -= &parse("mem:1");
    }

    #[test]
    #[should_panic]
    fn test_sub_below_zero_panics() {
        let mut r = parse("cpus:1");
        r -= &parse("cpus:2");
    }

    #[test]
    fn test_range_add_coalesces() {
        let a = parse("ports:[1-10]");
        let b = parse("ports:[11-20]");
        let sum = a + &b;
        assert_eq!(sum, parse("ports:[1-20]"));
    }

    #[test]
    fn test_range_sub_splits() {
        let a = parse("ports:[1-20]");
        let rest = a - &parse("ports:[5-10]");
        assert_eq!(rest, parse("ports:[1-4,11-20]"));
    }

    #[test]
    fn test_display_roundtrip() {
        let text = "cpus:1.5;disks:{sda,sdb};mem:1024;ports:[31000-32000]";
        let r = parse(text);
        assert_eq!(r.to_string(), text);
        assert_eq!(parse(&r.to_string()), r);
    }

    #[test]
    fn test_json_roundtrip() {
        let r = parse("cpus:1;mem:256;ports:[1-10]");
        let json = serde_json::to_string(&r).unwrap();
        let back: Resources = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
