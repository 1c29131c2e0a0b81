//! Facts about addresses: data variables, symbols, types, tags, cross
//! references, strings, comments and key/value metadata.
//!
//! The tables live in `MetadataStore` behind the address space's metadata
//! lock. The public operations are `impl AddressSpace` blocks in the
//! submodules so they can pair each change with its undo record and
//! notification.
//!
//! Provenance: a key holds at most one record. A user define replaces
//! whatever is there. An auto define is dropped when a user record holds
//! the key. Removing a user record is a true delete; the auto record it
//! replaced is gone until analysis defines it again.

pub mod data_vars;
pub mod strings;
pub mod symbols;
pub mod tags;
pub mod types;
pub mod xrefs;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::core::{DataType, DataVariable, StringReference, Symbol, TagReference, TagType, XrefKind};

pub use types::TypeRecord;

/// Auto/user provenance carried by a record.
pub(crate) trait Provenance: Clone + PartialEq {
    fn is_auto(&self) -> bool;
    fn set_auto(&mut self, auto: bool);

    /// Equal apart from provenance.
    fn same_value(&self, other: &Self) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.set_auto(false);
        b.set_auto(false);
        a == b
    }
}

impl Provenance for DataVariable {
    fn is_auto(&self) -> bool {
        self.auto_discovered
    }

    fn set_auto(&mut self, auto: bool) {
        self.auto_discovered = auto;
    }
}

impl Provenance for Symbol {
    fn is_auto(&self) -> bool {
        self.auto_defined
    }

    fn set_auto(&mut self, auto: bool) {
        self.auto_defined = auto;
    }
}

impl Provenance for TagReference {
    fn is_auto(&self) -> bool {
        self.auto_defined
    }

    fn set_auto(&mut self, auto: bool) {
        self.auto_defined = auto;
    }
}

/// Result of a layered define
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Defined<T> {
    /// Key was empty
    Added,
    /// Value differs from the previous record
    Updated { before: T },
    /// Same value; provenance may have changed
    Unchanged { before: T },
    /// Auto define under a user record
    Ignored,
}

impl<T> Defined<T> {
    pub(crate) fn before(&self) -> Option<&T> {
        match self {
            Defined::Updated { before } | Defined::Unchanged { before } => Some(before),
            _ => None,
        }
    }
}

pub(crate) fn define_layered<K: Ord, T: Provenance>(
    map: &mut BTreeMap<K, T>,
    key: K,
    value: T,
) -> Defined<T> {
    match map.get(&key) {
        None => {
            map.insert(key, value);
            Defined::Added
        }
        Some(existing) if value.is_auto() && !existing.is_auto() => Defined::Ignored,
        Some(existing) => {
            let before = existing.clone();
            let same = before.same_value(&value);
            map.insert(key, value);
            if same {
                Defined::Unchanged { before }
            } else {
                Defined::Updated { before }
            }
        }
    }
}

/// Auto undefine removes only auto records; user undefine removes any record.
pub(crate) fn undefine_layered<K: Ord, T: Provenance>(
    map: &mut BTreeMap<K, T>,
    key: &K,
    auto: bool,
) -> Option<T> {
    match map.get(key) {
        Some(existing) if auto && !existing.is_auto() => None,
        Some(_) => map.remove(key),
        None => None,
    }
}

/// Every metadata table of one address space
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataStore {
    pub(crate) data_vars: BTreeMap<u64, DataVariable>,
    pub(crate) symbols: BTreeMap<(u64, String), Symbol>,
    pub(crate) types: BTreeMap<String, TypeRecord>,
    pub(crate) tag_types: BTreeMap<Uuid, TagType>,
    pub(crate) tag_refs: BTreeMap<(u64, Uuid), TagReference>,
    /// (from, to, kind) -> auto
    pub(crate) xrefs: BTreeMap<(u64, u64, XrefKind), bool>,
    /// (to, from, kind)
    pub(crate) xrefs_to: BTreeSet<(u64, u64, XrefKind)>,
    pub(crate) strings: BTreeMap<u64, StringReference>,
    pub(crate) comments: BTreeMap<u64, String>,
    /// key -> (value, auto)
    #[serde(with = "kv_as_json_text")]
    pub(crate) kv: BTreeMap<String, (serde_json::Value, bool)>,
}

/// Stores values as JSON text so non-self-describing encoders can carry them.
mod kv_as_json_text {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        kv: &BTreeMap<String, (serde_json::Value, bool)>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut text = BTreeMap::new();
        for (key, (value, auto)) in kv {
            let json = serde_json::to_string(value).map_err(S::Error::custom)?;
            text.insert(key.as_str(), (json, *auto));
        }
        text.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, (serde_json::Value, bool)>, D::Error> {
        let text = BTreeMap::<String, (String, bool)>::deserialize(deserializer)?;
        text.into_iter()
            .map(|(key, (json, auto))| {
                serde_json::from_str(&json)
                    .map(|value| (key, (value, auto)))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the user-provenance records only.
    pub fn user_records(&self) -> MetadataStore {
        MetadataStore {
            data_vars: self
                .data_vars
                .iter()
                .filter(|(_, v)| !v.is_auto())
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            symbols: self
                .symbols
                .iter()
                .filter(|(_, v)| !v.is_auto())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            types: self
                .types
                .iter()
                .filter(|(_, t)| !t.auto_defined)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            tag_types: self.tag_types.clone(),
            tag_refs: self
                .tag_refs
                .iter()
                .filter(|(_, r)| !r.is_auto())
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            xrefs: self
                .xrefs
                .iter()
                .filter(|(_, auto)| !**auto)
                .map(|(k, v)| (*k, *v))
                .collect(),
            xrefs_to: self
                .xrefs
                .iter()
                .filter(|(_, auto)| !**auto)
                .map(|((from, to, kind), _)| (*to, *from, *kind))
                .collect(),
            strings: BTreeMap::new(),
            comments: self.comments.clone(),
            kv: self
                .kv
                .iter()
                .filter(|(_, (_, auto))| !*auto)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Data variables whose type mentions the named type `name`.
    pub(crate) fn data_vars_referencing(&self, name: &str) -> Vec<u64> {
        self.data_vars
            .values()
            .filter(|v| v.ty.references_name(name))
            .map(|v| v.address)
            .collect()
    }

    /// (type name, member offset) of structure members that mention `name`.
    pub(crate) fn fields_referencing(&self, name: &str) -> Vec<(String, u64)> {
        let mut out = Vec::new();
        for (type_name, record) in &self.types {
            if let DataType::Structure { members, .. } = &record.ty {
                for member in members {
                    if member.ty.references_name(name) {
                        out.push((type_name.clone(), member.offset));
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(addr: u64, width: u64, auto: bool) -> DataVariable {
        DataVariable::new(addr, DataType::int(width, false), auto)
    }

    #[test]
    fn test_auto_define_under_user_is_ignored() {
        let mut map = BTreeMap::new();
        assert_eq!(define_layered(&mut map, 1, var(1, 4, false)), Defined::Added);
        assert_eq!(define_layered(&mut map, 1, var(1, 2, true)), Defined::Ignored);
        assert_eq!(map[&1].ty, DataType::int(4, false));
    }

    #[test]
    fn test_provenance_only_change_is_unchanged() {
        let mut map = BTreeMap::new();
        define_layered(&mut map, 1, var(1, 4, true));
        let outcome = define_layered(&mut map, 1, var(1, 4, false));
        assert!(matches!(outcome, Defined::Unchanged { .. }));
        assert!(!map[&1].auto_discovered);
        assert!(matches!(
            define_layered(&mut map, 1, var(1, 8, false)),
            Defined::Updated { .. }
        ));
    }

    #[test]
    fn test_undefine_respects_provenance() {
        let mut map = BTreeMap::new();
        define_layered(&mut map, 1, var(1, 4, false));
        assert!(undefine_layered(&mut map, &1, true).is_none());
        assert!(undefine_layered(&mut map, &1, false).is_some());
        assert!(map.is_empty());
    }
}
