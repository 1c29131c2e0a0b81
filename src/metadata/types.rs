//! Named type library.
//!
//! Each name maps to one record with a stable id that survives
//! redefinition and rename. Lookups follow `NamedReference` chains until a
//! concrete type; a chain that revisits a name is a `TypeCycle` error.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

use crate::core::{DataType, QualifiedName};
use crate::error::{Result, VspaceError};
use crate::notify::ChangeEvent;
use crate::space::{AddressSpace, UndoAction};

use super::{define_layered, undefine_layered, Defined, MetadataStore, Provenance};

/// A stored named type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecord {
    pub id: Uuid,
    pub ty: DataType,
    pub auto_defined: bool,
}

impl Provenance for TypeRecord {
    fn is_auto(&self) -> bool {
        self.auto_defined
    }

    fn set_auto(&mut self, auto: bool) {
        self.auto_defined = auto;
    }

    fn same_value(&self, other: &Self) -> bool {
        self.ty == other.ty
    }
}

fn resolve(types: &BTreeMap<String, TypeRecord>, name: &str) -> Result<Option<DataType>> {
    let mut visited = BTreeSet::new();
    let mut current = name.to_string();
    let mut last_reference: Option<DataType> = None;
    loop {
        if !visited.insert(current.clone()) {
            return Err(VspaceError::TypeCycle {
                name: name.to_string(),
            });
        }
        let Some(record) = types.get(&current) else {
            // dangling reference resolves to itself
            return Ok(last_reference);
        };
        match &record.ty {
            DataType::NamedReference { name: next, .. } => {
                last_reference = Some(record.ty.clone());
                current = next.clone();
            }
            ty => return Ok(Some(ty.clone())),
        }
    }
}

/// Events owed to everything that refers to `name` after it changed.
fn reference_events(md: &MetadataStore, name: &str) -> Vec<ChangeEvent> {
    let mut events: Vec<ChangeEvent> = md
        .data_vars_referencing(name)
        .into_iter()
        .map(|address| ChangeEvent::TypeReferenceChanged {
            name: name.to_string(),
            address,
        })
        .collect();
    events.extend(
        md.fields_referencing(name)
            .into_iter()
            .map(|(owner, offset)| ChangeEvent::TypeFieldReferenceChanged { name: owner, offset }),
    );
    events
}

impl AddressSpace {
    /// Define or replace the auto type `name`; returns its id.
    pub fn define_auto_type(&self, name: &str, ty: DataType) -> Result<Uuid> {
        self.define_type(name, ty, true)
    }

    pub fn define_user_type(&self, name: &str, ty: DataType) -> Result<Uuid> {
        self.define_type(name, ty, false)
    }

    fn define_type(&self, name: &str, ty: DataType, auto: bool) -> Result<Uuid> {
        let qualified = QualifiedName::parse(name)?;
        let name = qualified.to_string();
        let _guard = self.mutation.lock();
        let (outcome, record, events) = {
            let mut md = self.metadata.write();
            let id = md.types.get(&name).map(|r| r.id).unwrap_or_else(Uuid::new_v4);
            let record = TypeRecord {
                id,
                ty: ty.clone(),
                auto_defined: auto,
            };
            let outcome = define_layered(&mut md.types, name.clone(), record.clone());
            let mut events = Vec::new();
            match &outcome {
                Defined::Added => events.push(ChangeEvent::TypeDefined {
                    name: name.clone(),
                    ty: ty.clone(),
                }),
                Defined::Updated { .. } => {
                    events.push(ChangeEvent::TypeDefined {
                        name: name.clone(),
                        ty: ty.clone(),
                    });
                    events.extend(reference_events(&md, &name));
                }
                Defined::Unchanged { .. } | Defined::Ignored => {}
            }
            (outcome, record, events)
        };
        if outcome == Defined::Ignored {
            return Ok(self.get_type_id(&name).unwrap_or(record.id));
        }
        if !auto {
            self.record_undo(UndoAction::Type {
                name: name.clone(),
                before: outcome.before().cloned(),
                after: Some(record.clone()),
            });
        }
        debug!(name = %name, auto, "type defined");
        self.emit(events);
        Ok(record.id)
    }

    pub fn undefine_auto_type(&self, name: &str) -> bool {
        self.undefine_type(name, true)
    }

    pub fn undefine_user_type(&self, name: &str) -> bool {
        self.undefine_type(name, false)
    }

    fn undefine_type(&self, name: &str, auto: bool) -> bool {
        let _guard = self.mutation.lock();
        let (removed, events) = {
            let mut md = self.metadata.write();
            let removed = undefine_layered(&mut md.types, &name.to_string(), auto);
            let events = match &removed {
                Some(record) => {
                    let mut events = vec![ChangeEvent::TypeUndefined {
                        name: name.to_string(),
                        ty: record.ty.clone(),
                    }];
                    events.extend(reference_events(&md, name));
                    events
                }
                None => Vec::new(),
            };
            (removed, events)
        };
        let Some(record) = removed else {
            return false;
        };
        if !auto {
            self.record_undo(UndoAction::Type {
                name: name.to_string(),
                before: Some(record),
                after: None,
            });
        }
        self.emit(events);
        true
    }

    /// Move a type to a new name keeping its id. Fails when `new_name` is taken.
    pub fn rename_type(&self, old_name: &str, new_name: &str) -> Result<bool> {
        let new_name = QualifiedName::parse(new_name)?.to_string();
        let _guard = self.mutation.lock();
        let record = {
            let mut md = self.metadata.write();
            if md.types.contains_key(&new_name) {
                return Err(VspaceError::InvalidArgument(format!(
                    "type {} already exists",
                    new_name
                )));
            }
            match md.types.remove(old_name) {
                Some(record) => {
                    md.types.insert(new_name.clone(), record.clone());
                    record
                }
                None => return Ok(false),
            }
        };
        if !record.auto_defined {
            self.begin_undo_actions();
            self.record_undo(UndoAction::Type {
                name: old_name.to_string(),
                before: Some(record.clone()),
                after: None,
            });
            self.record_undo(UndoAction::Type {
                name: new_name.clone(),
                before: None,
                after: Some(record.clone()),
            });
            self.commit_undo_actions();
        }
        self.emit(vec![
            ChangeEvent::TypeUndefined {
                name: old_name.to_string(),
                ty: record.ty.clone(),
            },
            ChangeEvent::TypeDefined {
                name: new_name,
                ty: record.ty,
            },
        ]);
        Ok(true)
    }

    pub(crate) fn restore_type(&self, name: &str, state: Option<TypeRecord>) {
        let _guard = self.mutation.lock();
        let events = {
            let mut md = self.metadata.write();
            let before = match &state {
                Some(record) => md.types.insert(name.to_string(), record.clone()),
                None => md.types.remove(name),
            };
            match (before, state) {
                (None, Some(record)) => vec![ChangeEvent::TypeDefined {
                    name: name.to_string(),
                    ty: record.ty,
                }],
                (Some(old), None) => {
                    let mut events = vec![ChangeEvent::TypeUndefined {
                        name: name.to_string(),
                        ty: old.ty,
                    }];
                    events.extend(reference_events(&md, name));
                    events
                }
                (Some(old), Some(record)) if old.ty != record.ty => {
                    let mut events = vec![ChangeEvent::TypeDefined {
                        name: name.to_string(),
                        ty: record.ty,
                    }];
                    events.extend(reference_events(&md, name));
                    events
                }
                _ => Vec::new(),
            }
        };
        self.emit(events);
    }

    /// Resolved type stored under `name`.
    pub fn get_type_by_name(&self, name: &str) -> Result<Option<DataType>> {
        resolve(&self.metadata.read().types, name)
    }

    pub fn get_type_by_id(&self, id: Uuid) -> Result<Option<DataType>> {
        let md = self.metadata.read();
        match md.types.iter().find(|(_, r)| r.id == id) {
            Some((name, _)) => resolve(&md.types, name),
            None => Ok(None),
        }
    }

    pub fn get_type_id(&self, name: &str) -> Option<Uuid> {
        self.metadata.read().types.get(name).map(|r| r.id)
    }

    pub fn get_type_name_by_id(&self, id: Uuid) -> Option<String> {
        self.metadata
            .read()
            .types
            .iter()
            .find(|(_, r)| r.id == id)
            .map(|(name, _)| name.clone())
    }

    /// Stored (unresolved) types by name.
    pub fn types(&self) -> Vec<(String, DataType)> {
        self.metadata
            .read()
            .types
            .iter()
            .map(|(name, r)| (name.clone(), r.ty.clone()))
            .collect()
    }

    pub fn is_type_auto_defined(&self, name: &str) -> bool {
        self.metadata
            .read()
            .types
            .get(name)
            .is_some_and(|r| r.auto_defined)
    }
}
