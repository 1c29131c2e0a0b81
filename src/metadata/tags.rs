//! Tag types and the tags placed on addresses.
//!
//! A tag reference is keyed by (address, tag id). Removing a tag type
//! removes every reference to tags of that type first.

use uuid::Uuid;

use crate::core::{AddressRange, Tag, TagReference, TagType};
use crate::error::{Result, VspaceError};
use crate::notify::ChangeEvent;
use crate::space::{AddressSpace, UndoAction};

use super::{define_layered, undefine_layered, Defined};

impl AddressSpace {
    /// Create and register a tag type.
    pub fn create_tag_type(&self, name: &str, icon: &str) -> TagType {
        let tag_type = TagType::new(name, icon);
        self.add_tag_type(tag_type.clone());
        tag_type
    }

    /// Register or replace a tag type by id.
    pub fn add_tag_type(&self, tag_type: TagType) {
        let _guard = self.mutation.lock();
        let before = self
            .metadata
            .write()
            .tag_types
            .insert(tag_type.id, tag_type.clone());
        if before.as_ref() == Some(&tag_type) {
            return;
        }
        self.emit(vec![ChangeEvent::TagTypeUpdated(tag_type)]);
    }

    /// Remove a tag type and every tag of that type.
    pub fn remove_tag_type(&self, id: Uuid) -> bool {
        let _guard = self.mutation.lock();
        let (removed, refs) = {
            let mut md = self.metadata.write();
            let Some(tag_type) = md.tag_types.remove(&id) else {
                return false;
            };
            let keys: Vec<(u64, Uuid)> = md
                .tag_refs
                .iter()
                .filter(|(_, r)| r.tag.tag_type == id)
                .map(|(k, _)| *k)
                .collect();
            let refs: Vec<TagReference> = keys
                .iter()
                .filter_map(|k| md.tag_refs.remove(k))
                .collect();
            (tag_type, refs)
        };
        let mut events: Vec<ChangeEvent> = refs.into_iter().map(ChangeEvent::TagRemoved).collect();
        events.push(ChangeEvent::TagTypeUpdated(removed));
        self.emit(events);
        true
    }

    pub fn get_tag_type(&self, name: &str) -> Option<TagType> {
        self.metadata
            .read()
            .tag_types
            .values()
            .find(|t| t.name == name)
            .cloned()
    }

    pub fn get_tag_type_by_id(&self, id: Uuid) -> Option<TagType> {
        self.metadata.read().tag_types.get(&id).cloned()
    }

    pub fn tag_types(&self) -> Vec<TagType> {
        let mut out: Vec<TagType> = self.metadata.read().tag_types.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn create_auto_data_tag(&self, addr: u64, tag_type: &TagType, data: &str) -> Result<Tag> {
        let tag = Tag::new(tag_type, data);
        self.add_data_tag(addr, tag.clone(), true)?;
        Ok(tag)
    }

    pub fn create_user_data_tag(&self, addr: u64, tag_type: &TagType, data: &str) -> Result<Tag> {
        let tag = Tag::new(tag_type, data);
        self.add_data_tag(addr, tag.clone(), false)?;
        Ok(tag)
    }

    pub fn add_auto_data_tag(&self, addr: u64, tag: Tag) -> Result<()> {
        self.add_data_tag(addr, tag, true)
    }

    pub fn add_user_data_tag(&self, addr: u64, tag: Tag) -> Result<()> {
        self.add_data_tag(addr, tag, false)
    }

    fn add_data_tag(&self, addr: u64, tag: Tag, auto: bool) -> Result<()> {
        let _guard = self.mutation.lock();
        let reference = TagReference {
            tag,
            address: addr,
            auto_defined: auto,
        };
        let outcome = {
            let mut md = self.metadata.write();
            if !md.tag_types.contains_key(&reference.tag.tag_type) {
                return Err(VspaceError::NotFound(format!(
                    "tag type {}",
                    reference.tag.tag_type
                )));
            }
            define_layered(&mut md.tag_refs, (addr, reference.tag.id), reference.clone())
        };
        if !auto && outcome != Defined::Ignored {
            self.record_undo(UndoAction::TagRef {
                address: addr,
                tag: reference.tag.id,
                before: outcome.before().cloned(),
                after: Some(reference.clone()),
            });
        }
        match outcome {
            Defined::Added => self.emit(vec![ChangeEvent::TagAdded(reference)]),
            Defined::Updated { .. } => self.emit(vec![ChangeEvent::TagUpdated(reference)]),
            Defined::Unchanged { .. } | Defined::Ignored => {}
        }
        Ok(())
    }

    pub fn remove_auto_data_tag(&self, addr: u64, tag_id: Uuid) -> bool {
        self.remove_data_tag(addr, tag_id, true)
    }

    pub fn remove_user_data_tag(&self, addr: u64, tag_id: Uuid) -> bool {
        self.remove_data_tag(addr, tag_id, false)
    }

    fn remove_data_tag(&self, addr: u64, tag_id: Uuid, auto: bool) -> bool {
        let _guard = self.mutation.lock();
        let removed = undefine_layered(&mut self.metadata.write().tag_refs, &(addr, tag_id), auto);
        let Some(reference) = removed else {
            return false;
        };
        if !auto {
            self.record_undo(UndoAction::TagRef {
                address: addr,
                tag: tag_id,
                before: Some(reference.clone()),
                after: None,
            });
        }
        self.emit(vec![ChangeEvent::TagRemoved(reference)]);
        true
    }

    pub fn remove_auto_data_tags_of_type(&self, addr: u64, tag_type: Uuid) -> usize {
        self.remove_data_tags_of_type(addr, tag_type, true)
    }

    pub fn remove_user_data_tags_of_type(&self, addr: u64, tag_type: Uuid) -> usize {
        self.remove_data_tags_of_type(addr, tag_type, false)
    }

    fn remove_data_tags_of_type(&self, addr: u64, tag_type: Uuid, auto: bool) -> usize {
        let _guard = self.mutation.lock();
        let ids: Vec<Uuid> = self
            .get_data_tags_at(addr)
            .into_iter()
            .filter(|r| r.tag.tag_type == tag_type && r.auto_defined == auto)
            .map(|r| r.tag.id)
            .collect();
        ids.into_iter()
            .filter(|id| self.remove_data_tag(addr, *id, auto))
            .count()
    }

    pub(crate) fn restore_tag_ref(&self, addr: u64, tag_id: Uuid, state: Option<TagReference>) {
        let _guard = self.mutation.lock();
        let before = {
            let mut md = self.metadata.write();
            match &state {
                Some(r) => md.tag_refs.insert((addr, tag_id), r.clone()),
                None => md.tag_refs.remove(&(addr, tag_id)),
            }
        };
        let event = match (before, state) {
            (None, Some(r)) => ChangeEvent::TagAdded(r),
            (Some(old), None) => ChangeEvent::TagRemoved(old),
            (Some(old), Some(r)) if old != r => ChangeEvent::TagUpdated(r),
            _ => return,
        };
        self.emit(vec![event]);
    }

    pub fn get_data_tags_at(&self, addr: u64) -> Vec<TagReference> {
        self.metadata
            .read()
            .tag_refs
            .range((addr, Uuid::nil())..=(addr, Uuid::max()))
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn get_data_tags_in_range(&self, range: AddressRange) -> Vec<TagReference> {
        if range.is_empty() {
            return Vec::new();
        }
        self.metadata
            .read()
            .tag_refs
            .range((range.start, Uuid::nil())..)
            .take_while(|((a, _), _)| *a < range.end)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn get_data_tags_of_type(&self, tag_type: Uuid) -> Vec<TagReference> {
        self.metadata
            .read()
            .tag_refs
            .values()
            .filter(|r| r.tag.tag_type == tag_type)
            .cloned()
            .collect()
    }

    /// Replace the data of every reference to `tag_id`; returns how many changed.
    pub fn update_tag_data(&self, tag_id: Uuid, data: &str) -> usize {
        let _guard = self.mutation.lock();
        let updated: Vec<(TagReference, TagReference)> = {
            let mut md = self.metadata.write();
            md.tag_refs
                .values_mut()
                .filter(|r| r.tag.id == tag_id && r.tag.data != data)
                .map(|r| {
                    let before = r.clone();
                    r.tag.data = data.to_string();
                    (before, r.clone())
                })
                .collect()
        };
        for (before, after) in updated.iter().filter(|(b, _)| !b.auto_defined) {
            self.record_undo(UndoAction::TagRef {
                address: before.address,
                tag: tag_id,
                before: Some(before.clone()),
                after: Some(after.clone()),
            });
        }
        let count = updated.len();
        self.emit(
            updated
                .into_iter()
                .map(|(_, after)| ChangeEvent::TagUpdated(after))
                .collect(),
        );
        count
    }
}

#[cfg(test)]
mod tests {
    use crate::core::AddressRange;
    use crate::error::VspaceError;
    use crate::notify::observer_fn;
    use crate::space::AddressSpace;
    use crate::storage::BufferAccessor;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn space() -> Arc<AddressSpace> {
        AddressSpace::builder()
            .storage(BufferAccessor::new(vec![0u8; 16]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_tag_lifecycle_and_cascade() {
        let space = space();
        let bookmarks = space.create_tag_type("Bookmarks", "B");
        let todo = space.create_tag_type("Todo", "T");
        space.create_user_data_tag(0x10, &bookmarks, "here").unwrap();
        space.create_auto_data_tag(0x10, &todo, "fix").unwrap();
        space.create_auto_data_tag(0x30, &bookmarks, "there").unwrap();

        assert_eq!(space.get_data_tags_at(0x10).len(), 2);
        assert_eq!(
            space
                .get_data_tags_in_range(AddressRange::new(0x10, 0x30).unwrap())
                .len(),
            2
        );
        assert_eq!(space.get_data_tags_of_type(bookmarks.id).len(), 2);
        assert_eq!(space.get_tag_type("Todo").unwrap().id, todo.id);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        space.register_observer(observer_fn(move |_, e| {
            s.lock().push(e.name());
            Ok(())
        }));
        assert!(space.remove_tag_type(bookmarks.id));
        assert_eq!(
            *seen.lock(),
            vec!["tag_removed", "tag_removed", "tag_type_updated"]
        );
        assert_eq!(space.get_data_tags_at(0x10).len(), 1);
        assert!(space.get_tag_type_by_id(bookmarks.id).is_none());
    }

    #[test]
    fn test_unknown_tag_type_rejected() {
        let space = space();
        let orphan = crate::core::TagType::new("Orphan", "?");
        assert!(matches!(
            space.create_user_data_tag(0, &orphan, "x"),
            Err(VspaceError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_by_type_and_update_data() {
        let space = space();
        let notes = space.create_tag_type("Notes", "N");
        let a = space.create_user_data_tag(0x20, &notes, "a").unwrap();
        space.create_user_data_tag(0x20, &notes, "b").unwrap();
        assert_eq!(space.update_tag_data(a.id, "a2"), 1);
        assert!(space
            .get_data_tags_at(0x20)
            .iter()
            .any(|r| r.tag.data == "a2"));
        assert_eq!(space.remove_auto_data_tags_of_type(0x20, notes.id), 0);
        assert_eq!(space.remove_user_data_tags_of_type(0x20, notes.id), 2);
        assert!(space.get_data_tags_at(0x20).is_empty());
    }
}
