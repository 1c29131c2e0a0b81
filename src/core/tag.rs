//! Tags and tag types attached to addresses.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category a tag type belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TagTypeKind {
    #[default]
    User,
    Notification,
    Bookmarks,
}

/// A named category of tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagType {
    pub id: Uuid,
    pub name: String,
    pub icon: String,
    pub visible: bool,
    pub kind: TagTypeKind,
}

impl TagType {
    pub fn new(name: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            icon: icon.into(),
            visible: true,
            kind: TagTypeKind::User,
        }
    }

    pub fn with_kind(mut self, kind: TagTypeKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A tag instance; may be attached to several addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub tag_type: Uuid,
    pub data: String,
}

impl Tag {
    pub fn new(tag_type: &TagType, data: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tag_type: tag_type.id,
            data: data.into(),
        }
    }
}

/// Attachment of a tag to an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagReference {
    pub tag: Tag,
    pub address: u64,
    pub auto_defined: bool,
}
