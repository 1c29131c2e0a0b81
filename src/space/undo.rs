//! Undo log for user-attributed mutations.
//!
//! Every action stores the state of one key before and after the mutation.
//! Undo applies the `before` states in reverse order, redo applies the
//! `after` states in order. Nested `begin`/`commit` pairs collapse into one
//! entry when the outermost group commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{DataVariable, Section, Segment, Symbol, TagReference};
use crate::metadata::TypeRecord;

/// One reversible state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UndoAction {
    WriteBytes {
        address: u64,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    InsertBytes {
        address: u64,
        data: Vec<u8>,
    },
    RemoveBytes {
        address: u64,
        data: Vec<u8>,
    },
    Segment {
        start: u64,
        before: Option<Segment>,
        after: Option<Segment>,
    },
    Section {
        name: String,
        before: Option<Section>,
        after: Option<Section>,
    },
    DataVar {
        address: u64,
        before: Option<DataVariable>,
        after: Option<DataVariable>,
    },
    Symbol {
        address: u64,
        namespace: String,
        before: Option<Symbol>,
        after: Option<Symbol>,
    },
    Type {
        name: String,
        before: Option<TypeRecord>,
        after: Option<TypeRecord>,
    },
    Comment {
        address: u64,
        before: Option<String>,
        after: Option<String>,
    },
    Metadata {
        key: String,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    },
    UserFunction {
        address: u64,
        before: bool,
        after: bool,
    },
    TagRef {
        address: u64,
        tag: Uuid,
        before: Option<TagReference>,
        after: Option<TagReference>,
    },
    DataRef {
        from: u64,
        to: u64,
        before: bool,
        after: bool,
    },
}

impl UndoAction {
    /// Short label for logs
    pub fn name(&self) -> &'static str {
        match self {
            UndoAction::WriteBytes { .. } => "write",
            UndoAction::InsertBytes { .. } => "insert",
            UndoAction::RemoveBytes { .. } => "remove",
            UndoAction::Segment { .. } => "segment",
            UndoAction::Section { .. } => "section",
            UndoAction::DataVar { .. } => "data_var",
            UndoAction::Symbol { .. } => "symbol",
            UndoAction::Type { .. } => "type",
            UndoAction::Comment { .. } => "comment",
            UndoAction::Metadata { .. } => "metadata",
            UndoAction::UserFunction { .. } => "function",
            UndoAction::TagRef { .. } => "tag",
            UndoAction::DataRef { .. } => "data_ref",
        }
    }
}

/// A committed group of actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actions: Vec<UndoAction>,
}

impl UndoEntry {
    fn new(actions: Vec<UndoAction>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actions,
        }
    }
}

#[derive(Debug, Default)]
pub struct UndoLog {
    undo: Vec<UndoEntry>,
    redo: Vec<UndoEntry>,
    open: Vec<UndoAction>,
    depth: usize,
    replaying: bool,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) {
        self.depth += 1;
    }

    /// Close one group level. Returns the entry id when the outermost group
    /// committed at least one action.
    pub fn commit(&mut self) -> Option<Uuid> {
        if self.depth == 0 {
            return None;
        }
        self.depth -= 1;
        if self.depth > 0 || self.open.is_empty() {
            return None;
        }
        let entry = UndoEntry::new(std::mem::take(&mut self.open));
        let id = entry.id;
        self.undo.push(entry);
        Some(id)
    }

    pub fn in_group(&self) -> bool {
        self.depth > 0
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub(crate) fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }

    /// Record a user action. Ignored while replaying.
    pub fn record(&mut self, action: UndoAction) {
        if self.replaying {
            return;
        }
        self.redo.clear();
        if self.depth > 0 {
            self.open.push(action);
        } else {
            self.undo.push(UndoEntry::new(vec![action]));
        }
    }

    pub fn pop_undo(&mut self) -> Option<UndoEntry> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<UndoEntry> {
        self.redo.pop()
    }

    pub fn push_undo(&mut self, entry: UndoEntry) {
        self.undo.push(entry);
    }

    pub fn push_redo(&mut self, entry: UndoEntry) {
        self.redo.push(entry);
    }

    pub fn entries(&self) -> Vec<UndoEntry> {
        self.undo.clone()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.open.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(address: u64) -> UndoAction {
        UndoAction::Comment {
            address,
            before: None,
            after: Some("c".into()),
        }
    }

    #[test]
    fn test_nested_groups_commit_once() {
        let mut log = UndoLog::new();
        log.begin();
        log.record(comment(1));
        log.begin();
        log.record(comment(2));
        assert!(log.commit().is_none());
        assert!(log.commit().is_some());
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actions.len(), 2);
    }

    #[test]
    fn test_ungrouped_actions_are_separate_entries() {
        let mut log = UndoLog::new();
        log.record(comment(1));
        log.record(comment(2));
        assert_eq!(log.entries().len(), 2);
        assert!(log.commit().is_none());
    }

    #[test]
    fn test_record_clears_redo_and_replay_is_ignored() {
        let mut log = UndoLog::new();
        log.record(comment(1));
        let entry = log.pop_undo().unwrap();
        log.push_redo(entry);
        assert!(log.can_redo());

        log.set_replaying(true);
        log.record(comment(2));
        assert!(log.can_redo());
        assert!(!log.can_undo());
        log.set_replaying(false);

        log.record(comment(3));
        assert!(!log.can_redo());
    }
}
