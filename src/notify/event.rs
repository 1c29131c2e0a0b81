//! The closed set of change events.

use serde::{Deserialize, Serialize};

use crate::core::{
    DataType, DataVariable, Section, Segment, StringReference, Symbol, TagReference, TagType,
};

/// A mutation that already happened to an address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeEvent {
    DataWritten { offset: u64, len: u64 },
    DataInserted { offset: u64, len: u64 },
    DataRemoved { offset: u64, len: u64 },

    FunctionAdded { start: u64 },
    FunctionRemoved { start: u64 },
    FunctionUpdated { start: u64 },
    FunctionUpdateRequested { start: u64 },

    DataVariableAdded(DataVariable),
    DataVariableRemoved(DataVariable),
    DataVariableUpdated(DataVariable),
    /// Comment or other per-address annotation changed
    DataMetadataUpdated { offset: u64 },

    TagTypeUpdated(TagType),
    TagAdded(TagReference),
    TagUpdated(TagReference),
    TagRemoved(TagReference),

    SymbolAdded(Symbol),
    SymbolUpdated(Symbol),
    SymbolRemoved(Symbol),

    StringFound(StringReference),
    StringRemoved(StringReference),

    TypeDefined { name: String, ty: DataType },
    TypeUndefined { name: String, ty: DataType },
    /// A data variable's type refers to a named type that was redefined
    TypeReferenceChanged { name: String, address: u64 },
    /// A structure member refers to a named type that was redefined
    TypeFieldReferenceChanged { name: String, offset: u64 },

    MetadataUpdated { key: String },

    SegmentAdded(Segment),
    SegmentRemoved(Segment),
    SectionAdded(Section),
    SectionRemoved(Section),
}

impl ChangeEvent {
    /// Stable snake_case name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            ChangeEvent::DataWritten { .. } => "data_written",
            ChangeEvent::DataInserted { .. } => "data_inserted",
            ChangeEvent::DataRemoved { .. } => "data_removed",
            ChangeEvent::FunctionAdded { .. } => "function_added",
            ChangeEvent::FunctionRemoved { .. } => "function_removed",
            ChangeEvent::FunctionUpdated { .. } => "function_updated",
            ChangeEvent::FunctionUpdateRequested { .. } => "function_update_requested",
            ChangeEvent::DataVariableAdded(_) => "data_var_added",
            ChangeEvent::DataVariableRemoved(_) => "data_var_removed",
            ChangeEvent::DataVariableUpdated(_) => "data_var_updated",
            ChangeEvent::DataMetadataUpdated { .. } => "data_metadata_updated",
            ChangeEvent::TagTypeUpdated(_) => "tag_type_updated",
            ChangeEvent::TagAdded(_) => "tag_added",
            ChangeEvent::TagUpdated(_) => "tag_updated",
            ChangeEvent::TagRemoved(_) => "tag_removed",
            ChangeEvent::SymbolAdded(_) => "symbol_added",
            ChangeEvent::SymbolUpdated(_) => "symbol_updated",
            ChangeEvent::SymbolRemoved(_) => "symbol_removed",
            ChangeEvent::StringFound(_) => "string_found",
            ChangeEvent::StringRemoved(_) => "string_removed",
            ChangeEvent::TypeDefined { .. } => "type_defined",
            ChangeEvent::TypeUndefined { .. } => "type_undefined",
            ChangeEvent::TypeReferenceChanged { .. } => "type_ref_changed",
            ChangeEvent::TypeFieldReferenceChanged { .. } => "type_field_ref_changed",
            ChangeEvent::MetadataUpdated { .. } => "metadata_updated",
            ChangeEvent::SegmentAdded(_) => "segment_added",
            ChangeEvent::SegmentRemoved(_) => "segment_removed",
            ChangeEvent::SectionAdded(_) => "section_added",
            ChangeEvent::SectionRemoved(_) => "section_removed",
        }
    }

    /// Events that should wake the analysis scheduler.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ChangeEvent::FunctionAdded { .. } | ChangeEvent::FunctionUpdateRequested { .. }
        )
    }
}
