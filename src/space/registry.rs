//! View-type registry.
//!
//! A view type knows how to build an address space over the bytes of
//! another one. The registry is populated once by `init()` and handed to
//! whatever opens artifacts; there is no global instance.

use std::sync::Arc;

use tracing::debug;

use crate::core::SegmentFlags;
use crate::error::{Result, VspaceError};

use super::backend::{RawBackend, SegmentBackend};
use super::AddressSpace;

pub trait ViewType: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this view type can present `data`.
    fn is_valid_for_data(&self, data: &AddressSpace) -> bool;

    /// Build a view over `data`. The result holds `data` as its parent.
    fn create(&self, data: &Arc<AddressSpace>) -> Result<Arc<AddressSpace>>;
}

/// Flat view: address equals storage offset
pub struct RawViewType;

impl ViewType for RawViewType {
    fn name(&self) -> &str {
        "Raw"
    }

    fn is_valid_for_data(&self, _data: &AddressSpace) -> bool {
        true
    }

    fn create(&self, data: &Arc<AddressSpace>) -> Result<Arc<AddressSpace>> {
        AddressSpace::derive(data, RawBackend)
    }
}

/// Segment-mapped view with one auto segment covering the whole storage at
/// `base`.
pub struct MappedViewType {
    pub base: u64,
}

impl ViewType for MappedViewType {
    fn name(&self) -> &str {
        "Mapped"
    }

    fn is_valid_for_data(&self, data: &AddressSpace) -> bool {
        data.storage_len() > 0
    }

    fn create(&self, data: &Arc<AddressSpace>) -> Result<Arc<AddressSpace>> {
        let view = AddressSpace::derive(data, SegmentBackend::new())?;
        let len = view.storage_len();
        view.add_auto_segment(
            self.base,
            len,
            0,
            len,
            SegmentFlags::READABLE
                | SegmentFlags::WRITABLE
                | SegmentFlags::EXECUTABLE
                | SegmentFlags::CONTAINS_CODE
                | SegmentFlags::CONTAINS_DATA,
        )?;
        Ok(view)
    }
}

#[derive(Default)]
pub struct ViewTypeRegistry {
    types: Vec<Arc<dyn ViewType>>,
}

impl ViewTypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `Raw` and `Mapped` view types.
    pub fn init() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RawViewType));
        registry.register(Arc::new(MappedViewType { base: 0 }));
        registry
    }

    /// Register a view type; a later registration with the same name replaces the earlier one.
    pub fn register(&mut self, view_type: Arc<dyn ViewType>) {
        debug!(name = view_type.name(), "registering view type");
        self.types.retain(|t| t.name() != view_type.name());
        self.types.push(view_type);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ViewType>> {
        self.types.iter().find(|t| t.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.types.iter().map(|t| t.name().to_string()).collect()
    }

    /// Names of view types that accept `data`, in registration order.
    pub fn valid_types_for_data(&self, data: &AddressSpace) -> Vec<String> {
        self.types
            .iter()
            .filter(|t| t.is_valid_for_data(data))
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn create(&self, name: &str, data: &Arc<AddressSpace>) -> Result<Arc<AddressSpace>> {
        let view_type = self
            .get(name)
            .ok_or_else(|| VspaceError::NotFound(format!("view type {}", name)))?;
        if !view_type.is_valid_for_data(data) {
            return Err(VspaceError::InvalidArgument(format!(
                "view type {} does not accept this data",
                name
            )));
        }
        view_type.create(data)
    }
}
