//! Named semantic labels over virtual ranges.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::address_range::AddressRange;

/// How the bytes of a section are meant to be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SectionSemantics {
    #[default]
    Default,
    ReadOnlyCode,
    ReadOnlyData,
    ReadWriteData,
    External,
}

/// A named range with semantic meaning; independent of the storage mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub range: AddressRange,
    pub semantics: SectionSemantics,
    /// Container-specific type string such as `PROGBITS`
    pub type_name: String,
    pub linked_section: Option<String>,
    pub info_section: Option<String>,
    pub info_data: u64,
    pub align: u64,
    pub entry_size: u64,
    pub auto_defined: bool,
}

impl Section {
    pub fn new(
        name: impl Into<String>,
        start: u64,
        length: u64,
        semantics: SectionSemantics,
        auto_defined: bool,
    ) -> Self {
        Self {
            name: name.into(),
            range: AddressRange::from_len(start, length),
            semantics,
            type_name: String::new(),
            linked_section: None,
            info_section: None,
            info_data: 0,
            align: 1,
            entry_size: 1,
            auto_defined,
        }
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn with_links(mut self, linked: Option<String>, info: Option<String>, info_data: u64) -> Self {
        self.linked_section = linked;
        self.info_section = info;
        self.info_data = info_data;
        self
    }

    pub fn with_layout(mut self, align: u64, entry_size: u64) -> Self {
        self.align = align.max(1);
        self.entry_size = entry_size.max(1);
        self
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.range.start
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.range.end
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Section({} {} {:?})", self.name, self.range, self.semantics)
    }
}
