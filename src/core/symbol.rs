//! Symbols and qualified names.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::demangle;
use crate::error::{Result, VspaceError};

/// What a symbol names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SymbolKind {
    Function,
    ImportAddress,
    ImportedFunction,
    Data,
    ImportedData,
    External,
    LibraryFunction,
}

/// Linkage binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SymbolBinding {
    #[default]
    None,
    Local,
    Global,
    Weak,
}

/// A `::`-separated name such as `std::vector`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct QualifiedName {
    components: Vec<String>,
}

impl QualifiedName {
    /// Build from components; every component must be non-empty.
    pub fn new<I, S>(components: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let components: Vec<String> = components.into_iter().map(Into::into).collect();
        if components.is_empty() || components.iter().any(|c| c.is_empty()) {
            return Err(VspaceError::InvalidArgument(format!(
                "malformed qualified name {:?}",
                components
            )));
        }
        Ok(Self { components })
    }

    /// Parse `a::b::c`.
    pub fn parse(text: &str) -> Result<Self> {
        Self::new(text.split("::").map(str::trim))
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Last component.
    pub fn name(&self) -> &str {
        self.components.last().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("::"))
    }
}

/// A named address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub binding: SymbolBinding,
    /// Empty string is the default namespace
    pub namespace: String,
    pub short_name: String,
    pub full_name: String,
    pub raw_name: String,
    pub address: u64,
    pub ordinal: u64,
    pub auto_defined: bool,
}

impl Symbol {
    /// Build a symbol from its raw (possibly mangled) name.
    pub fn new(kind: SymbolKind, address: u64, raw_name: impl Into<String>) -> Self {
        let raw_name = raw_name.into();
        let (full_name, short_name) = match demangle::demangle_one(&raw_name) {
            Some(d) => (d.demangled, d.short),
            None => (raw_name.clone(), raw_name.clone()),
        };
        Self {
            kind,
            binding: SymbolBinding::None,
            namespace: String::new(),
            short_name,
            full_name,
            raw_name,
            address,
            ordinal: 0,
            auto_defined: true,
        }
    }

    pub fn with_binding(mut self, binding: SymbolBinding) -> Self {
        self.binding = binding;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_ordinal(mut self, ordinal: u64) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Key under which the metadata store files this symbol.
    pub fn key(&self) -> (u64, String) {
        (self.address, self.namespace.clone())
    }

    /// Matches any of the three name forms.
    pub fn matches_name(&self, name: &str) -> bool {
        self.raw_name == name || self.full_name == name || self.short_name == name
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {} @ {:#x}", self.kind, self.full_name, self.address)
    }
}
