//! Type-string parsing.
//!
//! `TypeParser` is the seam; `CTypeParser` is the built-in implementation.
//! The `AddressSpace` entry points size pointers from the default
//! architecture and resolve references against the stored named types.

pub mod c;
mod lexer;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{DataType, QualifiedName};
use crate::error::Result;
use crate::space::AddressSpace;

pub use c::CTypeParser;

/// Declarations found in a block of source text, in source order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeParserResult {
    pub types: Vec<(QualifiedName, DataType)>,
    pub variables: Vec<(QualifiedName, DataType)>,
    pub functions: Vec<(QualifiedName, DataType)>,
}

pub trait TypeParser: Send + Sync {
    /// Parse a single declaration such as `uint32_t count`.
    fn parse_type_string(&self, text: &str) -> Result<(DataType, QualifiedName)>;

    /// Parse a sequence of `;`-terminated declarations.
    fn parse_types_from_string(&self, text: &str) -> Result<TypeParserResult>;
}

impl AddressSpace {
    fn type_parser(&self) -> Result<CTypeParser> {
        let architecture = self.require_architecture()?;
        Ok(CTypeParser::new(architecture.address_size()).with_types(self.types()))
    }

    /// Parse one declaration; needs a default architecture.
    pub fn parse_type_string(&self, text: &str) -> Result<(DataType, QualifiedName)> {
        let parsed = self.type_parser()?.parse_type_string(text);
        if let Err(e) = &parsed {
            debug!(error = %e, "type string rejected");
        }
        parsed
    }

    /// Parse a block of declarations; needs a default architecture.
    pub fn parse_types_from_string(&self, text: &str) -> Result<TypeParserResult> {
        self.type_parser()?.parse_types_from_string(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::IcedArchitecture;
    use crate::error::VspaceError;
    use crate::storage::BufferAccessor;
    use std::sync::Arc;

    fn space() -> Arc<AddressSpace> {
        AddressSpace::builder()
            .storage(BufferAccessor::new(vec![0u8; 16]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_requires_architecture() {
        let space = space();
        assert!(matches!(
            space.parse_type_string("int x"),
            Err(VspaceError::MissingArchitecture)
        ));
        space.set_architecture(Some(Arc::new(IcedArchitecture::x86())));
        let (ty, name) = space.parse_type_string("void *p").unwrap();
        assert_eq!(ty.width(), 4);
        assert_eq!(name.name(), "p");
    }

    #[test]
    fn test_parse_uses_stored_type_widths() {
        let space = space();
        space.set_architecture(Some(Arc::new(IcedArchitecture::x86_64())));
        space
            .define_user_type("pair", DataType::array(DataType::int(4, false), 2))
            .unwrap();
        let result = space
            .parse_types_from_string("pair items[3]; int count;")
            .unwrap();
        assert_eq!(result.variables.len(), 2);
        assert_eq!(result.variables[0].1.width(), 24);
        assert!(matches!(
            space.parse_types_from_string("pair"),
            Err(VspaceError::Parse { .. })
        ));
    }
}
