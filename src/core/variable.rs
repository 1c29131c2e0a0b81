//! Typed data variables at fixed addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::address_range::AddressRange;
use crate::core::data_type::DataType;

/// A typed fact about the memory at `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVariable {
    pub address: u64,
    pub ty: DataType,
    pub auto_discovered: bool,
}

impl DataVariable {
    pub fn new(address: u64, ty: DataType, auto_discovered: bool) -> Self {
        Self {
            address,
            ty,
            auto_discovered,
        }
    }

    /// Bytes covered by the variable; at least one so zero-width types stay addressable.
    pub fn range(&self) -> AddressRange {
        AddressRange::from_len(self.address, self.ty.width().max(1))
    }
}

impl fmt::Display for DataVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {:#x}", self.ty, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_uses_type_width() {
        let v = DataVariable::new(0x100, DataType::int(4, false), true);
        assert_eq!(v.range().end, 0x104);
        let v = DataVariable::new(0x100, DataType::Void, true);
        assert_eq!(v.range().len(), 1);
        assert_eq!(v.to_string(), "void @ 0x100");
    }
}
