//! Architecture registry.
//!
//! Populated once by `init()` and passed to whatever needs to look an
//! architecture up by name; there is no global instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::core::Endianness;
use crate::error::{Result, VspaceError};

use super::{Architecture, CapstoneArchitecture, IcedArchitecture};

#[derive(Default)]
pub struct ArchitectureRegistry {
    architectures: BTreeMap<String, Arc<dyn Architecture>>,
}

impl ArchitectureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the iced-x86 and capstone backends.
    pub fn init() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(IcedArchitecture::x86()));
        registry.register(Arc::new(IcedArchitecture::x86_64()));
        for endianness in [Endianness::Little, Endianness::Big] {
            registry.register(Arc::new(CapstoneArchitecture::armv7(endianness)));
            registry.register(Arc::new(CapstoneArchitecture::mips32(endianness)));
            registry.register(Arc::new(CapstoneArchitecture::mips64(endianness)));
            registry.register(Arc::new(CapstoneArchitecture::ppc(endianness)));
            registry.register(Arc::new(CapstoneArchitecture::ppc64(endianness)));
        }
        registry.register(Arc::new(CapstoneArchitecture::aarch64()));
        registry.register(Arc::new(CapstoneArchitecture::riscv32()));
        registry.register(Arc::new(CapstoneArchitecture::riscv64()));
        registry
    }

    /// Register an architecture, replacing any with the same name.
    pub fn register(&mut self, architecture: Arc<dyn Architecture>) {
        debug!(name = architecture.name(), "registering architecture");
        self.architectures
            .insert(architecture.name().to_string(), architecture);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Architecture>> {
        self.architectures.get(name).cloned()
    }

    /// Like `get`, but an unknown name is an error.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Architecture>> {
        self.get(name)
            .ok_or_else(|| VspaceError::UnsupportedArchitecture(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.architectures.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.architectures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.architectures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_covers_families() {
        let registry = ArchitectureRegistry::init();
        for name in ["x86", "x86_64", "armv7", "aarch64", "mips32", "ppc64", "rv64gc"] {
            assert!(registry.get(name).is_some(), "missing {}", name);
        }
        assert_eq!(registry.get("x86_64").unwrap().address_size(), 8);
        assert_eq!(
            registry.get("mips32").unwrap().endianness(),
            Endianness::Big
        );
        assert!(matches!(
            registry.require("z80"),
            Err(VspaceError::UnsupportedArchitecture(_))
        ));
    }
}
