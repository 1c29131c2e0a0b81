//! vspace: virtual address space, metadata and analysis lifecycle for
//! binary analysis.
//!
//! An `AddressSpace` maps virtual addresses onto a storage accessor through
//! segments, tracks byte modifications, stores metadata facts about
//! addresses, notifies observers of every change, schedules background
//! analysis and serves linear disassembly and search over the result.

pub mod analysis;
pub mod config;
pub mod core;
pub mod demangle;
pub mod disasm;
pub mod entropy;
pub mod error;
pub mod linear;
pub mod logging;
pub mod metadata;
pub mod notify;
pub mod persist;
pub mod search;
pub mod space;
pub mod storage;
pub mod timeout;
pub mod typeparse;

#[cfg(feature = "python-ext")]
pub mod python_bindings;

pub use config::SpaceConfig;
pub use error::{Result, VspaceError};
pub use notify::{ChangeEvent, Observer};
pub use persist::database::open_database;
pub use space::{AddressSpace, AddressSpaceBuilder, ViewTypeRegistry};

#[cfg(feature = "python-ext")]
use pyo3::prelude::*;

#[cfg(feature = "python-ext")]
#[pymodule]
fn vspace(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python_bindings::register_python_bindings(m.py(), m)
}
