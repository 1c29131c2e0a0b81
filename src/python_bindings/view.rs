//! `BinaryView`: a Python handle on an address space.

use std::sync::Arc;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyBytes;

use crate::core::SegmentFlags;
use crate::disasm::ArchitectureRegistry;
use crate::persist::database::open_database;
use crate::space::{AddressSpace, MappedViewType, RawBackend, ViewType, ViewTypeRegistry};
use crate::storage::{BufferAccessor, FileAccessor, StorageAccessor};

#[pyclass(name = "BinaryView", module = "vspace")]
pub struct PyBinaryView {
    inner: Arc<AddressSpace>,
}

fn mapped_view(storage: Box<dyn StorageAccessor>, base: u64) -> PyResult<PyBinaryView> {
    let data = AddressSpace::builder()
        .storage_boxed(storage)
        .backend(RawBackend)
        .build()?;
    let inner = MappedViewType { base }.create(&data)?;
    Ok(PyBinaryView { inner })
}

#[pymethods]
impl PyBinaryView {
    /// View over an in-memory buffer mapped at `base`.
    #[staticmethod]
    #[pyo3(signature = (data, base=0))]
    fn from_bytes(data: Vec<u8>, base: u64) -> PyResult<Self> {
        mapped_view(Box::new(BufferAccessor::new(data)), base)
    }

    /// View over a file mapped copy-on-write at `base`.
    #[staticmethod]
    #[pyo3(signature = (path, base=0))]
    fn open(path: String, base: u64) -> PyResult<Self> {
        mapped_view(Box::new(FileAccessor::open(&path)?), base)
    }

    #[staticmethod]
    fn open_database(path: String) -> PyResult<Self> {
        let inner = open_database(&path, &ViewTypeRegistry::init())?;
        Ok(Self { inner })
    }

    #[getter]
    fn view_type(&self) -> String {
        self.inner.view_type().to_string()
    }

    #[getter]
    fn start(&self) -> u64 {
        self.inner.start()
    }

    #[getter]
    fn end(&self) -> u64 {
        self.inner.end()
    }

    fn __len__(&self) -> usize {
        self.inner.len() as usize
    }

    fn read<'py>(&self, py: Python<'py>, addr: u64, length: usize) -> Bound<'py, PyBytes> {
        PyBytes::new(py, &self.inner.read(addr, length))
    }

    fn write(&self, addr: u64, data: &[u8]) -> usize {
        self.inner.write(addr, data)
    }

    fn insert(&self, addr: u64, data: &[u8]) -> usize {
        self.inner.insert(addr, data)
    }

    fn remove(&self, addr: u64, length: u64) -> u64 {
        self.inner.remove(addr, length)
    }

    fn is_modified(&self) -> bool {
        self.inner.is_modified()
    }

    // segments

    #[pyo3(signature = (start, length, data_offset, data_length, readable=true, writable=false, executable=false))]
    #[allow(clippy::too_many_arguments)]
    fn add_user_segment(
        &self,
        start: u64,
        length: u64,
        data_offset: u64,
        data_length: u64,
        readable: bool,
        writable: bool,
        executable: bool,
    ) -> PyResult<u64> {
        let flags = SegmentFlags::rwx(readable, writable, executable);
        let id = self
            .inner
            .add_user_segment(start, length, data_offset, data_length, flags)?;
        Ok(id.0)
    }

    fn remove_user_segment(&self, start: u64) -> bool {
        self.inner.remove_user_segment(start)
    }

    /// `(start, end, data_offset, data_length, flags, auto)` per segment.
    fn segments(&self) -> Vec<(u64, u64, u64, u64, u32, bool)> {
        self.inner
            .segments()
            .into_iter()
            .map(|s| {
                (
                    s.start(),
                    s.end(),
                    s.data_offset,
                    s.data_length,
                    s.flags.bits(),
                    s.auto_defined,
                )
            })
            .collect()
    }

    fn is_valid_offset(&self, addr: u64) -> bool {
        self.inner.is_valid_offset(addr)
    }

    fn is_offset_readable(&self, addr: u64) -> bool {
        self.inner.is_offset_readable(addr)
    }

    fn is_offset_writable(&self, addr: u64) -> bool {
        self.inner.is_offset_writable(addr)
    }

    fn is_offset_executable(&self, addr: u64) -> bool {
        self.inner.is_offset_executable(addr)
    }

    fn get_next_valid_offset(&self, addr: u64) -> u64 {
        self.inner.get_next_valid_offset(addr)
    }

    #[pyo3(signature = (addr, length, block_size=0))]
    fn get_entropy(&self, addr: u64, length: u64, block_size: usize) -> Vec<f32> {
        self.inner.get_entropy(addr, length, block_size)
    }

    // analysis

    fn set_architecture(&self, name: &str) -> PyResult<()> {
        let architecture = ArchitectureRegistry::init()
            .get(name)
            .ok_or_else(|| PyValueError::new_err(format!("unknown architecture {}", name)))?;
        self.inner.set_architecture(Some(architecture));
        Ok(())
    }

    fn add_function(&self, addr: u64) -> bool {
        self.inner.add_function(addr)
    }

    fn functions(&self) -> Vec<(u64, String)> {
        self.inner
            .functions()
            .into_iter()
            .map(|f| (f.start, f.name))
            .collect()
    }

    fn update_analysis(&self) {
        self.inner.update_analysis();
    }

    /// Blocks without holding the GIL.
    fn update_analysis_and_wait(&self, py: Python<'_>) {
        let inner = self.inner.clone();
        py.detach(move || inner.update_analysis_and_wait());
    }

    fn abort_analysis(&self) {
        self.inner.abort_analysis();
    }

    #[getter]
    fn analysis_progress(&self) -> String {
        self.inner.analysis_progress().to_string()
    }

    // persistence

    fn save(&self, path: &str) -> bool {
        self.inner.save(path)
    }

    fn create_database(&self, path: &str) -> bool {
        self.inner.create_database(path)
    }

    fn save_snapshot(&self, path: &str) -> bool {
        self.inner.save_snapshot(path)
    }

    fn __repr__(&self) -> String {
        format!(
            "<BinaryView {} [{:#x}, {:#x})>",
            self.inner.view_type(),
            self.inner.start(),
            self.inner.end()
        )
    }
}
