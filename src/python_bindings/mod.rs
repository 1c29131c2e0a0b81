//! Python bindings for vspace.
//!
//! Only the `BinaryView` facade is exposed; everything else stays on the
//! Rust side.

pub mod view;

use pyo3::prelude::*;

/// Register all Python bindings with the module.
pub fn register_python_bindings(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;
    m.add_class::<view::PyBinaryView>()?;
    Ok(())
}

/// Install the tracing subscriber; `json` switches to JSON lines.
#[pyfunction]
#[pyo3(signature = (level = "info", json = false))]
fn init_logging(level: &str, json: bool) {
    crate::logging::init_from_config(&crate::config::LoggingConfig {
        level: level.to_string(),
        json,
    });
}
