//! Longwave radiative-flux runs over gridded atmospheres
//!
//! Re-exports [`lwflux_core`] and, with the `python` feature, builds the
//! `lwflux._lib` extension module.

pub use lwflux_core::*;

#[cfg(feature = "python")]
mod python {
    use lwflux_core::python::core;
    use pyo3::prelude::*;
    use pyo3::wrap_pymodule;

    #[pymodule]
    #[pyo3(name = "_lib")]
    fn lwflux(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add("__version__", env!("CARGO_PKG_VERSION"))?;
        m.add_wrapped(wrap_pymodule!(core))?;

        // Make `import lwflux._lib.core` work
        let sys = PyModule::import_bound(m.py(), "sys")?;
        let modules = sys.getattr("modules")?;
        modules.set_item("lwflux._lib.core", m.getattr("core")?)?;
        Ok(())
    }
}
