use std::path::Path;

use libloading::{Library, Symbol};
use tracing::info;

use crate::mr::app::{Application, MapFn, ReduceFn};
use crate::mr::error::Result;

/// Loads an application from a shared library exporting `map` and `reduce`
/// with the [`MapFn`] and [`ReduceFn`] signatures.
///
/// The library must have been built against this crate with the same
/// compiler, since the two functions cross the boundary with Rust types.
pub fn load(path: &Path) -> Result<Application> {
    info!(plugin = %path.display(), "loading application");
    unsafe {
        let lib = Library::new(path)?;
        let map: MapFn = {
            let symbol: Symbol<MapFn> = lib.get(b"map\0")?;
            *symbol
        };
        let reduce: ReduceFn = {
            let symbol: Symbol<ReduceFn> = lib.get(b"reduce\0")?;
            *symbol
        };
        Ok(Application::from_plugin(map, reduce, lib))
    }
}
