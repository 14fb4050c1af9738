//! Bundled applications, and loading of external ones.

use std::path::Path;

use crate::mr::app::Application;
use crate::mr::error::{Error, Result};

pub mod indexer;
pub mod plugin;
pub mod wc;

/// Names accepted by [`by_name`].
pub const BUILTIN: &[&str] = &["wc", "indexer"];

pub fn by_name(name: &str) -> Option<Application> {
    match name {
        "wc" => Some(Application::new(wc::map, wc::reduce)),
        "indexer" => Some(Application::new(indexer::map, indexer::reduce)),
        _ => None,
    }
}

/// Resolves a built-in name, or else a path to a shared library.
pub fn load(app: &str) -> Result<Application> {
    if let Some(application) = by_name(app) {
        return Ok(application);
    }
    let path = Path::new(app);
    if path.extension().map_or(false, |ext| ext == "so") || path.exists() {
        return plugin::load(path);
    }
    Err(Error::UnknownApplication(app.to_string()))
}
