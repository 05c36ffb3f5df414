pub mod client_db;
pub mod database;

pub use client_db::ClientDatabase;

use std::fs;
use std::path::Path;

/// Ensure the parent directory of a database or key file exists
pub fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
