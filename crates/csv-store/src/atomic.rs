use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::StoreError;

/// Replace `path` with `bytes` through a temp file in the same directory and a
/// rename, so readers see either the old or the new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Finish an in-memory CSV writer and return its bytes.
pub(crate) fn into_bytes(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, StoreError> {
    writer
        .into_inner()
        .map_err(|e| StoreError::Io(e.into_error()))
}
