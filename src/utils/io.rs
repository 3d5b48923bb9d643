//! File I/O primitives with consistent error handling.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Read file contents, mapping failures to `internal.io_error`.
pub fn read_file(path: &Path, operation: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::internal_io(
                format!("File not found: {}", path.display()),
                Some(operation.to_string()),
            )
        } else {
            Error::internal_io(e.to_string(), Some(operation.to_string()))
        }
    })
}

/// Write content to file atomically (write to .tmp, then rename).
///
/// Readers always see either the old content or the new content.
pub fn write_file_atomic(path: &Path, content: &str, operation: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let filename = path.file_name().ok_or_else(|| {
        Error::internal_io(
            format!("Invalid path: {}", path.display()),
            Some(operation.to_string()),
        )
    })?;

    fs::create_dir_all(parent).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("{} (create dir)", operation)))
    })?;

    let tmp_path = parent.join(format!("{}.tmp", filename.to_string_lossy()));

    fs::write(&tmp_path, content)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("{} (write temp)", operation))))?;

    fs::rename(&tmp_path, path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("{} (rename)", operation))))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn read_file_succeeds_for_existing_file() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "kind: Service").unwrap();

        let content = read_file(temp.path(), "test read").unwrap();
        assert!(content.contains("kind: Service"));
    }

    #[test]
    fn read_file_returns_error_for_missing_file() {
        let err = read_file(Path::new("/nonexistent/deploy.yaml"), "test read").unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
        assert!(err.details["error"].as_str().unwrap().contains("File not found"));
    }

    #[test]
    fn atomic_write_creates_parent_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("manifest.yaml");

        write_file_atomic(&path, "apiVersion: v1\n", "test write").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "apiVersion: v1\n");
        assert!(!dir.path().join("out").join("manifest.yaml.tmp").exists());
    }
}
