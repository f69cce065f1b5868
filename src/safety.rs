//! Safety checks for files the binaries write next to their inputs.
//!
//! The preview, backup and removed-entries reports all live beside the cache
//! snapshot and the library database; a mistyped flag must never point one of
//! them at an input.

use std::path::Path;

use crate::error::{Error, Result};

/// Validates that an output path is safe to overwrite.
///
/// Checks:
/// - Output must carry the required extension (e.g., "json")
/// - Output cannot be the same file as any of the provided source paths
/// - Output cannot look like a library database
pub fn validate_output_path(
    output: &Path,
    required_extension: &str,
    source_paths: &[&Path],
) -> Result<()> {
    let unsafe_output = |reason: String| Error::UnsafeOutput {
        path: output.to_path_buf(),
        reason,
    };

    let extension = output.extension().and_then(|e| e.to_str()).unwrap_or("");
    if !extension.eq_ignore_ascii_case(required_extension) {
        return Err(unsafe_output(format!(
            "output must have a .{} extension",
            required_extension
        )));
    }

    for source in source_paths {
        if same_file(output, source) {
            return Err(unsafe_output(format!(
                "output cannot be the same as source '{}'",
                source.display()
            )));
        }
    }

    let output_name = output.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let dangerous_patterns = ["library.db", ".sqlite", ".blb"];
    for pattern in dangerous_patterns {
        if output_name.contains(pattern) {
            return Err(unsafe_output(format!(
                "output matches library database pattern '{}'",
                pattern
            )));
        }
    }

    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
