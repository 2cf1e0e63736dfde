//! Build context packaging
//!
//! The engine API receives the build context as a gzipped tar stream.
//! `.dockerignore` patterns are honored through the `ignore` walker; git
//! ignore files are deliberately not, matching the engine's own behavior.

use super::BuildError;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use ignore::WalkBuilder;
use std::path::Path;
use tracing::{debug, trace};

/// Tars and gzips `context_dir`, honoring `.dockerignore`.
pub fn package_build_context(context_dir: &Path) -> Result<Bytes, BuildError> {
    if !context_dir.is_dir() {
        return Err(BuildError::InvalidContext(context_dir.to_path_buf()));
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut archive = tar::Builder::new(encoder);
    archive.follow_symlinks(false);

    let walker = WalkBuilder::new(context_dir)
        .standard_filters(false)
        .hidden(false)
        .add_custom_ignore_filename(".dockerignore")
        .build();

    let mut files = 0usize;
    for entry in walker {
        let entry = entry.map_err(|e| BuildError::ContextWalk(e.to_string()))?;
        let path = entry.path();
        if path == context_dir {
            continue;
        }

        let relative = path
            .strip_prefix(context_dir)
            .map_err(|e| BuildError::ContextWalk(e.to_string()))?;

        let file_type = match entry.file_type() {
            Some(ft) => ft,
            None => continue,
        };

        if file_type.is_dir() {
            archive.append_dir(relative, path)?;
        } else if file_type.is_file() {
            trace!(path = %relative.display(), "Adding to build context");
            archive.append_path_with_name(path, relative)?;
            files += 1;
        }
        // Symlinks pointing outside the context are skipped.
    }

    let encoder = archive.into_inner()?;
    let compressed = encoder.finish()?;
    debug!(files, bytes = compressed.len(), "Packaged build context");
    Ok(Bytes::from(compressed))
}
