//! Image path resolution.
//!
//! Turns whatever the operator typed into an absolute, provider-free path
//! that can be handed straight to the platform, and makes sure the parent
//! directory exists before any disk mutation happens.

use crate::config::Settings;
use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Separator between a shell provider name and the provider-local path,
/// e.g. `Microsoft.PowerShell.Core\FileSystem::C:\dev\ws.vhdx`.
const PROVIDER_SEPARATOR: &str = "::";

/// Resolve `raw` to an absolute, lexically normalized path.
///
/// - A leading provider qualifier (`FileSystem::`) is stripped. A `::`
///   later in the path is part of a file or directory name.
/// - A leading `~` expands to the home directory.
/// - Relative paths are joined onto the working directory.
/// - `.` and `..` components are folded without touching the filesystem.
///
/// Performs no IO.
pub fn normalize(raw: &str, settings: &Settings) -> Result<PathBuf> {
    let unqualified = strip_provider(raw.trim());

    if unqualified.is_empty() {
        return Err(Error::path(raw, "image path is empty"));
    }

    let expanded = expand_home(unqualified, &settings.home_dir);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        settings.current_dir.join(expanded)
    };

    let normalized = fold_components(&absolute);
    if normalized.file_name().is_none() {
        return Err(Error::path(
            &normalized,
            "image path must name a file, not a directory root",
        ));
    }

    Ok(normalized)
}

/// Resolve `raw` and create its parent directory if missing.
///
/// With `create_parent` false nothing is created; this is used by
/// what-if runs and read-only commands.
pub fn resolve(raw: &str, settings: &Settings, create_parent: bool) -> Result<PathBuf> {
    let path = normalize(raw, settings)?;

    if create_parent {
        ensure_parent(&path)?;
    }

    tracing::debug!(input = raw, path = %path.display(), "resolved image path");
    Ok(path)
}

/// Create the parent directory of `path` (recursively) if it does not exist.
pub fn ensure_parent(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if parent.is_dir() {
        return Ok(());
    }

    if parent.exists() {
        return Err(Error::path(
            path,
            format!("parent exists but is not a directory: {}", parent.display()),
        ));
    }

    tracing::info!(dir = %parent.display(), "creating image directory");
    std::fs::create_dir_all(parent).map_err(|e| {
        Error::path(
            path,
            format!("could not create parent directory {}: {}", parent.display(), e),
        )
    })
}

/// Strip a leading provider qualifier. The qualifier is a provider name,
/// optionally module-qualified with `\`, made of word characters and dots;
/// anything with `/` or a drive colon before the first `::` is a plain path.
fn strip_provider(raw: &str) -> &str {
    let Some(idx) = raw.find(PROVIDER_SEPARATOR) else {
        return raw;
    };
    let qualifier = &raw[..idx];
    let is_provider = qualifier.split('\\').all(|part| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
    });
    if is_provider {
        &raw[idx + PROVIDER_SEPARATOR.len()..]
    } else {
        raw
    }
}

fn expand_home(raw: &str, home: &Path) -> PathBuf {
    if raw == "~" {
        return home.to_path_buf();
    }
    match raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        Some(rest) => home.join(rest),
        None => PathBuf::from(raw),
    }
}

fn fold_components(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            // Popping past the root is a no-op, like `cd ..` at `/`.
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
