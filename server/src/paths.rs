//! Uniform path confinement for every path-parameterized route.
//!
//! User-supplied paths are always interpreted relative to a configured root. The rule is: percent-decode,
//! reject any traversal component before touching the filesystem, then canonicalize and require the result to
//! stay under the canonical root. Symlinks pointing outside the root fail the canonical check.

use {
    crate::warp_util::HttpError,
    anyhow::{Context, Result},
    percent_encoding::percent_decode_str,
    std::{
        io,
        path::{Component, Path, PathBuf},
    },
    tokio::fs,
};

/// Percent-decode a raw URL path tail.
pub fn decode(tail: &str) -> Result<String> {
    Ok(percent_decode_str(tail)
        .decode_utf8()
        .map_err(|_| HttpError::bad_request("invalid path encoding"))?
        .into_owned())
}

fn is_traversal_free(relative: &str) -> bool {
    Path::new(relative)
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

/// Resolve `relative` beneath `root`, rejecting anything which would escape it.
///
/// Returns the canonical path when the target exists, or the joined path when it does not (callers decide
/// whether a missing target is a 404). Escapes, whether lexical (`..`, absolute paths) or via symlink, are
/// 403s.
pub async fn resolve_under(root: &str, relative: &str) -> Result<PathBuf> {
    if !is_traversal_free(relative) {
        return Err(HttpError::forbidden("path escapes the archive root").into());
    }

    let root = fs::canonicalize(root)
        .await
        .with_context(|| format!("unable to resolve root directory {root}"))?;

    let joined = root.join(relative);

    match fs::canonicalize(&joined).await {
        Ok(canonical) => {
            if canonical.starts_with(&root) {
                Ok(canonical)
            } else {
                Err(HttpError::forbidden("path escapes the archive root").into())
            }
        }

        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(joined),

        Err(e) => Err(e).with_context(|| format!("unable to resolve {}", joined.to_string_lossy())),
    }
}
