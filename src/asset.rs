//! Avatar asset lookup for `avatar_asset_request` (spec §4.5).

use std::path::{Path, PathBuf};

use base64::prelude::*;

use crate::error::AssetError;

/// Reads `name` from `avatars_dir`, rejecting any path that would escape it
/// (e.g. `../../etc/passwd`), and returns it base64-encoded.
pub async fn read_avatar_asset_base64(avatars_dir: &Path, name: &str) -> Result<String, AssetError> {
    let resolved = resolve_within(avatars_dir, name)?;
    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|source| AssetError::Io {
            path: resolved.display().to_string(),
            source,
        })?;
    Ok(BASE64_STANDARD.encode(bytes))
}

fn resolve_within(root: &Path, requested: &str) -> Result<PathBuf, AssetError> {
    if requested.contains("..") || Path::new(requested).is_absolute() {
        return Err(AssetError::InvalidPath(requested.to_owned()));
    }
    Ok(root.join(requested))
}
