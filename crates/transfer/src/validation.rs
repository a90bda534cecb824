use std::path::{Component, Path, PathBuf};

use tracing::info;

use crate::TransferError;
use crate::receiver::ReceivedFile;

/// Validates a filename announced by the remote peer.
///
/// The name must be a single plain path component. Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Directory separators and traversal (`..`, `.`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn sanitize_filename(name: &str) -> Result<&str, TransferError> {
    if name.trim().is_empty() {
        return Err(TransferError::InvalidFilename("empty filename".into()));
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return Err(TransferError::InvalidFilename(format!(
            "absolute path not allowed: {name}"
        )));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        (Some(Component::ParentDir | Component::CurDir), None) => {
            return Err(TransferError::InvalidFilename(format!(
                "directory reference not allowed: {name}"
            )));
        }
        _ => {
            return Err(TransferError::InvalidFilename(format!(
                "path components not allowed: {name}"
            )));
        }
    }

    // `Path` does not split on backslashes outside Windows.
    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidFilename(format!(
            "path components not allowed: {name}"
        )));
    }

    Ok(name)
}

/// Writes a received file into `dir` and returns its path.
///
/// An existing file is never overwritten; ` (1)`, ` (2)`, ... is inserted
/// before the extension instead.
pub async fn save_received(dir: &Path, file: &ReceivedFile) -> Result<PathBuf, TransferError> {
    let name = sanitize_filename(&file.metadata.filename)?;
    tokio::fs::create_dir_all(dir).await?;

    let path = unique_path(dir, name).await;
    tokio::fs::write(&path, &file.content).await?;

    info!(path = %path.display(), bytes = file.content.len(), "saved received file");
    Ok(path)
}

async fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    let mut n = 1u32;
    loop {
        let next = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(next);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}
