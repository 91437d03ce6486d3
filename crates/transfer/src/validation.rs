use std::path::{Component, Path};

use crate::TransferError;

/// Longest file name accepted by the backend, in bytes.
const MAX_FILE_NAME_LEN: usize = 255;

/// Validates the name a file is uploaded under.
///
/// The name must be a single plain path component. Rejects:
/// - Empty names and names over 255 bytes
/// - Path separators (`/` or `\`) and drive prefixes
/// - `.` and `..`
/// - Control characters
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidFileName("empty name".into()));
    }
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(TransferError::InvalidFileName(format!(
            "name longer than {MAX_FILE_NAME_LEN} bytes"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(TransferError::InvalidFileName(format!(
            "control character in {name:?}"
        )));
    }
    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidFileName(format!(
            "path separator not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir | Component::CurDir), None) => Err(
            TransferError::InvalidFileName(format!("relative marker not allowed: {name}")),
        ),
        _ => Err(TransferError::InvalidFileName(format!(
            "not a plain file name: {name}"
        ))),
    }
}
