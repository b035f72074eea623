//! Paths that never take part in a sync
//!
//! OS metadata files, anything inside a `.git` directory, and the engine's
//! own partial downloads are invisible to both snapshots: they are never
//! uploaded, downloaded, or deleted.

/// OS-generated metadata files, matched on the basename
pub const IGNORED_BASENAMES: &[&str] = &[".directory", "Thumbs.db", "Desktop.ini", ".DS_Store"];

/// Suffix of in-progress download files
pub const PARTIAL_SUFFIX: &str = ".brandybox-part";

/// True if the slash-separated relative path is excluded from sync
pub fn is_ignored(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let mut components = normalized.split('/').filter(|c| !c.is_empty()).peekable();

    while let Some(component) = components.next() {
        if component == ".git" {
            return true;
        }
        if components.peek().is_none() {
            return IGNORED_BASENAMES.contains(&component) || is_partial_name(component);
        }
    }
    false
}

/// True for the temporary file names used while a download is streaming
pub fn is_partial_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
}

/// Temporary sibling name for a download into `file_name`
pub fn partial_name_for(file_name: &str) -> String {
    format!(".{file_name}{PARTIAL_SUFFIX}")
}
