//! Naming conventions for the mirror tree.
//!
//! Entry names are the projection's source of truth: album member symlinks
//! encode `(position, item id)` in their name and are parsed back during
//! reconciliation, so no side-band metadata is needed to detect stale or
//! repositioned entries.

use std::path::PathBuf;

/// Strip characters that are invalid on common filesystems:
/// `/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|`.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "Untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Directory name for an album or collection: `<title> - <id>`.
///
/// The id suffix keeps sibling directories unique when two entities share a
/// title, and lets reconciliation recover the entity id from the name.
pub fn entity_dirname(title: &str, id: &str) -> String {
    format!("{} - {}", sanitize_title(title), id)
}

/// Recover the entity id from a `<title> - <id>` directory name. Splits on
/// the last separator so titles containing `" - "` still parse.
pub fn entity_id_from_dirname(name: &str) -> Option<&str> {
    name.rsplit_once(" - ").map(|(_, id)| id).filter(|id| !id.is_empty())
}

/// Width used to zero-pad album positions so alphanumeric sort order
/// matches the remote display order.
pub fn position_width(len: usize) -> usize {
    len.max(1).to_string().len()
}

/// Album member symlink name: `<pos>_<id>.<ext>` with a zero-padded
/// 1-based position.
pub fn album_entry_name(position: usize, width: usize, basename: &str) -> String {
    format!("{:0width$}_{}", position, basename, width = width)
}

/// Parse an album entry name back into `(position, content basename)`.
/// Returns `None` for names not following the convention.
pub fn parse_album_entry(name: &str) -> Option<(u64, &str)> {
    let (digits, basename) = name.split_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let position = digits.parse().ok()?;
    if basename.is_empty() {
        return None;
    }
    Some((position, basename))
}

/// Item id from a photostream basename (`<id>.<ext>`).
pub fn item_id_from_basename(basename: &str) -> &str {
    basename.split('.').next().unwrap_or(basename)
}

/// Companion metadata snapshot name for a content basename.
pub fn metadata_basename(basename: &str) -> String {
    format!("{}.metadata", basename)
}

pub fn is_metadata_name(name: &str) -> bool {
    name.ends_with(".metadata")
}

/// Relative symlink target into the photostream from a directory `depth`
/// levels below the mirror root.
pub fn photostream_target(depth: usize, basename: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for _ in 0..depth {
        path.push("..");
    }
    path.push("photostream");
    path.push(basename);
    path
}

/// Relative symlink target to an album directory from a collection
/// directory `depth` levels below the mirror root.
pub fn album_target(depth: usize, album_dirname: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for _ in 0..depth {
        path.push("..");
    }
    path.push("Albums");
    path.push(album_dirname);
    path
}
