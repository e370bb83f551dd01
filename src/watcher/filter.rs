//! Source-file event filtering.

use std::path::Path;

use notify::event::{EventKind, ModifyKind};

/// Whether a raw filesystem event should trigger a rebuild.
///
/// Relevant events touch a Go source file that is not a test file, and are
/// not pure metadata changes (chmod). Deduplication is the debouncer's job,
/// not this filter's.
#[must_use]
pub fn is_relevant(path: &Path, kind: &EventKind) -> bool {
    is_source_file(path) && is_content_change(kind)
}

fn is_source_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".go") && !name.ends_with("_test.go")
}

fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Any => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        EventKind::Access(_) | EventKind::Other => false,
    }
}
