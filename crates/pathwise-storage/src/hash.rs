//! Deterministic content hashing using blake3.
//!
//! Asset cache keys and course fingerprints are derived from these hashes.
//! Each field is length-prefixed so that moving bytes between adjacent
//! fields always changes the hash.

use pathwise_core::course::Course;
use pathwise_core::node::ContentRef;

use crate::error::StorageError;

/// Hash of a node's deliverable content.
///
/// Same content always produces the same hash; any change to title, body,
/// narration or visual prompt produces a different one.
pub fn content_hash(content: &ContentRef) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, Some(&content.title));
    update_field(&mut hasher, Some(&content.body));
    update_field(&mut hasher, content.narration.as_deref());
    update_field(&mut hasher, content.visual_prompt.as_deref());
    hasher.finalize()
}

/// Hash of an arbitrary text payload, used for generated text keys.
pub fn text_hash(text: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, Some(text));
    hasher.finalize()
}

/// Fingerprint of a whole course, computed over its canonical JSON.
///
/// Course JSON is deterministic: the arena serializes in index order and
/// concept tables are insertion-ordered maps.
pub fn course_fingerprint(course: &Course) -> Result<blake3::Hash, StorageError> {
    let bytes = serde_json::to_vec(course)?;
    Ok(blake3::hash(&bytes))
}

fn update_field(hasher: &mut blake3::Hasher, field: Option<&str>) {
    match field {
        Some(text) => {
            hasher.update(&[1]);
            hasher.update(&(text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_content_same_hash() {
        let a = ContentRef::text("Cells", "The unit of life").with_narration("Cells are...");
        let b = a.clone();
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn any_field_change_changes_hash() {
        let base = ContentRef::text("Cells", "The unit of life");
        let narrated = base.clone().with_narration("Cells are...");
        let visual = base.clone().with_visual("a cell diagram");
        let retitled = ContentRef::text("Cell", "sThe unit of life");
        let h = content_hash(&base);
        assert_ne!(h, content_hash(&narrated));
        assert_ne!(h, content_hash(&visual));
        assert_ne!(h, content_hash(&retitled));
    }

    #[test]
    fn absent_and_empty_differ() {
        let none = ContentRef::text("t", "b");
        let empty = ContentRef::text("t", "b").with_narration("");
        assert_ne!(content_hash(&none), content_hash(&empty));
    }
}
