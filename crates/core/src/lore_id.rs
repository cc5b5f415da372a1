//! Lore id generation.
//!
//! Ids are ULIDs: 26 Crockford base32 characters with a millisecond
//! timestamp prefix, so lexicographic order is creation order. That keeps
//! the `lore` primary key index append-mostly and makes ids safe to use as
//! pagination cursors.

use ulid::Ulid;

/// Length of a lore id in characters.
pub const LORE_ID_LEN: usize = 26;

/// Generate a fresh time-prefixed lore id.
pub fn generate_lore_id() -> String {
    Ulid::new().to_string()
}

/// Check whether `id` is a well-formed lore id.
pub fn is_valid_lore_id(id: &str) -> bool {
    id.len() == LORE_ID_LEN && Ulid::from_string(id).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid_and_sortable() {
        let first = generate_lore_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = generate_lore_id();

        assert_eq!(first.len(), LORE_ID_LEN);
        assert!(is_valid_lore_id(&first));
        assert!(is_valid_lore_id(&second));
        assert!(first < second);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_valid_lore_id(""));
        assert!(!is_valid_lore_id("not-a-ulid"));
        assert!(!is_valid_lore_id("01ARZ3NDEKTSV4RRFFQ69G5FA")); // 25 chars
        assert!(!is_valid_lore_id("01ARZ3NDEKTSV4RRFFQ69G5FAVX")); // 27 chars
    }
}
