//! Identifier generation.
//!
//! Turns and runs get UUIDv7 identifiers (time-sortable). Tool calls a
//! backend emits without an ID get a generated `call_<hex>` ID; the random
//! suffix avoids collisions across invocations in the same turn.

use rand::Rng;

/// Prefix for generated tool-call IDs.
pub const CALL_ID_PREFIX: &str = "call_";

/// Hex digits in a generated call ID suffix.
const CALL_ID_SUFFIX_LEN: usize = 12;

/// New turn ID (`turn_` + UUIDv7).
#[must_use]
pub fn new_turn_id() -> String {
    format!("turn_{}", uuid::Uuid::now_v7().simple())
}

/// New run ID (`run_` + UUIDv7).
#[must_use]
pub fn new_run_id() -> String {
    format!("run_{}", uuid::Uuid::now_v7().simple())
}

/// Generate a tool-call ID for a backend that omitted one.
#[must_use]
pub fn generate_call_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..CALL_ID_SUFFIX_LEN)
        .map(|_| {
            let digit = rng.random_range(0..16u8);
            char::from_digit(u32::from(digit), 16).unwrap_or('0')
        })
        .collect();
    format!("{CALL_ID_PREFIX}{suffix}")
}

/// Whether an ID matches the generated-call-ID pattern.
#[must_use]
pub fn is_generated_call_id(id: &str) -> bool {
    id.strip_prefix(CALL_ID_PREFIX).is_some_and(|suffix| {
        suffix.len() == CALL_ID_SUFFIX_LEN && suffix.chars().all(|c| c.is_ascii_hexdigit())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn turn_ids_are_prefixed_and_unique() {
        let a = new_turn_id();
        let b = new_turn_id();
        assert!(a.starts_with("turn_"));
        assert_ne!(a, b);
    }

    #[test]
    fn generated_call_id_matches_pattern() {
        let id = generate_call_id();
        assert!(is_generated_call_id(&id), "unexpected id: {id}");
    }

    #[test]
    fn generated_call_ids_do_not_collide() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_call_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn backend_ids_are_not_generated_pattern() {
        assert!(!is_generated_call_id("toolu_01A2B3"));
        assert!(!is_generated_call_id("call_xyz"));
        assert!(!is_generated_call_id("call_"));
    }
}
