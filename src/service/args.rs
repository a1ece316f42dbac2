//! Typed argument access and wire index conversion
//!
//! The wire protocol addresses collection entries with 0-based indices; the
//! simulation boundary uses 1-based [`SlotIndex`] values. Every conversion
//! goes through the `resolve_*` functions in this module.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::runtime::error::{ApiError, ErrorCode};
use crate::sim::SlotIndex;

/// Borrowed view over a request's `arguments` object.
#[derive(Debug, Clone, Copy)]
pub struct Arguments<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Arguments<'a> {
    /// Wrap an arguments object.
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self { map }
    }

    /// Raw value.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|value| !value.is_null())
    }

    /// Whether `key` is present and not null.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Optional string.
    pub fn opt_str(&self, key: &str) -> Result<Option<&'a str>, ApiError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(ApiError::wrong_type(key, "string")),
        }
    }

    /// Required string.
    pub fn str(&self, key: &str) -> Result<&'a str, ApiError> {
        self.opt_str(key)?.ok_or_else(|| ApiError::missing_field(key))
    }

    /// Optional integer.
    pub fn opt_int(&self, key: &str) -> Result<Option<i64>, ApiError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| ApiError::wrong_type(key, "integer")),
        }
    }

    /// Required integer.
    pub fn int(&self, key: &str) -> Result<i64, ApiError> {
        self.opt_int(key)?.ok_or_else(|| ApiError::missing_field(key))
    }

    /// Optional list of integers.
    pub fn opt_int_list(&self, key: &str) -> Result<Option<Vec<i64>>, ApiError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(Value::as_i64)
                .collect::<Option<Vec<i64>>>()
                .map(Some)
                .ok_or_else(|| ApiError::wrong_type(key, "array of integers")),
            Some(_) => Err(ApiError::wrong_type(key, "array of integers")),
        }
    }

    /// Required list of integers.
    pub fn int_list(&self, key: &str) -> Result<Vec<i64>, ApiError> {
        self.opt_int_list(key)?.ok_or_else(|| ApiError::missing_field(key))
    }
}

fn max_index(len: usize) -> i64 {
    len as i64 - 1
}

/// Convert a 0-based wire index into a slot of a `len`-long collection.
/// `label` names the collection in the error (`"Joker"`).
pub fn resolve_index(index: i64, len: usize, label: &str) -> Result<SlotIndex, ApiError> {
    match usize::try_from(index) {
        Ok(offset) if offset < len => Ok(SlotIndex::from_wire(offset)),
        _ => Err(ApiError::new(
            ErrorCode::ParameterOutOfRange,
            format!("{label} index out of range"),
        )
        .with("index", index)
        .with("max_index", max_index(len))),
    }
}

/// Convert several indices; the first invalid one is reported.
pub fn resolve_indices(indices: &[i64], len: usize, label: &str) -> Result<Vec<SlotIndex>, ApiError> {
    indices
        .iter()
        .map(|&index| resolve_index(index, len, label))
        .collect()
}

/// Convert a selection of hand cards. Out-of-range and repeated indices are
/// both card index errors.
pub fn resolve_cards(indices: &[i64], hand_size: usize) -> Result<Vec<SlotIndex>, ApiError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(indices.len());
    for &index in indices {
        let slot = match usize::try_from(index) {
            Ok(offset) if offset < hand_size => SlotIndex::from_wire(offset),
            _ => {
                return Err(ApiError::new(ErrorCode::InvalidCardIndex, "Invalid card index")
                    .with("card_index", index)
                    .with("hand_size", hand_size));
            }
        };
        if !seen.insert(slot) {
            return Err(ApiError::new(ErrorCode::InvalidCardIndex, "Duplicate card index")
                .with("card_index", index));
        }
        out.push(slot);
    }
    Ok(out)
}

/// Convert a reordering of a `len`-long collection. `plural` names the
/// collection (`"jokers"`) and keys the count in the error context
/// (`jokers_count`).
pub fn resolve_permutation(
    indices: &[i64],
    len: usize,
    plural: &str,
    label: &str,
) -> Result<Vec<SlotIndex>, ApiError> {
    if indices.len() != len {
        return Err(ApiError::new(
            ErrorCode::ParameterOutOfRange,
            format!("Invalid number of {plural} to rearrange"),
        )
        .with(&format!("{plural}_count"), indices.len())
        .with("valid_range", len.to_string()));
    }
    let slots = resolve_indices(indices, len, label)?;
    let mut seen = HashSet::new();
    for (slot, index) in slots.iter().zip(indices) {
        if !seen.insert(*slot) {
            return Err(ApiError::new(
                ErrorCode::InvalidCardIndex,
                format!("Duplicate {label} index"),
            )
            .with("index", *index));
        }
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_typed_access() {
        let raw = map(json!({ "deck": "Red Deck", "stake": 1, "cards": [0, 2], "seed": null }));
        let args = Arguments::new(&raw);

        assert_eq!(args.str("deck").unwrap(), "Red Deck");
        assert_eq!(args.int("stake").unwrap(), 1);
        assert_eq!(args.int_list("cards").unwrap(), vec![0, 2]);
        assert_eq!(args.opt_str("seed").unwrap(), None);
        assert!(!args.contains("seed"));
    }

    #[test]
    fn test_typed_access_errors() {
        let raw = map(json!({ "stake": "high", "cards": [0, "x"], "index": 1.5 }));
        let args = Arguments::new(&raw);

        let err = args.str("deck").unwrap_err();
        assert_eq!(err.message, "Missing required field: deck");
        let err = args.int("stake").unwrap_err();
        assert_eq!(err.message, "Invalid parameter type");
        assert_eq!(err.context.unwrap()["field"], "stake");
        assert!(args.int_list("cards").is_err());
        assert!(args.int("index").is_err());
    }

    #[test]
    fn test_resolve_index_bounds() {
        assert_eq!(resolve_index(0, 3, "Joker").unwrap().get(), 1);
        assert_eq!(resolve_index(2, 3, "Joker").unwrap().get(), 3);

        let err = resolve_index(3, 3, "Joker").unwrap_err();
        assert_eq!(err.code, ErrorCode::ParameterOutOfRange);
        assert_eq!(err.message, "Joker index out of range");
        let context = err.context.unwrap();
        assert_eq!(context["index"], 3);
        assert_eq!(context["max_index"], 2);

        assert!(resolve_index(-1, 3, "Joker").is_err());
        assert_eq!(
            resolve_index(0, 0, "Joker").unwrap_err().context.unwrap()["max_index"],
            -1
        );
    }

    #[test]
    fn test_resolve_cards() {
        let slots = resolve_cards(&[0, 2, 4], 8).unwrap();
        assert_eq!(slots.iter().map(|s| s.get()).collect::<Vec<_>>(), vec![1, 3, 5]);

        let err = resolve_cards(&[10, 11], 8).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCardIndex);
        assert_eq!(err.context.unwrap()["hand_size"], 8);

        let err = resolve_cards(&[1, 1], 8).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCardIndex);
    }

    #[test]
    fn test_resolve_permutation() {
        let slots = resolve_permutation(&[2, 0, 1], 3, "jokers", "Joker").unwrap();
        assert_eq!(slots.iter().map(|s| s.get()).collect::<Vec<_>>(), vec![3, 1, 2]);

        let err = resolve_permutation(&[0, 1], 3, "cards", "Card").unwrap_err();
        assert_eq!(err.code, ErrorCode::ParameterOutOfRange);
        assert_eq!(err.message, "Invalid number of cards to rearrange");
        let context = err.context.unwrap();
        assert_eq!(context["cards_count"], 2);
        assert_eq!(context["valid_range"], "3");

        let err = resolve_permutation(&[0, 0, 1], 3, "cards", "Card").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCardIndex);
        let err = resolve_permutation(&[0, 1, 5], 3, "cards", "Card").unwrap_err();
        assert_eq!(err.code, ErrorCode::ParameterOutOfRange);
    }

    proptest! {
        #[test]
        fn prop_wire_index_maps_to_next_slot(len in 1usize..64, seed in 0usize..64) {
            let index = seed % len;
            let slot = resolve_index(index as i64, len, "Card").unwrap();
            prop_assert_eq!(slot.get(), index + 1);
            prop_assert_eq!(slot.offset(), index);
        }

        #[test]
        fn prop_out_of_range_rejected(len in 0usize..64, over in 0i64..64) {
            let index = len as i64 + over;
            let err = resolve_index(index, len, "Card").unwrap_err();
            prop_assert_eq!(err.code, ErrorCode::ParameterOutOfRange);
            let err = resolve_index(-1 - over, len, "Card").unwrap_err();
            prop_assert_eq!(err.code, ErrorCode::ParameterOutOfRange);
        }
    }
}
