// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Size estimation and the truncation guard.

use corvid_core::Turn;

/// Size of a history in characters of turn content.
pub fn estimate_size(turns: &[Turn]) -> usize {
    turns.iter().map(|t| t.content.chars().count()).sum()
}

/// Drops the oldest turns until `turns` fits `budget` or one turn remains.
///
/// Returns the number of turns dropped. The most recent turn is never removed.
pub fn truncate_to_budget(turns: &mut Vec<Turn>, budget: usize) -> usize {
    let mut size = estimate_size(turns);
    let mut drop = 0;
    while size > budget && turns.len() - drop > 1 {
        size -= turns[drop].content.chars().count();
        drop += 1;
    }
    turns.drain(..drop);
    drop
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn size_counts_chars_not_bytes() {
        let turns = vec![Turn::user("héllo"), Turn::assistant("ok")];
        assert_eq!(estimate_size(&turns), 7);
    }

    #[test]
    fn guard_keeps_last_turn_even_when_oversized() {
        let mut turns = vec![Turn::user("a".repeat(10)), Turn::user("b".repeat(100))];
        let dropped = truncate_to_budget(&mut turns, 5);
        assert_eq!(dropped, 1);
        assert_eq!(turns.len(), 1);
        assert!(turns[0].content.starts_with('b'));
    }

    #[test]
    fn guard_is_noop_when_within_budget() {
        let mut turns = vec![Turn::user("abc"), Turn::assistant("def")];
        assert_eq!(truncate_to_budget(&mut turns, 6), 0);
        assert_eq!(turns.len(), 2);
    }

    fn arb_turns() -> impl Strategy<Value = Vec<Turn>> {
        prop::collection::vec("[a-z ]{0,40}", 1..30)
            .prop_map(|contents| contents.into_iter().map(Turn::user).collect())
    }

    proptest! {
        #[test]
        fn guard_fits_or_leaves_one(turns in arb_turns(), budget in 0usize..400) {
            let last = turns.last().cloned();
            let mut kept = turns.clone();
            truncate_to_budget(&mut kept, budget);
            prop_assert!(!kept.is_empty());
            prop_assert_eq!(kept.last().cloned(), last);
            prop_assert!(estimate_size(&kept) <= budget || kept.len() == 1);
            // Kept turns are a suffix of the input.
            prop_assert_eq!(&turns[turns.len() - kept.len()..], kept.as_slice());
        }
    }
}
