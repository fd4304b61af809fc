//! Fractional ordering keys for tasks within a status column.
//!
//! The formulas mirror the server's position service exactly (midpoint,
//! halving toward zero, fixed gap past the end) so that a position computed
//! here and later confirmed by the server never causes a visible reorder.
//!
//! Repeated inserts at the same boundary keep halving the gap and can, in
//! principle, converge two positions closer than `f64` can separate. There is
//! no client-side rebalance: renumbering is the server's job, and a divergent
//! client-side scheme would fight with it.

use uuid::Uuid;

use agentboard_common::Task;

/// Spacing used for the first key in an empty column and past the last key.
pub const POSITION_GAP: f64 = 1024.0;

/// Position for an item inserted at `insert_idx` into `sorted_positions`.
///
/// `sorted_positions` must be ascending; `insert_idx` is the number of items
/// that should precede the new one. Defined for every input.
pub fn compute_insert_position(sorted_positions: &[f64], insert_idx: usize) -> f64 {
    let Some((&first, _)) = sorted_positions.split_first() else {
        return POSITION_GAP;
    };

    if insert_idx == 0 {
        return first / 2.0;
    }

    if insert_idx >= sorted_positions.len() {
        return sorted_positions[sorted_positions.len() - 1] + POSITION_GAP;
    }

    let before = sorted_positions[insert_idx - 1];
    let after = sorted_positions[insert_idx];
    (before + after) / 2.0
}

/// Ascending positions of `bucket` with `moving` left out.
///
/// A drag-and-drop index is relative to the column as it looks without the
/// dragged card, so this is the list the allocator should see.
pub fn positions_excluding(bucket: &[Task], moving: Uuid) -> Vec<f64> {
    let mut positions: Vec<f64> = bucket
        .iter()
        .filter(|t| t.id != moving)
        .map(|t| t.position)
        .collect();
    positions.sort_by(f64::total_cmp);
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::test_support::task_at;

    #[test]
    fn test_empty_list_returns_gap() {
        assert_eq!(compute_insert_position(&[], 0), 1024.0);
        assert_eq!(compute_insert_position(&[], 7), 1024.0);
    }

    #[test]
    fn test_insert_before_first_halves() {
        assert_eq!(compute_insert_position(&[1024.0], 0), 512.0);
        assert_eq!(compute_insert_position(&[1024.0, 2048.0], 0), 512.0);
    }

    #[test]
    fn test_insert_after_last_adds_gap() {
        assert_eq!(compute_insert_position(&[1024.0, 2048.0], 2), 3072.0);
        assert_eq!(compute_insert_position(&[1024.0, 2048.0], 99), 3072.0);
    }

    #[test]
    fn test_insert_between_takes_midpoint() {
        assert_eq!(compute_insert_position(&[1024.0, 2048.0], 1), 1536.0);
        assert_eq!(compute_insert_position(&[1.0, 2.0, 4.0], 2), 3.0);
    }

    #[test]
    fn test_result_lies_in_expected_interval() {
        let sorted = [3.0, 10.0, 10.5, 400.0, 4096.0];
        for i in 0..=sorted.len() {
            let p = compute_insert_position(&sorted, i);
            if i == 0 {
                assert_eq!(p, sorted[0] / 2.0);
            } else if i == sorted.len() {
                assert_eq!(p, sorted[sorted.len() - 1] + POSITION_GAP);
            } else {
                assert!(sorted[i - 1] < p && p < sorted[i], "index {} gave {}", i, p);
            }
        }
    }

    #[test]
    fn test_repeated_front_inserts_keep_shrinking() {
        // Accepted behavior: keys approach zero, no rebalance happens here.
        let mut first = 1024.0;
        for _ in 0..20 {
            let next = compute_insert_position(&[first], 0);
            assert!(next < first);
            first = next;
        }
        assert!(first > 0.0);
    }

    #[test]
    fn test_positions_excluding_drops_moving_task() {
        let bucket = vec![
            task_at(1, 10, 2048.0),
            task_at(2, 10, 1024.0),
            task_at(3, 10, 4096.0),
        ];
        let positions = positions_excluding(&bucket, Uuid::from_u128(1));
        assert_eq!(positions, vec![1024.0, 4096.0]);
    }
}
