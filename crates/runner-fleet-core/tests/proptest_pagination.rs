// crates/runner-fleet-core/tests/proptest_pagination.rs
// ============================================================================
// Module: Pagination Property-Based Tests
// Description: Property tests for page normalization and page counts.
// Purpose: Check paging arithmetic across wide input ranges.
// ============================================================================

//! Property-based tests for pagination invariants.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use proptest::prelude::*;
use runner_fleet_core::DEFAULT_PAGE_SIZE;
use runner_fleet_core::Page;
use runner_fleet_core::PageRequest;
use runner_fleet_core::normalize_tags;

proptest! {
    #[test]
    fn total_pages_is_ceiling_division(total in 0u64 .. 100_000, size in 1u64 .. 500) {
        let request = PageRequest::new(1, size);
        let pages = request.total_pages(total);
        prop_assert!(pages * size >= total);
        if pages > 0 {
            prop_assert!((pages - 1) * size < total);
        }
    }

    #[test]
    fn zero_inputs_match_documented_defaults(total in 0u64 .. 10_000) {
        let zeroed: Page<u64> = Page::new(Vec::new(), PageRequest::new(0, 0), total);
        let explicit: Page<u64> = Page::new(Vec::new(), PageRequest::new(1, DEFAULT_PAGE_SIZE), total);
        prop_assert_eq!(zeroed, explicit);
    }

    #[test]
    fn offsets_advance_by_page_size(page in 1u64 .. 1_000, size in 1u64 .. 500) {
        let current = PageRequest::new(page, size).offset();
        let next = PageRequest::new(page + 1, size).offset();
        prop_assert_eq!(next - current, size);
    }

    #[test]
    fn tag_normalization_is_idempotent(tags in prop::collection::vec("[ a-z0-9]{0,6}", 0 .. 8)) {
        let once = normalize_tags(&tags);
        let twice = normalize_tags(&once);
        prop_assert_eq!(&once, &twice);
        prop_assert!(once.windows(2).all(|pair| pair[0] < pair[1]));
        prop_assert!(once.iter().all(|tag| !tag.is_empty() && tag.trim() == tag));
    }
}

#[test]
fn first_page_offset_is_zero() {
    assert_eq!(PageRequest::new(0, 0).offset(), 0);
    assert_eq!(PageRequest::new(3, 0).offset(), 2 * DEFAULT_PAGE_SIZE);
    assert_eq!(PageRequest::default().total_pages(41), 3);
}

#[test]
fn try_map_keeps_page_bookkeeping() {
    let page = Page::new(vec![1_u64, 2], PageRequest::new(2, 2), 5);
    let mapped: Page<String> = page.clone().try_map(|value| Ok::<_, ()>(value.to_string())).unwrap();
    assert_eq!(mapped.items, vec!["1".to_string(), "2".to_string()]);
    assert_eq!((mapped.page, mapped.page_size, mapped.total_count, mapped.total_pages), (2, 2, 5, 3));
    assert_eq!(page.try_map(|value| if value == 2 { Err(value) } else { Ok(value) }), Err(2));
}
