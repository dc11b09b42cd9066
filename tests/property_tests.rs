//! Property-based tests for list resolution and the status workflow

use proptest::prelude::*;

use material_tracker::query::Choice;
use material_tracker::{
    FilterInput, PageRequest, Priority, RequestStatus, Resolver, SortColumn, SortDirection,
    Sorting, StatusWorkflow,
};

fn any_status() -> impl Strategy<Value = RequestStatus> {
    prop::sample::select(RequestStatus::ALL.to_vec())
}

fn any_choice_status() -> impl Strategy<Value = Choice<RequestStatus>> {
    prop_oneof![Just(Choice::All), any_status().prop_map(Choice::Only)]
}

fn any_choice_priority() -> impl Strategy<Value = Choice<Priority>> {
    prop_oneof![
        Just(Choice::All),
        prop::sample::select(Priority::ALL.to_vec()).prop_map(Choice::Only)
    ]
}

fn any_sorting() -> impl Strategy<Value = Option<Sorting>> {
    let column = prop::sample::select(vec![
        SortColumn::MaterialName,
        SortColumn::Quantity,
        SortColumn::Status,
        SortColumn::Priority,
        SortColumn::RequestedAt,
        SortColumn::CreatedAt,
        SortColumn::UpdatedAt,
    ]);
    let direction = prop_oneof![Just(SortDirection::Asc), Just(SortDirection::Desc)];
    prop::option::of((column, direction).prop_map(|(c, d)| Sorting::new(c, d)))
}

proptest! {
    #[test]
    fn page_window_is_clamped_and_contiguous(
        page_index in 0usize..1_000,
        page_size in 0usize..10_000,
    ) {
        let descriptor = Resolver::default().resolve(
            &FilterInput::default(),
            PageRequest::new(page_index, page_size),
            None,
        );
        let size = descriptor.pagination().page_size();
        prop_assert!((5..=100).contains(&size));

        let (start, end) = descriptor.range();
        prop_assert_eq!(start, page_index * size);
        prop_assert_eq!(end - start + 1, size);
        prop_assert_eq!(descriptor.next_page().range().0, end + 1);
    }

    #[test]
    fn search_casing_and_padding_do_not_change_the_key(
        status in any_choice_status(),
        priority in any_choice_priority(),
        search in "[a-z0-9 ]{0,24}",
        pad in " {0,3}",
        sorting in any_sorting(),
    ) {
        let resolver = Resolver::default();
        let plain = FilterInput { status, priority, search: search.clone() };
        let noisy = FilterInput {
            status,
            priority,
            search: format!("{pad}{}{pad}", search.to_uppercase()),
        };
        let a = resolver.resolve(&plain, PageRequest::new(0, 10), sorting);
        let b = resolver.resolve(&noisy, PageRequest::new(0, 10), sorting);
        prop_assert_eq!(&a, &b);

        let search_constraint = a.filters().search().map(str::to_string);
        if search.trim().is_empty() {
            prop_assert_eq!(search_constraint, None);
        } else {
            prop_assert_eq!(search_constraint, Some(search.trim().to_string()));
        }
        prop_assert_eq!(a.filters().status(), status.into_option());
        prop_assert_eq!(a.sorting(), sorting.unwrap_or_default());
    }

    #[test]
    fn page_meta_matches_the_total(
        total in 0u64..5_000,
        page_index in 0usize..200,
        page_size in 5usize..=100,
    ) {
        let descriptor = Resolver::default().resolve(
            &FilterInput::default(),
            PageRequest::new(page_index, page_size),
            None,
        );
        let meta = descriptor.page_meta(total);

        prop_assert_eq!(meta.total_count, total);
        prop_assert_eq!(meta.total_pages, total.div_ceil(page_size as u64));
        prop_assert_eq!(meta.has_next_page, (page_index as u64 + 1) < meta.total_pages);
        prop_assert_eq!(meta.has_previous_page, page_index > 0);
    }

    #[test]
    fn workflow_decisions_agree_with_the_transition_table(
        from in any_status(),
        to in any_status(),
    ) {
        let allowed = StatusWorkflow::allowed_transitions(from).contains(&to);
        prop_assert_eq!(StatusWorkflow::can_transition(from, to), allowed);
        prop_assert_eq!(StatusWorkflow::request_transition(from, to).is_ok(), allowed);
        prop_assert!(!StatusWorkflow::can_transition(from, from));
        if StatusWorkflow::is_terminal(from) {
            prop_assert!(!allowed);
        }
    }
}
