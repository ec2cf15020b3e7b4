//! Filter reconciliation against an in-memory account

mod common;

use common::{label, pacer, quick_pacer, row, FakeGmail, MockGmail};
use gmail_rules::error::GmailError;
use gmail_rules::filter_manager::{diff, FilterQuery, FilterReconciler};
use gmail_rules::models::Filter;
use gmail_rules::paging::{Page, PagedLister};
use gmail_rules::GmailClient;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn reconciler(client: Arc<dyn GmailClient>, dry_run: bool) -> FilterReconciler {
    FilterReconciler::new(client, PagedLister::default(), pacer(dry_run))
}

#[tokio::test(start_paused = true)]
async fn test_second_run_creates_nothing() {
    let fake = FakeGmail::new(
        vec![Filter::archive_from("b@y.com", "Label_2")],
        vec![label("Label_1", "Work"), label("Label_2", "Bills")],
        vec![],
    );
    let rows = vec![
        row("a@x.com", "Work"),
        row("b@y.com", "Bills"),
        row("c@z.com", ""),
    ];

    let first = reconciler(fake.clone(), false).reconcile(&rows).await.unwrap();
    assert_eq!(first.unprocessed, 2);
    assert_eq!(first.created(), 1);
    assert_eq!(first.placeholders.len(), 1);
    assert!(first.unresolved.is_empty());

    let second = reconciler(fake.clone(), false).reconcile(&rows).await.unwrap();
    assert_eq!(second.created(), 0);
    assert_eq!(second.unprocessed, 1);
    assert_eq!(fake.with_state(|s| s.create_filter_calls), 1);

    let created = fake.with_state(|s| s.filters.last().cloned()).unwrap();
    assert_eq!(created.from_address(), Some("a@x.com"));
    assert_eq!(created.action.add_label_ids, vec!["Label_1"]);
    assert_eq!(created.action.remove_label_ids, vec!["INBOX"]);
}

#[tokio::test(start_paused = true)]
async fn test_creations_are_five_seconds_apart() {
    let fake = FakeGmail::new(vec![], vec![label("Label_1", "Work")], vec![]);
    let rows = vec![
        row("a@x.com", "Work"),
        row("b@x.com", "Work"),
        row("c@x.com", "Work"),
    ];

    let start = tokio::time::Instant::now();
    let report = reconciler(fake.clone(), false).reconcile(&rows).await.unwrap();

    let offsets: Vec<Duration> = report.creations.entries.iter().map(|e| e.offset).collect();
    assert_eq!(
        offsets,
        vec![
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(15)
        ]
    );
    assert!(start.elapsed() >= Duration::from_secs(15));
    assert_eq!(report.created(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unresolved_labels_are_reported_per_row() {
    let fake = FakeGmail::new(
        vec![],
        vec![
            label("Label_1", "Work"),
            label("Label_2", "Receipts"),
            label("Label_3", "Receipts"),
        ],
        vec![],
    );
    let rows = vec![
        row("a@x.com", "Missing"),
        row("b@x.com", "Receipts"),
        row("c@x.com", "Work"),
    ];

    let report = reconciler(fake.clone(), false).reconcile(&rows).await.unwrap();
    assert_eq!(report.created(), 1);
    assert_eq!(report.unresolved.len(), 2);
    assert!(matches!(report.unresolved[0].1, GmailError::LabelNotFound(_)));
    match &report.unresolved[1].1 {
        GmailError::AmbiguousLabel { ids, .. } => assert_eq!(ids.len(), 2),
        other => panic!("expected ambiguous label, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_creation_is_isolated_and_retried_next_run() {
    let fake = FakeGmail::new(vec![], vec![label("Label_1", "Work")], vec![]);
    fake.with_state(|s| {
        s.fail_create_for.insert("b@x.com".to_string());
    });
    let rows = vec![
        row("a@x.com", "Work"),
        row("b@x.com", "Work"),
        row("c@x.com", "Work"),
    ];

    let first = reconciler(fake.clone(), false).reconcile(&rows).await.unwrap();
    assert_eq!(first.created(), 2);
    assert_eq!(first.failed(), 1);
    let (failed, err) = first.creations.failures().next().unwrap();
    assert_eq!(failed.row.from, "b@x.com");
    assert!(matches!(err, GmailError::Http { status: 500, .. }));

    fake.with_state(|s| s.fail_create_for.clear());
    let second = reconciler(fake.clone(), false).reconcile(&rows).await.unwrap();
    assert_eq!(second.unprocessed, 1);
    assert_eq!(second.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_creates_nothing_but_keeps_schedule() {
    let fake = FakeGmail::new(vec![], vec![label("Label_1", "Work")], vec![]);
    let rows = vec![row("a@x.com", "Work"), row("b@x.com", "Work")];

    let start = tokio::time::Instant::now();
    let report = reconciler(fake.clone(), true).reconcile(&rows).await.unwrap();
    assert_eq!(report.creations.skipped(), 2);
    assert_eq!(report.created(), 0);
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(fake.with_state(|s| s.create_filter_calls), 0);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_rows_create_one_filter() {
    let fake = FakeGmail::new(
        vec![],
        vec![label("Label_1", "Work"), label("Label_2", "Bills")],
        vec![],
    );
    let rows = vec![row("a@x.com", "Work"), row("a@x.com", "Bills")];

    let report = reconciler(fake.clone(), false).reconcile(&rows).await.unwrap();
    assert_eq!(report.duplicate_rows, 1);
    assert_eq!(report.created(), 1);
    let created = fake.with_state(|s| s.filters[0].clone());
    assert_eq!(created.action.add_label_ids, vec!["Label_1"]);
}

#[tokio::test]
async fn test_listing_follows_every_page() {
    let filters: Vec<Filter> = (0..5)
        .map(|i| {
            let mut f = Filter::archive_from(&format!("s{}@x.com", i), "Label_1");
            f.id = Some(format!("f{}", i));
            f
        })
        .collect();
    let fake = FakeGmail::new(filters, vec![], vec![]);
    fake.with_state(|s| s.page_size = 2);

    let froms = reconciler(fake, false).list_live_froms().await.unwrap();
    assert_eq!(
        froms,
        vec!["s0@x.com", "s1@x.com", "s2@x.com", "s3@x.com", "s4@x.com"]
    );
}

#[tokio::test]
async fn test_repeated_cursor_ends_listing() {
    let mut mock = MockGmail::new();
    let mut seq = mockall::Sequence::new();
    for (expected, next) in [(None, Some("a")), (Some("a"), Some("b")), (Some("b"), Some("b"))] {
        let expected = expected.map(String::from);
        let next = next.map(String::from);
        mock.expect_list_filters_page()
            .withf(move |token| *token == expected)
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| {
                Ok(Page::new(
                    vec![Filter::archive_from("x@y.com", "Label_1")],
                    next.clone(),
                ))
            });
    }

    let filters = reconciler(Arc::new(mock), false)
        .list_live_filters()
        .await
        .unwrap();
    assert_eq!(filters.len(), 3);
}

#[tokio::test]
async fn test_cursor_cycle_is_a_stall() {
    let mut mock = MockGmail::new();
    mock.expect_list_filters_page().returning(|token| {
        let next = match token.as_deref() {
            None => "a",
            Some("a") => "b",
            _ => "a",
        };
        Ok(Page::new(vec![], Some(next.to_string())))
    });

    let result = reconciler(Arc::new(mock), false).list_live_filters().await;
    assert!(matches!(
        result,
        Err(GmailError::PaginationStall { ref token, pages: 3 }) if token == "a"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_remove_matching_deletes_only_matches() {
    let mut keep = Filter::archive_from("keep@x.com", "Label_1");
    keep.id = Some("f1".to_string());
    let mut drop = Filter::archive_from("drop@x.com", "Label_2");
    drop.id = Some("f2".to_string());
    let fake = FakeGmail::new(vec![keep, drop], vec![], vec![]);

    let query = FilterQuery {
        add_label_ids: vec!["Label_2".to_string()],
        ..Default::default()
    };
    let report = FilterReconciler::new(fake.clone(), PagedLister::default(), quick_pacer())
        .remove_matching(&query)
        .await
        .unwrap();
    assert_eq!(report.completed(), 1);
    assert_eq!(fake.with_state(|s| s.delete_filter_calls.clone()), vec!["f2"]);
    assert_eq!(fake.with_state(|s| s.filters.len()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_add_rejects_filter_without_action() {
    let fake = FakeGmail::new(vec![], vec![], vec![]);
    let mut filter = Filter::archive_from("a@x.com", "Label_1");
    filter.action = Default::default();

    let result = reconciler(fake.clone(), false).add(filter).await;
    assert!(matches!(result, Err(GmailError::FilterError(_))));
    assert_eq!(fake.with_state(|s| s.create_filter_calls), 0);
}

fn address() -> impl Strategy<Value = String> {
    "[a-e]@(x|y)\\.com"
}

proptest! {
    #[test]
    fn prop_diff_is_exactly_the_uncovered_rows(
        froms in prop::collection::vec(address(), 0..12),
        live in prop::collection::vec(address(), 0..12),
    ) {
        let rows: Vec<_> = froms.iter().map(|f| row(f, "Work")).collect();
        let unprocessed = diff(&rows, &live);

        // Complete and exclusive
        let expected: Vec<_> = rows.iter().filter(|r| !live.contains(&r.from)).cloned().collect();
        prop_assert_eq!(&unprocessed, &expected);

        // Idempotent once every unprocessed from is live
        let mut covered = live.clone();
        covered.extend(unprocessed.iter().map(|r| r.from.clone()));
        prop_assert!(diff(&rows, &covered).is_empty());
    }
}
