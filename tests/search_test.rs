//! Integration tests for the read-side search facade

mod common;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use common::*;
use newsdesk::search::*;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// Index `records` in one batch and wait until all of them are visible
async fn indexed(records: Vec<IndexableRecord>) -> (IndexManager, Arc<IndexTypeSpec>) {
    let notes = Arc::new(note_type());
    let manager = IndexManager::open(test_search_config(), &[notes.clone()]).unwrap();
    let expected = records.len();
    manager
        .index(IndexMutationBatch::new(notes.clone(), records))
        .unwrap();

    let search = manager.searcher();
    let (search_ref, notes_ref) = (&search, &notes);
    assert!(
        wait_until(WAIT, move || async move {
            search_ref
                .search_text("", notes_ref, None, &SearchOptions::default())
                .map(|response| response.total_hits == expected)
                .unwrap_or(false)
        })
        .await
    );
    (manager, notes)
}

fn ids(response: &SearchResponse) -> Vec<&str> {
    response.hits.iter().map(|hit| hit.id.as_str()).collect()
}

#[tokio::test]
async fn test_text_search_tolerates_typos_and_prefixes() {
    let (manager, notes) = indexed(vec![
        note("1", "Christmas market opens in Berlin", "Mulled wine and lights"),
        note("2", "Parliament votes on budget", "Long debate expected"),
    ])
    .await;
    let search = manager.searcher();
    let options = SearchOptions::default();

    let exact = search.search_text("Berlin", &notes, None, &options).unwrap();
    assert_eq!(ids(&exact), vec!["1"]);

    let typo = search.search_text("Berln", &notes, None, &options).unwrap();
    assert_eq!(ids(&typo), vec!["1"]);

    let prefix = search.search_text("parlia", &notes, None, &options).unwrap();
    assert_eq!(ids(&prefix), vec!["2"]);

    let upper = search.search_text("BUDGET", &notes, None, &options).unwrap();
    assert_eq!(ids(&upper), vec!["2"]);

    let none = search.search_text("volcano", &notes, None, &options).unwrap();
    assert_eq!(none.total_hits, 0);
    assert!(none.next_cursor.is_none());
}

#[tokio::test]
async fn test_title_matches_rank_above_body_matches() {
    let (manager, notes) = indexed(vec![
        note("body", "Weekly roundup", "The harbour stays closed"),
        note("title", "Harbour stays closed", "Storm warning in place"),
    ])
    .await;

    let response = manager
        .searcher()
        .search_text("harbour", &notes, None, &SearchOptions::default())
        .unwrap();
    assert_eq!(ids(&response), vec!["title", "body"]);
    assert!(response.hits[0].score.unwrap() > response.hits[1].score.unwrap());
}

#[tokio::test]
async fn test_locale_filter() {
    let (manager, notes) = indexed(vec![
        note("en", "Snow in the alps", "Roads closed"),
        IndexableRecord::insert("de")
            .with_locale(Some("de"))
            .with_field("title", "Schnee in den Alpen")
            .with_field("body", "Straßen gesperrt"),
        IndexableRecord::insert("none")
            .with_field("title", "Snow everywhere")
            .with_field("body", "No locale given"),
    ])
    .await;
    let search = manager.searcher();
    let options = SearchOptions::default();

    let german = search.search_text("", &notes, Some("de"), &options).unwrap();
    assert_eq!(ids(&german), vec!["de"]);

    let english = search.search_text("snow", &notes, Some("en"), &options).unwrap();
    assert_eq!(ids(&english), vec!["en"]);

    let undetermined = search
        .search_text("", &notes, Some(UNDETERMINED_LOCALE), &options)
        .unwrap();
    assert_eq!(ids(&undetermined), vec!["none"]);
    assert_eq!(undetermined.hits[0].locale, UNDETERMINED_LOCALE);
}

#[tokio::test]
async fn test_cursor_paging_over_sorted_field() {
    let records = (1..=5)
        .map(|rank| note(&rank.to_string(), "Ranked note", "Body").with_field("rank", rank as i64))
        .collect();
    let (manager, notes) = indexed(records).await;
    let search = manager.searcher();

    let mut seen = Vec::new();
    let mut options = SearchOptions::default()
        .with_sort(SearchSort::field("rank", SortOrder::Descending))
        .with_max_results(2);
    let mut pages = 0;
    loop {
        let page = search.search_text("", &notes, None, &options).unwrap();
        assert_eq!(page.total_hits, 5);
        seen.extend(page.hits.iter().map(|hit| hit.first_i64("rank").unwrap()));
        pages += 1;
        match page.next_cursor {
            Some(cursor) => options = options.clone().after(cursor),
            None => break,
        }
    }

    assert_eq!(pages, 3);
    assert_eq!(seen, vec![5, 4, 3, 2, 1]);

    let ascending = search
        .search_text(
            "",
            &notes,
            None,
            &SearchOptions::default()
                .with_sort(SearchSort::field("rank", SortOrder::Ascending))
                .with_max_results(2),
        )
        .unwrap();
    let first: Vec<i64> = ascending
        .hits
        .iter()
        .map(|hit| hit.first_i64("rank").unwrap())
        .collect();
    assert_eq!(first, vec![1, 2]);
}

#[tokio::test]
async fn test_sort_by_date_and_range_filter() {
    let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let records = (0..4)
        .map(|hour| {
            note(&format!("n{hour}"), "Timed note", "Body")
                .with_field("published", base + ChronoDuration::hours(hour))
        })
        .collect();
    let (manager, _) = indexed(records).await;
    let search = manager.searcher();

    let query = all_of(vec![
        search.type_filter("note"),
        search
            .date_range_filter(
                "published",
                Some(base + ChronoDuration::hours(1)),
                Some(base + ChronoDuration::hours(2)),
            )
            .unwrap(),
    ]);
    let response = search
        .search(
            query.as_ref(),
            &SearchOptions::default().with_sort(SearchSort::field("published", SortOrder::Descending)),
        )
        .unwrap();

    assert_eq!(ids(&response), vec!["n2", "n1"]);
    assert_eq!(
        response.hits[0].first_date("published"),
        Some(base + ChronoDuration::hours(2))
    );
}

#[tokio::test]
async fn test_grouped_search() {
    let (manager, notes) = indexed(vec![
        note("1", "Storm hits coast", "Wind").with_field("tag", "weather"),
        note("2", "Storm moves inland", "Rain").with_field("tag", "weather"),
        note("3", "Storm of protest", "Politics").with_field("tag", "politics"),
        note("4", "Storm without tag", "Ignored"),
    ])
    .await;
    let search = manager.searcher();

    let query = search.type_filter("note");
    let grouped = search
        .grouped_search("tag", query.as_ref(), &SearchOptions::default())
        .unwrap();

    assert_eq!(grouped.total_hits, 4);
    assert_eq!(grouped.groups.len(), 2);
    let weather = grouped
        .groups
        .iter()
        .find(|group| group.key == FieldValue::Text("weather".to_string()))
        .unwrap();
    assert_eq!(weather.hits.len(), 2);

    let limited = search
        .grouped_search(
            "tag",
            query.as_ref(),
            &SearchOptions::default().with_max_results(1),
        )
        .unwrap();
    assert_eq!(limited.groups.len(), 1);

    let text_query = search.search_text("coast", &notes, None, &SearchOptions::default()).unwrap();
    assert_eq!(ids(&text_query), vec!["1"]);
}

#[tokio::test]
async fn test_id_lookup_and_exclusion() {
    let (manager, notes) = indexed(vec![
        note("1", "First", "One").with_field("tag", "keep"),
        note("2", "Second", "Two").with_field("tag", "keep"),
    ])
    .await;
    let search = manager.searcher();

    let hit = search.id_lookup(&notes, "2").unwrap();
    assert_eq!(hit.first_text("title"), Some("Second"));
    assert!(matches!(
        search.id_lookup(&notes, "3"),
        Err(SearchError::NotFound { .. })
    ));

    let others = search.excluding_record(
        search
            .term_filter("tag", &FieldValue::Text("keep".to_string()))
            .unwrap(),
        "note",
        "1",
    );
    let response = search.search(others.as_ref(), &SearchOptions::default()).unwrap();
    assert_eq!(ids(&response), vec!["2"]);
}

#[tokio::test]
async fn test_id_lookup_with_duplicate_documents() {
    let (manager, notes) = indexed(vec![note("7", "Draft", "First copy")]).await;
    manager
        .index(IndexMutationBatch::new(
            notes.clone(),
            vec![note("7", "Draft", "Second copy")],
        ))
        .unwrap();

    let search = manager.searcher();
    let (search_ref, notes_ref) = (&search, &notes);
    assert!(
        wait_until(WAIT, move || async move {
            search_ref
                .search_text("", notes_ref, None, &SearchOptions::default())
                .map(|response| response.total_hits == 2)
                .unwrap_or(false)
        })
        .await
    );

    let hit = search.id_lookup(&notes, "7").unwrap();
    assert_eq!(hit.id, "7");
    assert_eq!(hit.first_text("title"), Some("Draft"));
}

#[tokio::test]
async fn test_similarity_query_finds_related_text() {
    let (manager, notes) = indexed(vec![
        note(
            "1",
            "Volcano erupts on remote island",
            "Lava flows reach the coastal village",
        ),
        note(
            "2",
            "Remote island volcano erupts again",
            "Lava reaches coastal village overnight",
        ),
        note("3", "Stock markets rally", "Investors cheer quarterly results"),
    ])
    .await;
    let search = manager.searcher();

    let similar = search
        .new_similarity_query(Some("en"))
        .like("title", "Volcano erupts on remote island")
        .unwrap()
        .like("body", "Lava flows reach the coastal village")
        .unwrap()
        .build()
        .unwrap();
    let query = search.excluding_record(
        all_of(vec![search.type_filter("note"), similar]),
        "note",
        "1",
    );
    let response = search.search(query.as_ref(), &SearchOptions::default()).unwrap();

    assert_eq!(ids(&response), vec!["2"]);
    assert!(response.hits[0].score.unwrap() > 1.2);
    drop(notes);
}
