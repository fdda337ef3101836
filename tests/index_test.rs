//! Integration tests for the index manager and indexing thread

mod common;

use common::*;
use newsdesk::search::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

async fn wait_for_total(
    search: &IndexSearch,
    spec: &IndexTypeSpec,
    text: &str,
    total: usize,
) -> bool {
    wait_until(WAIT, move || async move {
        search
            .search_text(text, spec, None, &SearchOptions::default())
            .map(|response| response.total_hits == total)
            .unwrap_or(false)
    })
    .await
}

#[tokio::test]
async fn test_insert_update_delete_visibility() {
    let notes = Arc::new(note_type());
    let manager = IndexManager::open(test_search_config(), &[notes.clone()]).unwrap();
    let search = manager.searcher();

    manager
        .index(IndexMutationBatch::new(
            notes.clone(),
            vec![note("1", "Harbour reopens", "Ships are back")],
        ))
        .unwrap();
    assert!(wait_for_total(&search, &notes, "harbour", 1).await);

    let mut update = note("1", "Airport reopens", "Planes are back");
    update.operation = Operation::Update;
    manager
        .index(IndexMutationBatch::new(notes.clone(), vec![update]))
        .unwrap();
    assert!(wait_for_total(&search, &notes, "airport", 1).await);
    assert!(wait_for_total(&search, &notes, "harbour", 0).await);

    let hit = search.id_lookup(&notes, "1").unwrap();
    assert_eq!(hit.first_text("title"), Some("Airport reopens"));

    manager
        .index(IndexMutationBatch::new(
            notes.clone(),
            vec![IndexableRecord::delete("1")],
        ))
        .unwrap();
    let (search_ref, notes_ref) = (&search, &notes);
    assert!(
        wait_until(WAIT, move || async move {
            matches!(
                search_ref.id_lookup(notes_ref, "1"),
                Err(SearchError::NotFound { .. })
            )
        })
        .await
    );

    manager.shutdown().unwrap();
}

#[tokio::test]
async fn test_failed_batch_is_rolled_back() {
    let notes = Arc::new(note_type());
    let manager = IndexManager::open(test_search_config(), &[notes.clone()]).unwrap();
    let search = manager.searcher();

    // the second record carries text in a numeric field
    let broken = vec![
        note("1", "Valid record", "Fine"),
        note("2", "Broken record", "Bad rank").with_field("rank", "high"),
    ];
    manager
        .index(IndexMutationBatch::new(notes.clone(), broken))
        .unwrap();
    manager
        .index(IndexMutationBatch::new(
            notes.clone(),
            vec![note("3", "Later record", "Still applied")],
        ))
        .unwrap();

    assert!(wait_for_total(&search, &notes, "later", 1).await);
    assert!(matches!(
        search.id_lookup(&notes, "1"),
        Err(SearchError::NotFound { .. })
    ));
    assert_eq!(
        search
            .search_text("", &notes, None, &SearchOptions::default())
            .unwrap()
            .total_hits,
        1
    );

    manager.shutdown().unwrap();
}

#[tokio::test]
async fn test_reindex_chunks_and_replaces_documents() {
    let provider = CountingProvider::new(450);
    let notes = Arc::new(note_type().with_provider(provider.clone()));
    let manager = IndexManager::open(test_search_config(), &[notes.clone()]).unwrap();
    let search = manager.searcher();

    manager
        .index(IndexMutationBatch::new(
            notes.clone(),
            vec![note("stale", "Stale leftover", "Not in the provider")],
        ))
        .unwrap();
    assert!(wait_for_total(&search, &notes, "leftover", 1).await);

    let summary = manager.reindex(notes.clone()).unwrap().await.unwrap().unwrap();
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.records, 450);
    assert!(!summary.cancelled);
    // two full chunks, a partial one, then the empty one
    assert_eq!(provider.calls(), 4);

    assert!(wait_for_total(&search, &notes, "", 450).await);
    assert!(wait_for_total(&search, &notes, "leftover", 0).await);

    manager.shutdown().unwrap();
}

#[tokio::test]
async fn test_reindex_requires_provider() {
    let notes = Arc::new(note_type());
    let manager = IndexManager::open(test_search_config(), &[notes.clone()]).unwrap();

    assert!(matches!(
        manager.reindex(notes),
        Err(SearchError::InvalidConfiguration(_))
    ));
}

#[tokio::test]
async fn test_shutdown_rejects_new_batches() {
    let notes = Arc::new(note_type());
    let manager = IndexManager::open(test_search_config(), &[notes.clone()]).unwrap();

    manager.shutdown().unwrap();
    manager.shutdown().unwrap();

    assert!(manager.is_shut_down());
    assert_eq!(manager.indexing_state(), IndexingState::Stopped);
    let result = manager.index(IndexMutationBatch::new(
        notes.clone(),
        vec![note("1", "Too late", "Rejected")],
    ));
    assert!(matches!(result, Err(SearchError::ShutDown)));
}

#[tokio::test]
async fn test_index_survives_reopen_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let config = SearchConfigBuilder::new()
        .index_path(temp_dir.path().to_path_buf())
        .writer_heap_size(15_000_000)
        .build();
    let notes = Arc::new(note_type());

    {
        let manager = IndexManager::open(config.clone(), &[notes.clone()]).unwrap();
        manager
            .index(IndexMutationBatch::new(
                notes.clone(),
                vec![note("1", "Persistent note", "Written to disk")],
            ))
            .unwrap();
        assert!(wait_for_total(&manager.searcher(), &notes, "persistent", 1).await);
        manager.shutdown().unwrap();
    }

    let manager = IndexManager::open(config, &[notes.clone()]).unwrap();
    let hit = manager.searcher().id_lookup(&notes, "1").unwrap();
    assert_eq!(hit.first_text("body"), Some("Written to disk"));
    manager.shutdown().unwrap();
}
