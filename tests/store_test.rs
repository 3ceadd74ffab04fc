//! Article Store Integration Tests
//!
//! Run and memo persistence through the public store API.

use foglio_coordinator::store::{ReflectionFailure, ReflectionNote};
use foglio_coordinator::{ArticleStore, MemoRecord, Phase, ReflectionOutcome, SqliteStore};
use tempfile::TempDir;
use uuid::Uuid;

fn create_test_store(name: &str) -> (SqliteStore, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join(format!("{}.db", name));
    let store = SqliteStore::open(&db_path).expect("Failed to create store");
    (store, temp_dir)
}

#[test]
fn test_fresh_run_is_created_once() {
    let (store, _temp) = create_test_store("fresh");
    let id = Uuid::new_v4();

    let first = tokio_test::block_on(store.get_article_run(id)).unwrap();
    let second = tokio_test::block_on(store.get_article_run(id)).unwrap();

    assert_eq!(first.status, Phase::Pending);
    assert_eq!(first.created_at, second.created_at);
}

#[test]
fn test_full_run_round_trip() {
    let (store, temp) = create_test_store("full");
    let id = Uuid::new_v4();
    let memo_id = Uuid::new_v4();

    let mut run = tokio_test::block_on(store.get_article_run(id)).unwrap();
    run.status = Phase::Completed;
    run.reflection_outcome = Some(ReflectionOutcome::Complete);
    run.reflections.entry(memo_id).or_default().push(ReflectionNote {
        reflection_id: Uuid::new_v4(),
        source_agent_id: "Politics-Right".into(),
        content: "Framing is progressive.".into(),
        metadata: Default::default(),
        timestamp: 100.0,
    });
    run.reflection_failures.entry(memo_id).or_default().push(ReflectionFailure {
        reflection_id: Uuid::new_v4(),
        source_agent_id: "Graphic Artist".into(),
        error: "Reflection skipped".into(),
        reason: Some("Agent Graphic Artist is not configured to provide reflections".into()),
        timestamp: 101.0,
    });
    run.reflection_summaries.insert(memo_id, "Needs a counterpoint.".into());
    tokio_test::block_on(store.save_article_run(&run)).unwrap();
    drop(store);

    let reopened = SqliteStore::open(&temp.path().join("full.db")).unwrap();
    let loaded = tokio_test::block_on(reopened.get_article_run(id)).unwrap();
    assert_eq!(loaded, run);
    assert_eq!(loaded.reflection_count(), 1);
}

#[test]
fn test_memos_by_article_in_creation_order() {
    let (store, _temp) = create_test_store("memos");
    let article = Uuid::new_v4();

    let mut ids = Vec::new();
    for (i, agent) in ["Researcher", "Writer", "Historian"].iter().enumerate() {
        let mut memo = MemoRecord::new(article, agent, "text");
        memo.created_at = i as f64;
        tokio_test::block_on(store.save_memo(&memo)).unwrap();
        ids.push(memo.id);
    }
    tokio_test::block_on(store.save_memo(&MemoRecord::new(Uuid::new_v4(), "Writer", "other"))).unwrap();

    let memos = tokio_test::block_on(store.get_memos_by_article(article)).unwrap();
    assert_eq!(memos.iter().map(|m| m.id).collect::<Vec<_>>(), ids);
}
