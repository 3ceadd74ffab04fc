//! In-memory article store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{ArticleRun, ArticleStore, MemoRecord, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<Uuid, ArticleRun>>,
    /// Insertion order breaks created_at ties
    memos: RwLock<Vec<MemoRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn get_article_run(&self, id: Uuid) -> Result<ArticleRun, StoreError> {
        let mut runs = self.runs.write();
        Ok(runs.entry(id).or_insert_with(|| ArticleRun::new(id)).clone())
    }

    async fn save_article_run(&self, run: &ArticleRun) -> Result<(), StoreError> {
        self.runs.write().insert(run.id, run.clone());
        Ok(())
    }

    async fn get_memos_by_article(&self, article_id: Uuid) -> Result<Vec<MemoRecord>, StoreError> {
        let mut memos: Vec<MemoRecord> = self
            .memos
            .read()
            .iter()
            .filter(|m| m.article_id == article_id)
            .cloned()
            .collect();
        memos.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        Ok(memos)
    }

    async fn get_memo_by_id(&self, memo_id: Uuid) -> Result<Option<MemoRecord>, StoreError> {
        Ok(self.memos.read().iter().find(|m| m.id == memo_id).cloned())
    }

    async fn save_memo(&self, memo: &MemoRecord) -> Result<(), StoreError> {
        let mut memos = self.memos.write();
        match memos.iter_mut().find(|m| m.id == memo.id) {
            Some(existing) => *existing = memo.clone(),
            None => memos.push(memo.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Phase;

    #[tokio::test]
    async fn test_get_creates_pending_run() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        let mut run = store.get_article_run(id).await.unwrap();
        assert_eq!(run.status, Phase::Pending);

        run.status = Phase::Drafting;
        store.save_article_run(&run).await.unwrap();
        assert_eq!(store.get_article_run(id).await.unwrap().status, Phase::Drafting);
    }

    #[tokio::test]
    async fn test_memos_scoped_by_article() {
        let store = MemoryStore::new();
        let article = Uuid::new_v4();
        let mut first = MemoRecord::new(article, "Researcher", "facts");
        first.created_at = 1.0;
        let mut second = MemoRecord::new(article, "Writer", "draft");
        second.created_at = 2.0;
        let other = MemoRecord::new(Uuid::new_v4(), "Writer", "elsewhere");
        for memo in [&first, &second, &other] {
            store.save_memo(memo).await.unwrap();
        }

        let memos = store.get_memos_by_article(article).await.unwrap();
        assert_eq!(memos.len(), 2);
        assert_eq!(memos[0].agent_id, "Researcher");
        assert_eq!(store.get_memo_by_id(other.id).await.unwrap(), Some(other));
        assert_eq!(store.get_memo_by_id(Uuid::new_v4()).await.unwrap(), None);
    }
}
