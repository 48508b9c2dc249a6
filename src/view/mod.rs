pub mod diff;
pub mod query;

pub use diff::{diff_snapshots, RowChange, SectionChange, ViewDiff};
pub use query::{IndexPath, Section, ViewSnapshot};

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::infrastructure::error::StoreError;
use crate::storage::{CommitFilter, CommitQuery, CommitRecord, RecordStore, SectionKey, SortKey, StoreEvent};

/// 过滤、排序、分组后的实时视图，每次刷新返回相对上一快照的差异
#[derive(Debug, Clone)]
pub struct QueryView {
    filter: Option<CommitFilter>,
    sort: SortKey,
    section_key: Option<SectionKey>,
    snapshot: ViewSnapshot,
}

impl Default for QueryView {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryView {
    pub fn new() -> Self {
        Self {
            filter: None,
            sort: SortKey::default(),
            section_key: None,
            snapshot: ViewSnapshot::empty(None),
        }
    }

    pub fn with_filter(mut self, filter: CommitFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_sections(mut self, key: SectionKey) -> Self {
        self.section_key = Some(key);
        self.snapshot = ViewSnapshot::empty(self.section_key);
        self
    }

    /// 下次刷新生效
    pub fn set_filter(&mut self, filter: Option<CommitFilter>) {
        self.filter = filter;
    }

    pub fn set_sort(&mut self, sort: SortKey) {
        self.sort = sort;
    }

    pub fn set_section_key(&mut self, key: Option<SectionKey>) {
        self.section_key = key;
    }

    pub fn query(&self) -> CommitQuery {
        CommitQuery::new(self.filter.clone(), self.sort)
    }

    /// 重新查询并替换快照
    pub async fn refresh(&mut self, store: &RecordStore) -> Result<ViewDiff, StoreError> {
        let records = store.query(&self.query()).await?;
        let next = ViewSnapshot::build(records, self.section_key);
        let diff = diff_snapshots(&self.snapshot, &next);

        debug!(
            "View refreshed: {} rows, {} row changes, {} section changes",
            next.len(),
            diff.rows.len(),
            diff.sections.len()
        );

        self.snapshot = next;
        Ok(diff)
    }

    pub fn snapshot(&self) -> &ViewSnapshot {
        &self.snapshot
    }

    pub fn sections(&self) -> &[Section] {
        self.snapshot.sections()
    }

    pub fn row(&self, path: IndexPath) -> Option<&CommitRecord> {
        self.snapshot.row(path)
    }

    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }
}

/// 视图需要刷新的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotice {
    Event(StoreEvent),
    /// 接收端落后，丢失了若干事件
    Missed(u64),
}

/// 等待下一次存储变更；通道关闭时返回 `None`
pub async fn wait_for_change(events: &mut broadcast::Receiver<StoreEvent>) -> Option<ChangeNotice> {
    match events.recv().await {
        Ok(event) => Some(ChangeNotice::Event(event)),
        Err(RecvError::Lagged(missed)) => {
            warn!("View lagged behind store, {} events skipped", missed);
            Some(ChangeNotice::Missed(missed))
        }
        Err(RecvError::Closed) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::providers::MemoryProvider;
    use crate::storage::{Commit, CommitRef, CommitSummary};
    use chrono::{TimeZone, Utc};

    async fn seeded_store() -> RecordStore {
        let mut store = RecordStore::new(Box::new(MemoryProvider::new()));
        let ann = store.insert_author("Ann", "a@x.com");
        let bob = store.insert_author("Bob", "b@x.com");
        for (sha, message, author, hour) in [
            ("a1", "Fix bug", ann, 1),
            ("b1", "Add feature", bob, 2),
            ("a2", "fix typo", ann, 3),
        ] {
            store
                .upsert_commit(Commit {
                    sha: sha.to_string(),
                    message: message.to_string(),
                    url: String::new(),
                    date: Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap(),
                    author,
                })
                .await
                .unwrap();
        }
        store.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_first_refresh_inserts_everything() {
        let store = seeded_store().await;
        let mut view = QueryView::new().with_sort(SortKey::DateDescending);

        let diff = view.refresh(&store).await.unwrap();
        assert_eq!(diff.inserts().count(), 3);
        assert!(diff.sections.is_empty());
        assert_eq!(view.row(IndexPath::new(0, 0)).unwrap().sha(), "a2");

        assert!(view.refresh(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_setters_apply_on_next_refresh() {
        let store = seeded_store().await;
        let mut view = QueryView::new();
        view.refresh(&store).await.unwrap();

        view.set_filter(Some(CommitFilter::fixes()));
        assert_eq!(view.len(), 3);

        let diff = view.refresh(&store).await.unwrap();
        assert_eq!(
            diff.rows,
            vec![RowChange::Delete {
                commit: CommitRef::from("b1"),
                at: IndexPath::new(0, 2)
            }]
        );
        assert_eq!(view.len(), 2);
    }

    #[tokio::test]
    async fn test_changing_section_key_regroups_rows() {
        let store = seeded_store().await;
        let mut view = QueryView::new();
        view.refresh(&store).await.unwrap();

        view.set_section_key(Some(SectionKey::AuthorName));
        let diff = view.refresh(&store).await.unwrap();

        assert_eq!(view.sections().len(), 2);
        assert_eq!(diff.sections.len(), 3);
        assert_eq!(diff.moves().count(), 3);
    }

    #[tokio::test]
    async fn test_wait_for_change() {
        let (sender, mut receiver) = broadcast::channel(1);
        sender.send(StoreEvent::Committed(CommitSummary::default())).unwrap();
        sender.send(StoreEvent::Deleted(CommitRef::from("a1"))).unwrap();

        assert_eq!(wait_for_change(&mut receiver).await, Some(ChangeNotice::Missed(1)));
        assert_eq!(
            wait_for_change(&mut receiver).await,
            Some(ChangeNotice::Event(StoreEvent::Deleted(CommitRef::from("a1"))))
        );

        drop(sender);
        assert_eq!(wait_for_change(&mut receiver).await, None);
    }
}
