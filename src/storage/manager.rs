use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use super::merge::{IncomingWins, MergePolicy};
use super::models::{
    Author, AuthorRef, Commit, CommitQuery, CommitRecord, CommitRef, CommitSummary, StoreEvent,
};
use super::providers::{ChangeSet, StorageProvider, StorageStats, StorageType};
use crate::infrastructure::error::StoreError;

/// 写者独占、读者共享的存储句柄
pub type SharedStore = Arc<RwLock<RecordStore>>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// 暂存区：提交前对查询不可见
#[derive(Debug, Default)]
struct StagedChanges {
    authors: Vec<Author>,
    author_by_id: HashMap<AuthorRef, usize>,
    author_by_name: HashMap<String, usize>,
    existing_authors: HashSet<AuthorRef>,
    commits: Vec<Commit>,
    commit_by_sha: HashMap<String, usize>,
    existing_commits: HashSet<String>,
}

impl StagedChanges {
    fn is_empty(&self) -> bool {
        self.authors.is_empty() && self.commits.is_empty()
    }

    fn stage_author(&mut self, author: Author, already_stored: bool) {
        if already_stored {
            self.existing_authors.insert(author.id);
        }

        match self.author_by_id.get(&author.id) {
            Some(&index) => self.authors[index] = author,
            None => {
                let index = self.authors.len();
                self.author_by_id.insert(author.id, index);
                self.author_by_name.entry(author.name.clone()).or_insert(index);
                self.authors.push(author);
            }
        }
    }

    fn staged_author_by_name(&self, name: &str) -> Option<&Author> {
        self.author_by_name.get(name).map(|&index| &self.authors[index])
    }

    fn staged_commit(&self, sha: &str) -> Option<&Commit> {
        self.commit_by_sha.get(sha).map(|&index| &self.commits[index])
    }

    fn stage_commit(&mut self, commit: Commit, already_stored: bool) {
        if already_stored {
            self.existing_commits.insert(commit.sha.clone());
        }

        match self.commit_by_sha.get(&commit.sha) {
            Some(&index) => self.commits[index] = commit,
            None => {
                self.commit_by_sha.insert(commit.sha.clone(), self.commits.len());
                self.commits.push(commit);
            }
        }
    }

    fn drop_commit(&mut self, sha: &str) {
        if self.commit_by_sha.remove(sha).is_some() {
            self.commits.retain(|c| c.sha != sha);
            self.existing_commits.remove(sha);
            self.commit_by_sha = self
                .commits
                .iter()
                .enumerate()
                .map(|(index, c)| (c.sha.clone(), index))
                .collect();
        }
    }

    fn summary(&self) -> CommitSummary {
        let commits_updated = self
            .commits
            .iter()
            .filter(|c| self.existing_commits.contains(&c.sha))
            .count();
        let authors_updated = self
            .authors
            .iter()
            .filter(|a| self.existing_authors.contains(&a.id))
            .count();

        CommitSummary {
            commits_inserted: self.commits.len() - commits_updated,
            commits_updated,
            authors_inserted: self.authors.len() - authors_updated,
            authors_updated,
        }
    }

    fn into_change_set(self) -> ChangeSet {
        ChangeSet {
            authors: self.authors,
            commits: self.commits,
        }
    }
}

/// 记录存储：已提交状态由提供商持有，写入先进入暂存区，`commit` 是唯一的可见性边界
pub struct RecordStore {
    provider: Box<dyn StorageProvider>,
    merge_policy: Arc<dyn MergePolicy>,
    staged: StagedChanges,
    events: broadcast::Sender<StoreEvent>,
}

impl RecordStore {
    /// 创建新的记录存储
    pub fn new(provider: Box<dyn StorageProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            provider,
            merge_policy: Arc::new(IncomingWins),
            staged: StagedChanges::default(),
            events,
        }
    }

    pub fn with_merge_policy(mut self, policy: Arc<dyn MergePolicy>) -> Self {
        self.merge_policy = policy;
        self
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    pub fn storage_type(&self) -> StorageType {
        self.provider.storage_type()
    }

    pub fn merge_policy(&self) -> &dyn MergePolicy {
        self.merge_policy.as_ref()
    }

    /// 订阅变更事件
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn has_changes(&self) -> bool {
        !self.staged.is_empty()
    }

    /// 写入或合并提交；同 sha 已存在（暂存或已提交）时按合并策略处理
    pub async fn upsert_commit(&mut self, commit: Commit) -> Result<CommitRef, StoreError> {
        let commit_ref = commit.commit_ref();

        if let Some(staged) = self.staged.staged_commit(&commit.sha) {
            let merged = self.merge_policy.merge_commit(staged, commit)?;
            debug!("Merged commit {} into staged version", commit_ref);
            let already_stored = self.staged.existing_commits.contains(&merged.sha);
            self.staged.stage_commit(merged, already_stored);
            return Ok(commit_ref);
        }

        match self.provider.find_commit(&commit.sha).await? {
            Some(existing) => {
                let merged = self.merge_policy.merge_commit(&existing.commit, commit)?;
                debug!("Merged commit {} into stored version", commit_ref);
                self.staged.stage_commit(merged, true);
            }
            None => {
                debug!("Staged new commit {}", commit_ref);
                self.staged.stage_commit(commit, false);
            }
        }

        Ok(commit_ref)
    }

    /// 按名称查找作者，先查暂存区再查已提交数据
    pub async fn find_author_by_name(&self, name: &str) -> Result<Option<Author>, StoreError> {
        if let Some(author) = self.staged.staged_author_by_name(name) {
            return Ok(Some(author.clone()));
        }
        self.provider.find_author_by_name(name).await
    }

    /// 暂存新作者，不检查重名
    pub fn insert_author(&mut self, name: &str, email: &str) -> AuthorRef {
        let author = Author {
            id: AuthorRef::new(),
            name: name.to_string(),
            email: email.to_string(),
        };
        let id = author.id;
        debug!("Staged new author {} ({})", author.name, id);
        self.staged.stage_author(author, false);
        id
    }

    /// 暂存已有作者的字段更新
    pub fn stage_author(&mut self, author: Author) {
        let already_stored = !self.staged.author_by_id.contains_key(&author.id)
            || self.staged.existing_authors.contains(&author.id);
        self.staged.stage_author(author, already_stored);
    }

    /// 原子提交暂存区；无变更时为空操作，失败时丢弃暂存区且已提交状态不变
    pub async fn commit(&mut self) -> Result<CommitSummary, StoreError> {
        if self.staged.is_empty() {
            debug!("Nothing staged, skipping commit");
            return Ok(CommitSummary::default());
        }

        let staged = std::mem::take(&mut self.staged);
        let summary = staged.summary();
        let changes = staged.into_change_set();

        match self.provider.apply(&changes).await {
            Ok(()) => {
                info!(
                    "Committed {} new and {} updated commits, {} new and {} updated authors",
                    summary.commits_inserted,
                    summary.commits_updated,
                    summary.authors_inserted,
                    summary.authors_updated
                );
                self.publish(StoreEvent::Committed(summary.clone()));
                Ok(summary)
            }
            Err(e) => {
                error!("Failed to commit staged changes: {}", e);
                Err(e)
            }
        }
    }

    /// 丢弃暂存区
    pub fn rollback(&mut self) {
        if self.has_changes() {
            warn!(
                "Discarding {} staged commits and {} staged authors",
                self.staged.commits.len(),
                self.staged.authors.len()
            );
        }
        self.staged = StagedChanges::default();
    }

    pub async fn latest_commit_date(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.provider.latest_commit_date().await
    }

    /// 删除单条已提交的提交；未找到时暂存区保持不变
    pub async fn delete_commit(&mut self, commit: &CommitRef) -> Result<(), StoreError> {
        if self.provider.delete_commit(commit.as_str()).await? {
            self.staged.drop_commit(commit.as_str());
            info!("Deleted commit {}", commit);
            self.publish(StoreEvent::Deleted(commit.clone()));
            Ok(())
        } else {
            warn!("Commit {} not found", commit);
            Err(StoreError::NotFound {
                sha: commit.to_string(),
            })
        }
    }

    /// 只读查询已提交数据
    pub async fn query(&self, query: &CommitQuery) -> Result<Vec<CommitRecord>, StoreError> {
        self.provider.query_commits(query).await
    }

    pub async fn find_commit(&self, commit: &CommitRef) -> Result<Option<CommitRecord>, StoreError> {
        self.provider.find_commit(commit.as_str()).await
    }

    pub async fn authors(&self) -> Result<Vec<Author>, StoreError> {
        self.provider.list_authors().await
    }

    pub async fn stats(&self) -> Result<StorageStats, StoreError> {
        self.provider.get_storage_stats().await
    }

    pub async fn health_check(&self) -> Result<bool, StoreError> {
        self.provider.health_check().await
    }

    fn publish(&self, event: StoreEvent) {
        match self.events.send(event) {
            Ok(receivers) => debug!("Published store event to {} subscribers", receivers),
            Err(_) => debug!("No subscribers for store event"),
        }
    }
}
