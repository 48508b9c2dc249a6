use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, error};

use super::{ChangeSet, StorageProvider, StorageStats, StorageType};
use crate::infrastructure::error::StoreError;
use crate::storage::models::{Author, AuthorRef, Commit, CommitQuery, CommitRecord};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    authors: HashMap<AuthorRef, Author>,
    /// name -> 最早写入的作者
    name_index: HashMap<String, AuthorRef>,
    commits: HashMap<String, Commit>,
}

impl MemoryState {
    fn upsert_author(&mut self, author: &Author) {
        if let Some(previous) = self.authors.get(&author.id) {
            if previous.name != author.name && self.name_index.get(&previous.name) == Some(&author.id) {
                self.name_index.remove(&previous.name);
            }
        }
        self.name_index.entry(author.name.clone()).or_insert(author.id);
        self.authors.insert(author.id, author.clone());
    }

    fn record(&self, commit: &Commit) -> Option<CommitRecord> {
        self.authors.get(&commit.author).map(|author| CommitRecord {
            commit: commit.clone(),
            author: author.clone(),
        })
    }
}

/// 内存存储提供商，写入时先在副本上应用再整体替换
#[derive(Debug, Default)]
pub struct MemoryProvider {
    state: MemoryState,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn storage_type(&self) -> StorageType {
        StorageType::Memory
    }

    async fn find_author_by_name(&self, name: &str) -> Result<Option<Author>, StoreError> {
        Ok(self
            .state
            .name_index
            .get(name)
            .and_then(|id| self.state.authors.get(id))
            .cloned())
    }

    async fn find_commit(&self, sha: &str) -> Result<Option<CommitRecord>, StoreError> {
        match self.state.commits.get(sha) {
            Some(commit) => self
                .state
                .record(commit)
                .map(Some)
                .ok_or_else(|| StoreError::corrupt(format!("commit {} references a missing author", sha))),
            None => Ok(None),
        }
    }

    async fn latest_commit_date(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.state.commits.values().map(|c| c.date).max())
    }

    async fn query_commits(&self, query: &CommitQuery) -> Result<Vec<CommitRecord>, StoreError> {
        let mut records = Vec::with_capacity(self.state.commits.len());

        for commit in self.state.commits.values() {
            match self.state.record(commit) {
                Some(record) if query.matches(&record) => records.push(record),
                Some(_) => {}
                None => error!("Commit {} references a missing author", commit.sha),
            }
        }

        records.sort_by(|a, b| query.sort.compare(a, b));
        debug!("Queried {} commits", records.len());
        Ok(records)
    }

    async fn list_authors(&self) -> Result<Vec<Author>, StoreError> {
        let mut authors: Vec<Author> = self.state.authors.values().cloned().collect();
        authors.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(authors)
    }

    async fn apply(&mut self, changes: &ChangeSet) -> Result<(), StoreError> {
        let mut next = self.state.clone();

        for author in &changes.authors {
            next.upsert_author(author);
        }

        for commit in &changes.commits {
            if !next.authors.contains_key(&commit.author) {
                return Err(StoreError::constraint(format!(
                    "commit {} references unknown author {}",
                    commit.sha, commit.author
                )));
            }
            next.commits.insert(commit.sha.clone(), commit.clone());
        }

        self.state = next;
        debug!(
            "Applied {} authors and {} commits",
            changes.authors.len(),
            changes.commits.len()
        );
        Ok(())
    }

    async fn delete_commit(&mut self, sha: &str) -> Result<bool, StoreError> {
        Ok(self.state.commits.remove(sha).is_some())
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn get_storage_stats(&self) -> Result<StorageStats, StoreError> {
        let dates = self.state.commits.values().map(|c| c.date);

        Ok(StorageStats {
            total_commits: self.state.commits.len(),
            total_authors: self.state.authors.len(),
            oldest_commit: dates.clone().min(),
            newest_commit: dates.max(),
        })
    }
}
