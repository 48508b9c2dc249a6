use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::{Author, Commit, CommitQuery, CommitRecord};
use crate::infrastructure::error::StoreError;

pub mod memory;

pub use memory::MemoryProvider;

#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

#[cfg(feature = "storage-sqlite")]
pub use sqlite::SQLiteProvider;

/// 存储类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageType {
    SQLite,
    Memory,
}

/// 一次原子写入的变更集（按 id / sha 覆盖写）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub authors: Vec<Author>,
    pub commits: Vec<Commit>,
}

/// 存储提供商 trait，只暴露已提交状态
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// 获取存储类型
    fn storage_type(&self) -> StorageType;

    /// 按名称查找作者，同名多行时返回最早写入的一行
    async fn find_author_by_name(&self, name: &str) -> Result<Option<Author>, StoreError>;

    /// 按 sha 查找提交
    async fn find_commit(&self, sha: &str) -> Result<Option<CommitRecord>, StoreError>;

    /// 最新提交日期
    async fn latest_commit_date(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// 过滤并排序
    async fn query_commits(&self, query: &CommitQuery) -> Result<Vec<CommitRecord>, StoreError>;

    /// 全部作者，按名称排序
    async fn list_authors(&self) -> Result<Vec<Author>, StoreError>;

    /// 原子写入，失败时已提交状态保持不变
    async fn apply(&mut self, changes: &ChangeSet) -> Result<(), StoreError>;

    /// 删除提交，返回是否存在
    async fn delete_commit(&mut self, sha: &str) -> Result<bool, StoreError>;

    /// 健康检查
    async fn health_check(&self) -> Result<bool, StoreError>;

    /// 获取存储统计信息
    async fn get_storage_stats(&self) -> Result<StorageStats, StoreError>;
}

/// 存储统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_commits: usize,
    pub total_authors: usize,
    pub oldest_commit: Option<DateTime<Utc>>,
    pub newest_commit: Option<DateTime<Utc>>,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub provider: StorageType,
    pub connection_string: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageType::SQLite,
            connection_string: "sqlite://commits.db".to_string(),
            max_connections: 5,
        }
    }
}

/// 按配置打开存储提供商
pub async fn open_provider(config: &StorageConfig) -> Result<Box<dyn StorageProvider>, StoreError> {
    match config.provider {
        #[cfg(feature = "storage-sqlite")]
        StorageType::SQLite => {
            let provider = SQLiteProvider::new(&config.connection_string, config.max_connections).await?;
            Ok(Box::new(provider))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageType::SQLite => {
            tracing::warn!("SQLite support not compiled in, falling back to in-memory storage");
            Ok(Box::new(MemoryProvider::new()))
        }
        StorageType::Memory => Ok(Box::new(MemoryProvider::new())),
    }
}
