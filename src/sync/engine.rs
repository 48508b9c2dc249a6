use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::decode::RawCommit;
use super::identity::{AuthorMergePolicy, IdentityResolver};
use super::source::CommitSource;
use crate::infrastructure::error::{StoreError, SyncError};
use crate::infrastructure::logging::SyncTracker;
use crate::storage::{Commit, RecordStore};

/// 同步周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Idle,
    Fetching,
    Decoding,
    Merging,
    Committing,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Fetching => "fetching",
            SyncState::Decoding => "decoding",
            SyncState::Merging => "merging",
            SyncState::Committing => "committing",
        };
        f.write_str(name)
    }
}

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 拉取下界相对最新已存日期的偏移
    pub watermark_epsilon: Duration,
    pub author_policy: AuthorMergePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watermark_epsilon: Duration::seconds(1),
            author_policy: AuthorMergePolicy::KeepExisting,
        }
    }
}

/// 一次成功同步的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub cycle_id: String,
    pub watermark: DateTime<Utc>,
    pub fetched: usize,
    /// 使用了默认值的记录数
    pub degraded: usize,
    pub authors_created: usize,
    pub commits_inserted: usize,
    pub commits_updated: usize,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched {} commits since {} ({} inserted, {} updated, {} new authors",
            self.fetched,
            self.watermark.to_rfc3339(),
            self.commits_inserted,
            self.commits_updated,
            self.authors_created
        )?;
        if self.degraded > 0 {
            write!(f, ", {} with defaulted fields", self.degraded)?;
        }
        f.write_str(")")
    }
}

/// 空库从 Unix 纪元开始，否则为最新日期加偏移
pub fn compute_watermark(latest: Option<DateTime<Utc>>, epsilon: Duration) -> DateTime<Utc> {
    match latest {
        Some(date) => date + epsilon,
        None => DateTime::<Utc>::from(std::time::UNIX_EPOCH),
    }
}

/// 周期守卫，离开作用域时（含取消）恢复为 Idle
struct CycleGuard<'a> {
    state: &'a Mutex<SyncState>,
}

impl<'a> CycleGuard<'a> {
    fn acquire(state: &'a Mutex<SyncState>) -> Result<Self, SyncError> {
        let mut current = state.lock().unwrap_or_else(|e| e.into_inner());
        if *current != SyncState::Idle {
            debug!("Rejecting sync cycle, engine is {}", *current);
            return Err(SyncError::AlreadyRunning);
        }
        *current = SyncState::Fetching;
        Ok(Self { state })
    }

    fn enter(&self, next: SyncState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    fn current(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = SyncState::Idle;
    }
}

/// 同步引擎：拉取、解码、合并、提交
pub struct SyncEngine {
    source: Arc<dyn CommitSource>,
    config: SyncConfig,
    state: Mutex<SyncState>,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn CommitSource>, config: SyncConfig) -> Self {
        Self {
            source,
            config,
            state: Mutex::new(SyncState::Idle),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 执行一次同步；已有周期在进行时立即返回 `AlreadyRunning`
    pub async fn run_cycle(&self, store: &RwLock<RecordStore>) -> Result<SyncReport, SyncError> {
        let guard = CycleGuard::acquire(&self.state)?;
        let tracker = SyncTracker::new(&self.source.describe());

        match self.execute(&guard, &tracker, store).await {
            Ok(report) => {
                tracker.complete(report.fetched);
                Ok(report)
            }
            Err(e) => {
                tracker.log_error(&guard.current().to_string(), &e);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        guard: &CycleGuard<'_>,
        tracker: &SyncTracker,
        store: &RwLock<RecordStore>,
    ) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now();

        tracker.log_stage("fetching");
        let latest = store.read().await.latest_commit_date().await?;
        let watermark = compute_watermark(latest, self.config.watermark_epsilon);
        let items = self.source.fetch_since(watermark).await?;

        guard.enter(SyncState::Decoding);
        tracker.log_stage("decoding");
        let records: Vec<RawCommit> = items
            .iter()
            .map(|item| RawCommit::from_json(item, started_at))
            .collect();
        let degraded = records.iter().filter(|r| r.is_degraded()).count();

        guard.enter(SyncState::Merging);
        tracker.log_stage("merging");
        let mut store = store.write().await;
        // 被取消的周期可能留下暂存数据
        store.rollback();

        let mut resolver = IdentityResolver::new(self.config.author_policy);
        if let Err(e) = stage_records(&mut store, &mut resolver, records).await {
            store.rollback();
            return Err(e.into());
        }

        guard.enter(SyncState::Committing);
        tracker.log_stage("committing");
        let summary = store.commit().await?;

        let report = SyncReport {
            cycle_id: tracker.cycle_id().to_string(),
            watermark,
            fetched: items.len(),
            degraded,
            authors_created: resolver.created(),
            commits_inserted: summary.commits_inserted,
            commits_updated: summary.commits_updated,
        };
        info!("Sync cycle {}: {}", report.cycle_id, report);
        Ok(report)
    }
}

async fn stage_records(
    store: &mut RecordStore,
    resolver: &mut IdentityResolver,
    records: Vec<RawCommit>,
) -> Result<(), StoreError> {
    for raw in records {
        let author = resolver
            .resolve(store, &raw.author_name, &raw.author_email)
            .await?;

        store
            .upsert_commit(Commit {
                sha: raw.sha,
                message: raw.message,
                url: raw.url,
                date: raw.date,
                author,
            })
            .await?;
    }
    Ok(())
}
