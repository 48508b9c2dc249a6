use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

use crate::infrastructure::error::StoreError;

/// 作者引用（暂存阶段即分配，提交前即可被提交记录引用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorRef(Uuid);

impl AuthorRef {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        Ok(Self(Uuid::parse_str(value)?))
    }
}

impl Default for AuthorRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuthorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 提交引用，即 sha
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitRef(String);

impl CommitRef {
    pub fn new(sha: impl Into<String>) -> Self {
        Self(sha.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommitRef {
    fn from(sha: &str) -> Self {
        Self::new(sha)
    }
}

/// 作者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: AuthorRef,
    pub name: String,
    pub email: String,
}

/// 提交记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub url: String,
    pub date: DateTime<Utc>,
    pub author: AuthorRef,
}

impl Commit {
    pub fn commit_ref(&self) -> CommitRef {
        CommitRef::new(self.sha.clone())
    }
}

/// 查询结果行：提交及其作者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub commit: Commit,
    pub author: Author,
}

impl CommitRecord {
    pub fn sha(&self) -> &str {
        &self.commit.sha
    }

    pub fn commit_ref(&self) -> CommitRef {
        self.commit.commit_ref()
    }

    /// 详情副标题，例如 "By Ann on 2020-01-01 00:00:00 UTC"
    pub fn subtitle(&self) -> String {
        format!("By {} on {}", self.author.name, self.commit.date)
    }

    /// 提交信息首行
    pub fn headline(&self) -> &str {
        self.commit.message.lines().next().unwrap_or("")
    }
}

/// 提交过滤条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitFilter {
    /// 提交信息包含（忽略大小写）
    MessageContains(String),
    /// 提交信息不以此前缀开头
    MessageNotStartingWith(String),
    /// 日期晚于
    DateAfter(DateTime<Utc>),
    /// 作者名精确匹配
    AuthorNameEquals(String),
    /// 同时满足
    All(Vec<CommitFilter>),
}

impl CommitFilter {
    pub const MERGE_PULL_REQUEST_PREFIX: &'static str = "Merge pull request";
    pub const RECENT_WINDOW_HOURS: i64 = 12;

    /// 只看修复
    pub fn fixes() -> Self {
        CommitFilter::MessageContains("fix".to_string())
    }

    /// 忽略合并 PR 的提交
    pub fn ignore_pull_requests() -> Self {
        CommitFilter::MessageNotStartingWith(Self::MERGE_PULL_REQUEST_PREFIX.to_string())
    }

    /// 最近 12 小时
    pub fn recent(now: DateTime<Utc>) -> Self {
        CommitFilter::DateAfter(now - Duration::hours(Self::RECENT_WINDOW_HOURS))
    }

    pub fn by_author(name: impl Into<String>) -> Self {
        CommitFilter::AuthorNameEquals(name.into())
    }

    pub fn matches(&self, record: &CommitRecord) -> bool {
        match self {
            CommitFilter::MessageContains(token) => record
                .commit
                .message
                .to_lowercase()
                .contains(&token.to_lowercase()),
            CommitFilter::MessageNotStartingWith(prefix) => {
                !record.commit.message.starts_with(prefix.as_str())
            }
            CommitFilter::DateAfter(threshold) => record.commit.date > *threshold,
            CommitFilter::AuthorNameEquals(name) => record.author.name == *name,
            CommitFilter::All(filters) => filters.iter().all(|f| f.matches(record)),
        }
    }
}

/// 排序字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortKey {
    /// 作者名升序，其次日期降序
    #[default]
    AuthorName,
    /// 日期降序
    DateDescending,
}

impl SortKey {
    pub fn compare(&self, a: &CommitRecord, b: &CommitRecord) -> Ordering {
        let by_date = || {
            b.commit
                .date
                .cmp(&a.commit.date)
                .then_with(|| a.commit.sha.cmp(&b.commit.sha))
        };

        match self {
            SortKey::AuthorName => a.author.name.cmp(&b.author.name).then_with(by_date),
            SortKey::DateDescending => by_date(),
        }
    }
}

/// 分组字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionKey {
    AuthorName,
}

impl SectionKey {
    pub fn label(&self, record: &CommitRecord) -> String {
        match self {
            SectionKey::AuthorName => record.author.name.clone(),
        }
    }
}

/// 查询条件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitQuery {
    pub filter: Option<CommitFilter>,
    pub sort: SortKey,
}

impl CommitQuery {
    pub fn new(filter: Option<CommitFilter>, sort: SortKey) -> Self {
        Self { filter, sort }
    }

    pub fn matches(&self, record: &CommitRecord) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(record))
    }
}

/// 一次提交写入的变更统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub commits_inserted: usize,
    pub commits_updated: usize,
    pub authors_inserted: usize,
    pub authors_updated: usize,
}

impl CommitSummary {
    pub fn is_empty(&self) -> bool {
        self.commits_inserted == 0
            && self.commits_updated == 0
            && self.authors_inserted == 0
            && self.authors_updated == 0
    }
}

/// 存储层变更事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Committed(CommitSummary),
    Deleted(CommitRef),
}

/// 存储层日期统一编码，毫秒精度，按字典序即按时间排序
pub fn encode_timestamp(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn decode_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(sha: &str, message: &str, author: &str, hour: u32) -> CommitRecord {
        let author = Author {
            id: AuthorRef::new(),
            name: author.to_string(),
            email: format!("{}@example.com", author.to_lowercase()),
        };
        CommitRecord {
            commit: Commit {
                sha: sha.to_string(),
                message: message.to_string(),
                url: format!("https://example.com/{}", sha),
                date: Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap(),
                author: author.id,
            },
            author,
        }
    }

    #[test]
    fn test_message_contains_is_case_insensitive() {
        let filter = CommitFilter::fixes();
        assert!(filter.matches(&record("a", "Fix bug", "Ann", 0)));
        assert!(filter.matches(&record("b", "fixup typo", "Ann", 0)));
        assert!(!filter.matches(&record("c", "Add feature", "Ann", 0)));
    }

    #[test]
    fn test_ignore_pull_requests() {
        let filter = CommitFilter::ignore_pull_requests();
        assert!(!filter.matches(&record("a", "Merge pull request #1 from x/y", "Ann", 0)));
        assert!(filter.matches(&record("b", "merge pull request lowercase", "Ann", 0)));
    }

    #[test]
    fn test_recent_and_combined_filters() {
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 20, 0, 0).unwrap();
        let filter = CommitFilter::All(vec![CommitFilter::recent(now), CommitFilter::by_author("Bob")]);

        assert!(filter.matches(&record("a", "x", "Bob", 9)));
        assert!(!filter.matches(&record("b", "x", "Bob", 8)));
        assert!(!filter.matches(&record("c", "x", "Ann", 9)));
        assert!(CommitFilter::All(vec![]).matches(&record("d", "x", "Ann", 0)));
    }

    #[test]
    fn test_sort_keys() {
        let a = record("a", "x", "Bob", 1);
        let b = record("b", "x", "Ann", 2);
        let c = record("c", "x", "Bob", 3);

        let mut rows = vec![a.clone(), b.clone(), c.clone()];
        rows.sort_by(|x, y| SortKey::AuthorName.compare(x, y));
        let shas: Vec<&str> = rows.iter().map(|r| r.sha()).collect();
        assert_eq!(shas, vec!["b", "c", "a"]);

        rows.sort_by(|x, y| SortKey::DateDescending.compare(x, y));
        let shas: Vec<&str> = rows.iter().map(|r| r.sha()).collect();
        assert_eq!(shas, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_timestamp_encoding_orders_lexicographically() {
        let early = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let late = early + Duration::milliseconds(1500);
        assert_eq!(encode_timestamp(&early), "2020-01-01T00:00:00.000Z");
        assert!(encode_timestamp(&early) < encode_timestamp(&late));
        assert_eq!(decode_timestamp(&encode_timestamp(&late)).unwrap(), late);
    }

    #[test]
    fn test_subtitle() {
        let r = record("a", "Fix bug\n\nlong body", "Ann", 0);
        assert_eq!(r.subtitle(), "By Ann on 2020-01-01 00:00:00 UTC");
        assert_eq!(r.headline(), "Fix bug");
    }
}
