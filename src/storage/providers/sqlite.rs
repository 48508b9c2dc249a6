use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, error, info};

use super::{ChangeSet, StorageProvider, StorageStats, StorageType};
use crate::infrastructure::error::StoreError;
use crate::storage::models::{
    decode_timestamp, encode_timestamp, Author, AuthorRef, Commit, CommitFilter, CommitQuery,
    CommitRecord, SortKey,
};

const SELECT_COMMIT_RECORD: &str = r#"
    SELECT c.sha, c.message, c.url, c.date,
           a.id AS author_id, a.name AS author_name, a.email AS author_email
    FROM commits c
    JOIN authors a ON a.id = c.author_id
"#;

/// SQLite 存储提供商
pub struct SQLiteProvider {
    pool: SqlitePool,
}

impl SQLiteProvider {
    /// 创建新的 SQLite 提供商
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(connection_string)?
            .create_if_missing(true)
            .foreign_keys(true);

        // 内存库每个连接各自独立，只能用单连接
        let pool = if connection_string.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(options)
                .await?
        };

        let provider = Self { pool };

        // 创建表结构
        provider.create_tables().await?;

        Ok(provider)
    }

    /// 创建数据库表
    async fn create_tables(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS authors (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS commits (
                sha TEXT PRIMARY KEY,
                message TEXT NOT NULL,
                url TEXT NOT NULL,
                date TEXT NOT NULL,
                author_id TEXT NOT NULL REFERENCES authors (id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_authors_name ON authors (name)",
            "CREATE INDEX IF NOT EXISTS idx_commits_date ON commits (date)",
            "CREATE INDEX IF NOT EXISTS idx_commits_author ON commits (author_id)",
        ];

        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        info!("SQLite tables 'authors' and 'commits' created or verified");
        Ok(())
    }

    /// 构建查询条件
    fn build_where_clause(&self, query: &CommitQuery) -> (String, Vec<String>) {
        let mut params = Vec::new();

        match &query.filter {
            Some(filter) => {
                let condition = Self::build_condition(filter, &mut params);
                (format!("WHERE {}", condition), params)
            }
            None => (String::new(), params),
        }
    }

    fn build_condition(filter: &CommitFilter, params: &mut Vec<String>) -> String {
        match filter {
            // SQLite 的 lower() 只处理 ASCII，大小写无关匹配在取出后按 Unicode 规则过滤
            CommitFilter::MessageContains(_) => "1 = 1".to_string(),
            CommitFilter::MessageNotStartingWith(prefix) => {
                params.push(prefix.clone());
                params.push(prefix.clone());
                "substr(c.message, 1, length(?)) <> ?".to_string()
            }
            CommitFilter::DateAfter(threshold) => {
                params.push(encode_timestamp(threshold));
                "c.date > ?".to_string()
            }
            CommitFilter::AuthorNameEquals(name) => {
                params.push(name.clone());
                "a.name = ?".to_string()
            }
            CommitFilter::All(filters) if filters.is_empty() => "1 = 1".to_string(),
            CommitFilter::All(filters) => {
                let parts: Vec<String> = filters
                    .iter()
                    .map(|f| format!("({})", Self::build_condition(f, params)))
                    .collect();
                parts.join(" AND ")
            }
        }
    }

    /// 构建排序子句
    fn build_order_clause(&self, query: &CommitQuery) -> &'static str {
        match query.sort {
            SortKey::AuthorName => "ORDER BY a.name ASC, c.date DESC, c.sha ASC",
            SortKey::DateDescending => "ORDER BY c.date DESC, c.sha ASC",
        }
    }

    /// 从行数据提取提交记录
    fn extract_record_from_row(&self, row: &SqliteRow) -> Result<CommitRecord, StoreError> {
        let author_id = AuthorRef::parse(&row.try_get::<String, _>("author_id")?)?;
        let date = decode_timestamp(&row.try_get::<String, _>("date")?)?;

        Ok(CommitRecord {
            commit: Commit {
                sha: row.try_get("sha")?,
                message: row.try_get("message")?,
                url: row.try_get("url")?,
                date,
                author: author_id,
            },
            author: Author {
                id: author_id,
                name: row.try_get("author_name")?,
                email: row.try_get("author_email")?,
            },
        })
    }

    fn extract_author_from_row(&self, row: &SqliteRow) -> Result<Author, StoreError> {
        Ok(Author {
            id: AuthorRef::parse(&row.try_get::<String, _>("id")?)?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
        })
    }
}

#[async_trait]
impl StorageProvider for SQLiteProvider {
    fn storage_type(&self) -> StorageType {
        StorageType::SQLite
    }

    async fn find_author_by_name(&self, name: &str) -> Result<Option<Author>, StoreError> {
        let row = sqlx::query("SELECT id, name, email FROM authors WHERE name = ? ORDER BY rowid LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.extract_author_from_row(&row)).transpose()
    }

    async fn find_commit(&self, sha: &str) -> Result<Option<CommitRecord>, StoreError> {
        let select_sql = format!("{} WHERE c.sha = ?", SELECT_COMMIT_RECORD);

        let row = sqlx::query(&select_sql)
            .bind(sha)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.extract_record_from_row(&row)?)),
            None => {
                debug!("Commit {} not found", sha);
                Ok(None)
            }
        }
    }

    async fn latest_commit_date(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let latest: Option<String> = sqlx::query_scalar("SELECT MAX(date) FROM commits")
            .fetch_one(&self.pool)
            .await?;

        latest.as_deref().map(decode_timestamp).transpose()
    }

    async fn query_commits(&self, query: &CommitQuery) -> Result<Vec<CommitRecord>, StoreError> {
        let (where_clause, params) = self.build_where_clause(query);
        let order_clause = self.build_order_clause(query);
        let select_sql = format!("{} {} {}", SELECT_COMMIT_RECORD, where_clause, order_clause);

        let mut sql_query = sqlx::query(&select_sql);
        for param in params {
            sql_query = sql_query.bind(param);
        }

        let rows = sql_query.fetch_all(&self.pool).await?;
        let mut records = Vec::with_capacity(rows.len());

        for row in rows {
            let record = self.extract_record_from_row(&row)?;
            if query.matches(&record) {
                records.push(record);
            }
        }

        debug!("Queried {} commits", records.len());
        Ok(records)
    }

    async fn list_authors(&self) -> Result<Vec<Author>, StoreError> {
        let rows = sqlx::query("SELECT id, name, email FROM authors ORDER BY name ASC, rowid ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| self.extract_author_from_row(row)).collect()
    }

    async fn apply(&mut self, changes: &ChangeSet) -> Result<(), StoreError> {
        // 事务未提交即被丢弃时自动回滚
        let mut tx = self.pool.begin().await?;

        for author in &changes.authors {
            sqlx::query(
                r#"
                INSERT INTO authors (id, name, email) VALUES (?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET name = excluded.name, email = excluded.email
                "#,
            )
            .bind(author.id.to_string())
            .bind(&author.name)
            .bind(&author.email)
            .execute(&mut *tx)
            .await?;
        }

        for commit in &changes.commits {
            sqlx::query(
                r#"
                INSERT INTO commits (sha, message, url, date, author_id) VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (sha) DO UPDATE SET
                    message = excluded.message,
                    url = excluded.url,
                    date = excluded.date,
                    author_id = excluded.author_id
                "#,
            )
            .bind(&commit.sha)
            .bind(&commit.message)
            .bind(&commit.url)
            .bind(encode_timestamp(&commit.date))
            .bind(commit.author.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            "Applied {} authors and {} commits",
            changes.authors.len(),
            changes.commits.len()
        );
        Ok(())
    }

    async fn delete_commit(&mut self, sha: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM commits WHERE sha = ?")
            .bind(sha)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            debug!("Deleted commit {}", sha);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(true),
            Err(e) => {
                error!("SQLite health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn get_storage_stats(&self) -> Result<StorageStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM commits) AS total_commits,
                (SELECT COUNT(*) FROM authors) AS total_authors,
                (SELECT MIN(date) FROM commits) AS oldest_commit,
                (SELECT MAX(date) FROM commits) AS newest_commit
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total_commits: i64 = row.try_get("total_commits")?;
        let total_authors: i64 = row.try_get("total_authors")?;
        let oldest: Option<String> = row.try_get("oldest_commit")?;
        let newest: Option<String> = row.try_get("newest_commit")?;

        Ok(StorageStats {
            total_commits: total_commits as usize,
            total_authors: total_authors as usize,
            oldest_commit: oldest.as_deref().map(decode_timestamp).transpose()?,
            newest_commit: newest.as_deref().map(decode_timestamp).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn create_test_provider() -> SQLiteProvider {
        // Use in-memory database for tests
        SQLiteProvider::new("sqlite::memory:", 1).await.unwrap()
    }

    fn author(name: &str) -> Author {
        Author {
            id: AuthorRef::new(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
        }
    }

    fn commit(sha: &str, message: &str, author: &Author, hour: u32) -> Commit {
        Commit {
            sha: sha.to_string(),
            message: message.to_string(),
            url: format!("https://example.com/{}", sha),
            date: Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap(),
            author: author.id,
        }
    }

    #[tokio::test]
    async fn test_apply_and_find() {
        let mut provider = create_test_provider().await;
        let ann = author("Ann");

        provider
            .apply(&ChangeSet {
                authors: vec![ann.clone()],
                commits: vec![commit("a1", "Fix bug", &ann, 1)],
            })
            .await
            .unwrap();

        let record = provider.find_commit("a1").await.unwrap().unwrap();
        assert_eq!(record.author, ann);
        assert_eq!(record.commit.message, "Fix bug");
        assert_eq!(provider.find_author_by_name("Ann").await.unwrap(), Some(ann));
        assert!(provider.find_commit("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_keeps_sha_unique() {
        let mut provider = create_test_provider().await;
        let ann = author("Ann");

        provider
            .apply(&ChangeSet {
                authors: vec![ann.clone()],
                commits: vec![commit("a1", "first", &ann, 1)],
            })
            .await
            .unwrap();
        provider
            .apply(&ChangeSet {
                authors: vec![],
                commits: vec![commit("a1", "second", &ann, 1)],
            })
            .await
            .unwrap();

        let stats = provider.get_storage_stats().await.unwrap();
        assert_eq!(stats.total_commits, 1);
        let record = provider.find_commit("a1").await.unwrap().unwrap();
        assert_eq!(record.commit.message, "second");
    }

    #[tokio::test]
    async fn test_foreign_key_violation_rolls_back() {
        let mut provider = create_test_provider().await;
        let ann = author("Ann");
        let ghost = author("Ghost");

        let result = provider
            .apply(&ChangeSet {
                authors: vec![ann.clone()],
                commits: vec![commit("a1", "ok", &ann, 1), commit("g1", "orphan", &ghost, 2)],
            })
            .await;
        assert!(result.is_err());

        let stats = provider.get_storage_stats().await.unwrap();
        assert_eq!(stats.total_commits, 0);
        assert_eq!(stats.total_authors, 0);
        assert!(provider.latest_commit_date().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_filters_and_sorting() {
        let mut provider = create_test_provider().await;
        let ann = author("Ann");
        let bob = author("Bob");

        provider
            .apply(&ChangeSet {
                authors: vec![ann.clone(), bob.clone()],
                commits: vec![
                    commit("b1", "Fix bug", &bob, 1),
                    commit("a1", "Add feature", &ann, 2),
                    commit("a2", "fixup typo", &ann, 3),
                    commit("b2", "Merge pull request #7", &bob, 4),
                ],
            })
            .await
            .unwrap();

        let fixes = provider
            .query_commits(&CommitQuery::new(Some(CommitFilter::fixes()), SortKey::DateDescending))
            .await
            .unwrap();
        let shas: Vec<&str> = fixes.iter().map(|r| r.sha()).collect();
        assert_eq!(shas, vec!["a2", "b1"]);

        let no_merges = provider
            .query_commits(&CommitQuery::new(
                Some(CommitFilter::ignore_pull_requests()),
                SortKey::AuthorName,
            ))
            .await
            .unwrap();
        let shas: Vec<&str> = no_merges.iter().map(|r| r.sha()).collect();
        assert_eq!(shas, vec!["a2", "a1", "b1"]);

        let combined = provider
            .query_commits(&CommitQuery::new(
                Some(CommitFilter::All(vec![
                    CommitFilter::by_author("Bob"),
                    CommitFilter::DateAfter(Utc.with_ymd_and_hms(2020, 1, 1, 2, 0, 0).unwrap()),
                ])),
                SortKey::AuthorName,
            ))
            .await
            .unwrap();
        let shas: Vec<&str> = combined.iter().map(|r| r.sha()).collect();
        assert_eq!(shas, vec!["b2"]);
    }

    #[tokio::test]
    async fn test_message_contains_folds_unicode_case() {
        let mut provider = create_test_provider().await;
        let ann = author("Ann");

        provider
            .apply(&ChangeSet {
                authors: vec![ann.clone()],
                commits: vec![
                    commit("u1", "ÉCLAIR fix", &ann, 1),
                    commit("u2", "Straße cleanup", &ann, 2),
                    commit("u3", "unrelated", &ann, 3),
                ],
            })
            .await
            .unwrap();

        let query = |token: &str| {
            CommitQuery::new(
                Some(CommitFilter::MessageContains(token.to_string())),
                SortKey::DateDescending,
            )
        };

        let found = provider.query_commits(&query("éclair")).await.unwrap();
        let shas: Vec<&str> = found.iter().map(|r| r.sha()).collect();
        assert_eq!(shas, vec!["u1"]);

        let found = provider.query_commits(&query("STRASSE")).await.unwrap();
        assert!(found.is_empty());

        let found = provider.query_commits(&query("STRAßE")).await.unwrap();
        let shas: Vec<&str> = found.iter().map(|r| r.sha()).collect();
        assert_eq!(shas, vec!["u2"]);
    }

    #[tokio::test]
    async fn test_corrupt_row_fails_query() {
        let mut provider = create_test_provider().await;
        let ann = author("Ann");

        provider
            .apply(&ChangeSet {
                authors: vec![ann.clone()],
                commits: vec![commit("a1", "one", &ann, 1)],
            })
            .await
            .unwrap();
        sqlx::query("UPDATE commits SET date = 'not-a-date' WHERE sha = 'a1'")
            .execute(&provider.pool)
            .await
            .unwrap();

        assert!(provider.find_commit("a1").await.is_err());
        assert!(provider.query_commits(&CommitQuery::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_and_stats() {
        let mut provider = create_test_provider().await;
        let ann = author("Ann");

        provider
            .apply(&ChangeSet {
                authors: vec![ann.clone()],
                commits: vec![commit("a1", "one", &ann, 1), commit("a2", "two", &ann, 5)],
            })
            .await
            .unwrap();

        assert!(provider.delete_commit("a2").await.unwrap());
        assert!(!provider.delete_commit("a2").await.unwrap());

        let stats = provider.get_storage_stats().await.unwrap();
        assert_eq!(stats.total_commits, 1);
        assert_eq!(stats.total_authors, 1);
        assert_eq!(stats.newest_commit, Some(Utc.with_ymd_and_hms(2020, 1, 1, 1, 0, 0).unwrap()));
        assert!(provider.health_check().await.unwrap());
    }
}
