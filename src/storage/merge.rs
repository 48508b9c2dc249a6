use std::fmt::Debug;

use super::models::Commit;
use crate::infrastructure::error::ConflictError;

/// 同 sha 提交重复写入时的合并策略
pub trait MergePolicy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// `existing` 为本事务已暂存或已提交的版本，`incoming` 为本次写入
    fn merge_commit(&self, existing: &Commit, incoming: Commit) -> Result<Commit, ConflictError>;
}

/// 新值覆盖旧值
#[derive(Debug, Clone, Copy, Default)]
pub struct IncomingWins;

impl MergePolicy for IncomingWins {
    fn name(&self) -> &'static str {
        "incoming-wins"
    }

    fn merge_commit(&self, _existing: &Commit, incoming: Commit) -> Result<Commit, ConflictError> {
        Ok(incoming)
    }
}

/// 字段不一致即拒绝，完全相同的重复写入放行
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectConflicting;

impl MergePolicy for RejectConflicting {
    fn name(&self) -> &'static str {
        "reject-conflicting"
    }

    fn merge_commit(&self, existing: &Commit, incoming: Commit) -> Result<Commit, ConflictError> {
        let mut differing = Vec::new();
        if existing.message != incoming.message {
            differing.push("message");
        }
        if existing.url != incoming.url {
            differing.push("url");
        }
        if existing.date != incoming.date {
            differing.push("date");
        }
        if existing.author != incoming.author {
            differing.push("author");
        }

        if differing.is_empty() {
            Ok(incoming)
        } else {
            Err(ConflictError::new(
                incoming.sha,
                format!("conflicting fields: {}", differing.join(", ")),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::AuthorRef;
    use chrono::Utc;

    fn commit(message: &str) -> Commit {
        Commit {
            sha: "a1".to_string(),
            message: message.to_string(),
            url: "https://example.com/a1".to_string(),
            date: Utc::now(),
            author: AuthorRef::new(),
        }
    }

    #[test]
    fn test_incoming_wins() {
        let existing = commit("old");
        let incoming = Commit {
            message: "new".to_string(),
            ..existing.clone()
        };
        let merged = IncomingWins.merge_commit(&existing, incoming).unwrap();
        assert_eq!(merged.message, "new");
    }

    #[test]
    fn test_reject_conflicting() {
        let existing = commit("old");
        let same = existing.clone();
        assert!(RejectConflicting.merge_commit(&existing, same).is_ok());

        let incoming = Commit {
            message: "new".to_string(),
            ..existing.clone()
        };
        let err = RejectConflicting.merge_commit(&existing, incoming).unwrap_err();
        assert_eq!(err.sha, "a1");
        assert!(err.reason.contains("message"));
    }
}
