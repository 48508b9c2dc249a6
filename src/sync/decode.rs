use chrono::{DateTime, DurationRound, Utc};
use serde_json::Value;
use tracing::warn;

use crate::infrastructure::error::DecodeError;

const SHA_POINTER: &str = "/sha";
const MESSAGE_POINTER: &str = "/commit/message";
const URL_POINTER: &str = "/html_url";
const AUTHOR_NAME_POINTER: &str = "/commit/committer/name";
const AUTHOR_EMAIL_POINTER: &str = "/commit/committer/email";
const DATE_POINTER: &str = "/commit/committer/date";

/// 远端单条提交的宽松解码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommit {
    pub sha: String,
    pub message: String,
    pub url: String,
    pub author_name: String,
    pub author_email: String,
    pub date: DateTime<Utc>,
    /// 用默认值替代的字段
    pub issues: Vec<DecodeError>,
}

impl RawCommit {
    /// 缺失或类型不符的文本字段取空串，日期缺失或无法解析取 `now`
    pub fn from_json(value: &Value, now: DateTime<Utc>) -> Self {
        let mut issues = Vec::new();
        let mut text = |pointer: &str| match value.pointer(pointer).and_then(Value::as_str) {
            Some(s) => s.to_string(),
            None => {
                issues.push(DecodeError::MissingField {
                    field: field_name(pointer),
                });
                String::new()
            }
        };

        let sha = text(SHA_POINTER);
        let message = text(MESSAGE_POINTER);
        let url = text(URL_POINTER);
        let author_name = text(AUTHOR_NAME_POINTER);
        let author_email = text(AUTHOR_EMAIL_POINTER);

        let date = match value.pointer(DATE_POINTER).and_then(Value::as_str) {
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(parsed) => parsed.with_timezone(&Utc),
                Err(_) => {
                    issues.push(DecodeError::InvalidDate {
                        value: raw.to_string(),
                    });
                    now
                }
            },
            None => {
                issues.push(DecodeError::MissingField {
                    field: field_name(DATE_POINTER),
                });
                now
            }
        };

        let raw = Self {
            sha,
            message,
            url,
            author_name,
            author_email,
            date: truncate_to_millis(date),
            issues,
        };

        if !raw.issues.is_empty() {
            let details: Vec<String> = raw.issues.iter().map(|e| e.to_string()).collect();
            warn!(
                "Commit `{}` decoded with defaults: {}",
                raw.sha,
                details.join("; ")
            );
        }

        raw
    }

    pub fn is_degraded(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// 存储层只保留毫秒
fn truncate_to_millis(date: DateTime<Utc>) -> DateTime<Utc> {
    date.duration_trunc(chrono::Duration::milliseconds(1))
        .unwrap_or(date)
}

fn field_name(pointer: &str) -> String {
    pointer.trim_start_matches('/').replace('/', ".")
}
