use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::infrastructure::error::FetchError;
use crate::infrastructure::network::NetworkManager;

/// 每页条数，远端上限
pub const PER_PAGE: u32 = 100;

/// 远端提交来源
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// 用于日志的来源描述
    fn describe(&self) -> String;

    /// 拉取 `since` 之后的提交，返回未解码的 JSON 数组元素
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<Value>, FetchError>;
}

/// GitHub REST commits 接口
pub struct GithubCommitSource {
    network: NetworkManager,
    endpoint: Url,
    per_page: u32,
}

impl GithubCommitSource {
    pub fn new(
        network: NetworkManager,
        api_base: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Self, FetchError> {
        if owner.is_empty() || repo.is_empty() {
            return Err(FetchError::InvalidEndpoint {
                message: "owner and repo must not be empty".to_string(),
            });
        }

        let mut endpoint = Url::parse(api_base)?;
        endpoint
            .path_segments_mut()
            .map_err(|_| FetchError::InvalidEndpoint {
                message: format!("{} cannot be used as a base URL", api_base),
            })?
            .pop_if_empty()
            .extend(["repos", owner, repo, "commits"]);

        Ok(Self {
            network,
            endpoint,
            per_page: PER_PAGE,
        })
    }

    /// 每页条数，限制在 1..=100
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, PER_PAGE);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// `since` 参数取整到秒
pub fn format_since(since: DateTime<Utc>) -> String {
    since.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl CommitSource for GithubCommitSource {
    fn describe(&self) -> String {
        self.endpoint.to_string()
    }

    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<Value>, FetchError> {
        let query = [
            ("per_page", self.per_page.to_string()),
            ("since", format_since(since)),
        ];

        debug!("Fetching commits from {} since {}", self.endpoint, query[1].1);
        let payload = self.network.get_json(self.endpoint.clone(), &query).await?;

        match payload {
            Value::Array(items) => {
                info!("Fetched {} commits from {}", items.len(), self.endpoint);
                Ok(items)
            }
            other => Err(FetchError::payload(format!(
                "expected a JSON array of commits, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::NetworkConfig;
    use chrono::TimeZone;

    fn network() -> NetworkManager {
        NetworkManager::new(NetworkConfig::default()).unwrap()
    }

    #[test]
    fn test_endpoint_construction() {
        let source = GithubCommitSource::new(network(), "https://api.github.com", "apple", "swift").unwrap();
        assert_eq!(
            source.endpoint().as_str(),
            "https://api.github.com/repos/apple/swift/commits"
        );

        let source = GithubCommitSource::new(network(), "http://localhost:8080/api/", "o", "r").unwrap();
        assert_eq!(source.endpoint().as_str(), "http://localhost:8080/api/repos/o/r/commits");
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(GithubCommitSource::new(network(), "not a url", "o", "r").is_err());
        assert!(matches!(
            GithubCommitSource::new(network(), "https://api.github.com", "", "r"),
            Err(FetchError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_format_since_drops_subseconds() {
        let since = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 1).unwrap() + chrono::Duration::milliseconds(250);
        assert_eq!(format_since(since), "2020-01-01T00:00:01Z");
    }
}
