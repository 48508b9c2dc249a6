use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::infrastructure::error::FetchError;

/// 网络客户端配置
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("commit-sync/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 10,
        }
    }
}

/// 网络客户端管理器
pub struct NetworkManager {
    client: Client,
}

impl NetworkManager {
    pub fn new(config: NetworkConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| FetchError::network(format!("Failed to create HTTP client: {}", e), None))?;

        Ok(Self { client })
    }

    /// 单次 GET 请求并解析为 JSON，非 2xx 视为失败
    pub async fn get_json(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, FetchError> {
        debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::network(format!("Request failed: {}", e), Some(url.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
