use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::infrastructure::error::StoreError;
use crate::storage::{Author, AuthorRef, RecordStore};

/// 已存在作者遇到不同邮箱时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorMergePolicy {
    /// 保留已存储的邮箱
    #[default]
    KeepExisting,
    /// 非空且不同的新邮箱覆盖旧值
    PreferIncomingEmail,
}

impl FromStr for AuthorMergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keep-existing" => Ok(AuthorMergePolicy::KeepExisting),
            "prefer-incoming-email" => Ok(AuthorMergePolicy::PreferIncomingEmail),
            other => Err(format!("Unknown author policy: {}", other)),
        }
    }
}

impl fmt::Display for AuthorMergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorMergePolicy::KeepExisting => f.write_str("keep-existing"),
            AuthorMergePolicy::PreferIncomingEmail => f.write_str("prefer-incoming-email"),
        }
    }
}

/// 按作者名解析身份，一个同步周期一个实例
#[derive(Debug, Default)]
pub struct IdentityResolver {
    policy: AuthorMergePolicy,
    cache: HashMap<String, AuthorRef>,
    created: usize,
}

impl IdentityResolver {
    pub fn new(policy: AuthorMergePolicy) -> Self {
        Self {
            policy,
            cache: HashMap::new(),
            created: 0,
        }
    }

    /// 本批次新建的作者数
    pub fn created(&self) -> usize {
        self.created
    }

    pub async fn resolve(
        &mut self,
        store: &mut RecordStore,
        name: &str,
        email: &str,
    ) -> Result<AuthorRef, StoreError> {
        if let Some(id) = self.cache.get(name) {
            return Ok(*id);
        }

        let id = match store.find_author_by_name(name).await? {
            Some(existing) => {
                self.apply_policy(store, existing.clone(), email);
                existing.id
            }
            None => {
                self.created += 1;
                store.insert_author(name, email)
            }
        };

        self.cache.insert(name.to_string(), id);
        Ok(id)
    }

    fn apply_policy(&self, store: &mut RecordStore, existing: Author, email: &str) {
        match self.policy {
            AuthorMergePolicy::KeepExisting => {
                if existing.email != email {
                    debug!(
                        "Keeping stored email for author {} (incoming: {})",
                        existing.name, email
                    );
                }
            }
            AuthorMergePolicy::PreferIncomingEmail => {
                if !email.is_empty() && existing.email != email {
                    debug!("Updating email for author {}", existing.name);
                    store.stage_author(Author {
                        email: email.to_string(),
                        ..existing
                    });
                }
            }
        }
    }
}
