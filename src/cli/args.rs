use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::storage::{CommitFilter, SectionKey, SortKey};

#[derive(Parser, Debug, Default)]
#[command(
    name = "commit-sync",
    version,
    about = "同步远端提交记录到本地缓存，并以可过滤、可分组的视图展示",
    long_about = "commit-sync 从 GitHub commits 接口增量拉取提交，按作者名去重后写入本地 SQLite 缓存，支持过滤预设、排序、按作者分组，以及持续同步时输出视图差异。"
)]
pub struct Args {
    /// TOML 配置文件路径
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// 数据库连接串（如 sqlite://commits.db，或 memory）
    #[arg(long, value_name = "URL")]
    pub database: Option<String>,

    /// 远端仓库（owner/name）
    #[arg(short = 'r', long, value_name = "OWNER/NAME")]
    pub repo: Option<String>,

    /// API 根地址
    #[arg(long = "api-base", value_name = "URL")]
    pub api_base: Option<String>,

    /// 日志级别（trace, debug, info, warn, error）
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// 日志格式（pretty, compact, json）
    #[arg(long = "log-format", value_name = "FORMAT")]
    pub log_format: Option<String>,

    /// 同名作者邮箱不同时的处理方式（keep-existing, prefer-incoming-email）
    #[arg(long = "author-policy", value_name = "POLICY")]
    pub author_policy: Option<String>,

    /// 调试模式
    #[arg(short = 'd', long, default_value_t = false)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 执行一次同步并输出结果
    Sync,
    /// 输出当前视图
    List(ViewArgs),
    /// 查看单个提交
    Show {
        /// 提交 sha
        sha: String,
    },
    /// 删除单个提交并输出视图差异
    Delete {
        /// 提交 sha
        sha: String,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// 输出存储统计
    Stats,
    /// 定时同步，并在每次变更后输出视图差异（Ctrl-C 退出）
    Watch {
        /// 同步间隔（秒）
        #[arg(short = 'i', long, default_value_t = 60)]
        interval: u64,
        #[command(flatten)]
        view: ViewArgs,
    },
}

/// 过滤预设
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterPreset {
    #[default]
    All,
    /// 提交信息包含 "fix"
    Fixes,
    /// 排除 "Merge pull request" 开头的提交
    IgnorePullRequests,
    /// 最近 12 小时
    Recent,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOption {
    #[default]
    Author,
    Date,
}

/// 视图参数
#[derive(clap::Args, Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewArgs {
    /// 过滤预设
    #[arg(short = 'f', long, value_enum, default_value_t = FilterPreset::All)]
    pub filter: FilterPreset,

    /// 只看指定作者
    #[arg(short = 'a', long, value_name = "NAME")]
    pub author: Option<String>,

    /// 排序方式
    #[arg(short = 's', long, value_enum, default_value_t = SortOption::Author)]
    pub sort: SortOption,

    /// 按作者分组
    #[arg(long, default_value_t = false)]
    pub sections: bool,
}

impl ViewArgs {
    /// 组合预设与作者条件
    pub fn filter(&self, now: DateTime<Utc>) -> Option<CommitFilter> {
        let preset = match self.filter {
            FilterPreset::All => None,
            FilterPreset::Fixes => Some(CommitFilter::fixes()),
            FilterPreset::IgnorePullRequests => Some(CommitFilter::ignore_pull_requests()),
            FilterPreset::Recent => Some(CommitFilter::recent(now)),
        };
        let author = self.author.clone().map(CommitFilter::by_author);

        match (preset, author) {
            (Some(preset), Some(author)) => Some(CommitFilter::All(vec![preset, author])),
            (preset, author) => preset.or(author),
        }
    }

    pub fn sort_key(&self) -> SortKey {
        match self.sort {
            SortOption::Author => SortKey::AuthorName,
            SortOption::Date => SortKey::DateDescending,
        }
    }

    pub fn section_key(&self) -> Option<SectionKey> {
        self.sections.then_some(SectionKey::AuthorName)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_command() {
        let args = Args::parse_from([
            "commit-sync",
            "--repo",
            "apple/swift",
            "list",
            "--filter",
            "ignore-pull-requests",
            "--sort",
            "date",
            "--sections",
        ]);

        assert_eq!(args.repo.as_deref(), Some("apple/swift"));
        match args.command {
            Some(Command::List(view)) => {
                assert_eq!(view.filter, FilterPreset::IgnorePullRequests);
                assert_eq!(view.sort_key(), SortKey::DateDescending);
                assert_eq!(view.section_key(), Some(SectionKey::AuthorName));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_watch_defaults() {
        let args = Args::parse_from(["commit-sync", "watch"]);
        assert_eq!(
            args.command,
            Some(Command::Watch {
                interval: 60,
                view: ViewArgs::default()
            })
        );
    }

    #[test]
    fn test_view_filter_combination() {
        let now = Utc::now();
        let view = ViewArgs {
            filter: FilterPreset::Fixes,
            author: Some("Ann".to_string()),
            ..ViewArgs::default()
        };
        assert_eq!(
            view.filter(now),
            Some(CommitFilter::All(vec![
                CommitFilter::fixes(),
                CommitFilter::by_author("Ann")
            ]))
        );
        assert_eq!(ViewArgs::default().filter(now), None);
    }
}
