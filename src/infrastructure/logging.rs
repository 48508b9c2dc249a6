use std::io;
use std::str::FromStr;
use std::time::Instant;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// 日志配置
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    pub include_file_location: bool,
    pub include_thread_names: bool,
    pub include_span_events: bool,
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            include_file_location: false,
            include_thread_names: false,
            include_span_events: false,
            filter: None,
        }
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// 人类可读的格式
    Pretty,
    /// 紧凑格式
    Compact,
    /// JSON 格式
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("Unsupported log format: {}", other),
        }
    }
}

/// 日志输出目标
#[derive(Debug, Clone)]
pub enum LogOutput {
    /// 标准输出
    Stdout,
    /// 标准错误
    Stderr,
    /// 文件
    File(String),
}

/// 设置日志系统
pub fn setup_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let env_filter = if let Some(filter) = &config.filter {
        EnvFilter::try_new(filter)?
    } else {
        EnvFilter::from_default_env()
            .add_directive(format!("commit_sync={}", config.level).parse()?)
    };

    let fmt_layer = match &config.output {
        LogOutput::Stdout => create_fmt_layer(&config, io::stdout),
        LogOutput::Stderr => create_fmt_layer(&config, io::stderr),
        LogOutput::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            create_fmt_layer(&config, std::sync::Mutex::new(file))
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()?;

    Ok(())
}

fn create_fmt_layer<W>(
    config: &LoggingConfig,
    make_writer: W,
) -> Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>
where
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let mut layer = fmt::layer()
        .with_writer(make_writer)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(config.include_thread_names)
        .with_thread_names(config.include_thread_names);

    if config.include_file_location {
        layer = layer.with_file(true).with_line_number(true);
    }

    if config.include_span_events {
        layer = layer.with_span_events(FmtSpan::FULL);
    }

    match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// 同步周期跟踪
pub struct SyncTracker {
    cycle_id: String,
    start_time: Instant,
}

impl SyncTracker {
    pub fn new(source: &str) -> Self {
        let cycle_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(cycle_id = %cycle_id, source = %source, "sync cycle started");

        Self {
            cycle_id,
            start_time: Instant::now(),
        }
    }

    pub fn cycle_id(&self) -> &str {
        &self.cycle_id
    }

    pub fn log_stage(&self, stage: &str) {
        tracing::debug!(cycle_id = %self.cycle_id, stage = stage, "sync stage");
    }

    pub fn log_error(&self, stage: &str, error: &dyn std::error::Error) {
        tracing::error!(
            cycle_id = %self.cycle_id,
            stage = stage,
            error = %error,
            "sync cycle failed"
        );
    }

    pub fn complete(self, records: usize) {
        tracing::info!(
            cycle_id = %self.cycle_id,
            duration_ms = self.start_time.elapsed().as_millis() as u64,
            records = records,
            "sync cycle completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Compact);
        assert!(matches!(config.output, LogOutput::Stderr));
        assert!(!config.include_thread_names);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_sync_tracker_creation() {
        let tracker = SyncTracker::new("test");
        assert!(!tracker.cycle_id().is_empty());
        tracker.complete(0);
    }
}
