use chrono::Utc;
use clap::Parser;
use commit_sync::cli::args::{Args, Command, ViewArgs};
use commit_sync::config::Config;
use commit_sync::infrastructure::{setup_logging, NetworkManager};
use commit_sync::storage::{open_provider, CommitRecord, CommitRef, RecordStore, SharedStore};
use commit_sync::sync::{GithubCommitSource, SyncEngine};
use commit_sync::view::{wait_for_change, QueryView, ViewDiff};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

fn build_engine(config: &Config) -> anyhow::Result<SyncEngine> {
    let network = NetworkManager::new(config.network_config())?;
    let source = GithubCommitSource::new(network, &config.api_base, &config.owner, &config.repo)?
        .with_per_page(config.per_page);
    debug!("Syncing from {}", source.endpoint());

    Ok(SyncEngine::new(Arc::new(source), config.sync_config()))
}

fn build_view(args: &ViewArgs) -> QueryView {
    let mut view = QueryView::new().with_sort(args.sort_key());
    view.set_filter(args.filter(Utc::now()));
    view.set_section_key(args.section_key());
    view
}

fn short_sha(sha: &str) -> String {
    sha.chars().take(8).collect()
}

fn print_row(record: &CommitRecord) {
    println!(
        "  {}  {}  ({})",
        short_sha(record.sha()),
        record.headline(),
        record.subtitle()
    );
}

fn print_view(view: &QueryView) {
    if view.is_empty() {
        println!("没有匹配的提交");
        return;
    }

    for section in view.sections() {
        if let Some(title) = &section.title {
            println!("{} ({})", title, section.rows.len());
        }
        for record in &section.rows {
            print_row(record);
        }
    }
    println!("\n📊 共 {} 条提交", view.len());
}

fn print_diff(diff: &ViewDiff) {
    if diff.is_empty() {
        println!("视图无变化");
    } else {
        print!("{}", diff);
    }
}

async fn handle_sync(config: &Config, store: &SharedStore) -> anyhow::Result<()> {
    let engine = build_engine(config)?;

    match engine.run_cycle(store).await {
        Ok(report) => {
            println!("✓ 同步完成: {}", report);
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ 同步失败，本地数据未改动: {}", e);
            Err(e.into())
        }
    }
}

async fn handle_list(store: &SharedStore, args: &ViewArgs) -> anyhow::Result<()> {
    let mut view = build_view(args);
    view.refresh(&*store.read().await).await?;
    print_view(&view);
    Ok(())
}

async fn handle_show(store: &SharedStore, sha: &str) -> anyhow::Result<()> {
    let store = store.read().await;
    match store.find_commit(&CommitRef::from(sha)).await? {
        Some(record) => {
            println!("{}", record.commit.sha);
            println!("{}", record.subtitle());
            println!("{}", record.commit.url);
            println!("\n{}", record.commit.message);
        }
        None => {
            println!("未找到提交 {}", sha);
        }
    }
    Ok(())
}

async fn handle_delete(store: &SharedStore, sha: &str, args: &ViewArgs) -> anyhow::Result<()> {
    let mut view = build_view(args);
    view.refresh(&*store.read().await).await?;

    store.write().await.delete_commit(&CommitRef::from(sha)).await?;
    println!("✓ 已删除提交 {}", sha);

    let diff = view.refresh(&*store.read().await).await?;
    print_diff(&diff);
    Ok(())
}

async fn handle_stats(store: &SharedStore) -> anyhow::Result<()> {
    let store = store.read().await;
    let stats = store.stats().await?;

    println!("存储类型: {:?}", store.storage_type());
    println!("提交数: {}", stats.total_commits);
    println!("作者数: {}", stats.total_authors);
    if let (Some(oldest), Some(newest)) = (stats.oldest_commit, stats.newest_commit) {
        println!("时间范围: {} ~ {}", oldest, newest);
    }
    Ok(())
}

async fn handle_watch(
    config: &Config,
    store: &SharedStore,
    interval: u64,
    args: &ViewArgs,
) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    let mut events = store.read().await.subscribe();

    let mut view = build_view(args);
    view.refresh(&*store.read().await).await?;
    print_view(&view);

    let sync_task = {
        let store = store.clone();
        let period = Duration::from_secs(interval.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match engine.run_cycle(&store).await {
                    Ok(report) => info!("Background sync finished: {}", report),
                    Err(e) if e.is_retryable() => {
                        eprintln!("⚠ 同步失败，将在下个周期重试: {}", e)
                    }
                    Err(e) => eprintln!("❌ 同步失败 ({:?}): {}", e.severity(), e),
                }
            }
        })
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                println!("\n停止同步");
                break;
            }
            notice = wait_for_change(&mut events) => {
                if notice.is_none() {
                    warn!("Store event channel closed");
                    break;
                }
                // 相对时间过滤条件随刷新更新
                view.set_filter(args.filter(Utc::now()));
                let diff = view.refresh(&*store.read().await).await?;
                if !diff.is_empty() {
                    println!("--- {} ---", Utc::now().format("%Y-%m-%d %H:%M:%S"));
                    print_diff(&diff);
                }
            }
        }
    }

    sync_task.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;
    setup_logging(config.logging_config()?)?;

    let provider = open_provider(&config.storage_config()).await?;
    let store: SharedStore = RecordStore::new(provider).into_shared();

    if config.debug {
        println!("数据库: {}", config.database_url);
        println!("仓库: {}/{}", config.owner, config.repo);
    }

    match args.command.clone().unwrap_or(Command::Sync) {
        Command::Sync => handle_sync(&config, &store).await?,
        Command::List(view) => handle_list(&store, &view).await?,
        Command::Show { sha } => handle_show(&store, &sha).await?,
        Command::Delete { sha, view } => handle_delete(&store, &sha, &view).await?,
        Command::Stats => handle_stats(&store).await?,
        Command::Watch { interval, view } => handle_watch(&config, &store, interval, &view).await?,
    }

    Ok(())
}
