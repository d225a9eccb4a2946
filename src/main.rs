//! 课程 Bot 入口
//!
//! 启动顺序：日志 → 配置 → 课程目录（失败即退出）→ 进度存储（文件损坏即退出）→
//! 后台自动保存与考试会话清理 → 控制台传输；退出时最后 flush 一次。
//!
//! 可选参数：配置文件路径（默认查找 config/default.toml）。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use course_bot::config::load_config;
use course_bot::core::{
    join_background, run_with_graceful_shutdown, ProgressFlushCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
use course_bot::engine::ExamEngine;
use course_bot::gateway::console::run_console;
use course_bot::{observability, AutosaveScheduler, Catalog, CourseBot, ProgressStore};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;

    let catalog = Catalog::load(&config.course.catalog_path).context("Failed to load course catalog")?;
    catalog
        .check_languages(&config.course.languages)
        .context("Course catalog does not cover configured languages")?;
    let catalog = Arc::new(catalog);
    let store = Arc::new(
        ProgressStore::load(&config.storage.progress_path)
            .await
            .context("Failed to load progress file")?,
    );

    let shutdown = Arc::new(ShutdownManager::new());
    let autosave = AutosaveScheduler::from_config(Arc::clone(&store), &config.storage)
        .spawn(shutdown.token());

    let bot = Arc::new(CourseBot::new(catalog, Arc::clone(&store), &config));
    let cleanup_every = Duration::from_secs(config.exam.cleanup_interval_secs.max(1));
    let session_cleanup = spawn_session_cleanup(Arc::clone(bot.exam()), cleanup_every, shutdown.token());

    let mut coordinator = ShutdownCoordinator::new().with_timeout(config.shutdown.cleanup_timeout_secs);
    coordinator.register(ProgressFlushCleanup::new(Arc::clone(&store)));

    let console_shutdown = Arc::clone(&shutdown);
    let app = async move {
        if let Err(e) = run_console(bot, console_shutdown.token()).await {
            tracing::error!("Console transport failed: {}", e);
        }
    };

    run_with_graceful_shutdown(Arc::clone(&shutdown), app, move || async move {
        if !shutdown.is_shutdown() {
            shutdown.shutdown(ShutdownReason::InputClosed);
        }
        join_background("Autosave", autosave).await;
        join_background("ExamSessionCleanup", session_cleanup).await;
        coordinator.run_cleanup().await;
    })
    .await;

    Ok(())
}

/// 定期清除闲置的考试会话
fn spawn_session_cleanup(
    exam: Arc<ExamEngine>,
    every: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(every);
        timer.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    let expired = exam.cleanup_expired().await;
                    if expired > 0 {
                        tracing::info!("Cleaned up {} idle exam sessions", expired);
                    }
                }
            }
        }
    })
}
