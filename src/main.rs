use clap::Parser;
use futures::StreamExt;
use ghupload_lib::cli::{self, Cli, ConsoleRenderer, FsDisposer};
use ghupload_lib::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use ghupload_lib::{GitHubClient, LogNotifier, NotifyFilter, UploadEngine};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

/// 初始化日志系统；返回的 guard 需要持有到进程结束
fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(config.tracing_level().into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    if !config.enabled {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
        return None;
    }

    let log_dir = get_log_dir();
    match SizeRotatingWriter::new(&log_dir, config.max_size_mb) {
        Ok(file_writer) => {
            let (writer, guard) = tracing_appender::non_blocking(file_writer);
            // 文件日志层
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            // 控制台层紧跟过滤器，三个分支中的类型保持一致
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
            Some(guard)
        }
        Err(e) => {
            // 文件日志创建失败，只输出到控制台
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
            tracing::warn!("无法创建日志文件 {}: {}", log_dir.display(), e);
            None
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let file = cli.resolve()?;
    let _guard = init_logging(&file.log);

    let config = file.upload;
    config.validate()?;
    let token = cli.token()?;

    let remote = GitHubClient::new(
        &config.api_base,
        &token,
        &config.owner,
        &config.repo,
        &config.branch,
    )?;
    let disposer = FsDisposer::in_data_dir(config.disposal);
    let engine = UploadEngine::new(config, Arc::new(remote))
        .with_disposer(Arc::new(disposer))
        .with_notifier(Arc::new(LogNotifier::new(NotifyFilter::default())));

    let mut handle = Arc::new(engine).spawn();

    let gate = handle.gate.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("收到中断信号，正在取消…");
            gate.cancel();
        }
    });

    let mut renderer = ConsoleRenderer::new(std::io::stdout());
    while let Some(event) = handle.events.next().await {
        let _ = renderer.handle(&event);
    }

    handle.join.await??;
    Ok(cli::exit_code(renderer.result()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("错误: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}
