use clap::{Parser, Subcommand};
use es_reindex::config::AppConfig;
use es_reindex::gateway::HttpGateway;
use es_reindex::migrate::{ConsoleProgress, MigrationFailure, Migrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "es-reindex", version, about = "Zero-downtime Elasticsearch index migration")]
struct Cli {
    /// 配置文件路径（默认 <config_dir>/es-reindex/config.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 创建新版本索引、复制文档并切换别名
    Migrate {
        /// 逻辑索引名（别名）
        index: String,
        /// 两次任务状态查询之间的等待（毫秒）
        #[arg(long)]
        poll_delay_ms: Option<u64>,
    },
    /// 只校验配置，不访问引擎
    CheckConfig,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let path = cli.config.unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&path)
        .map_err(|e| anyhow::anyhow!("loading {}: {}", path.display(), e))?;
    // 任何引擎调用之前先完成全部配置校验
    let registry = config.registry()?;

    match cli.command {
        Command::CheckConfig => {
            for name in registry.names() {
                info!("Configured index: {}", name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Migrate {
            index,
            poll_delay_ms,
        } => {
            if let Some(ms) = poll_delay_ms {
                config.tuning.poll_delay_ms = ms;
            }
            let spec = registry.get(&index)?;
            let gateway = HttpGateway::new(&config.connection, &config.tuning.marker_field)?;
            info!(
                "Migrating {} on {} (marker field {})",
                index,
                config.connection.url,
                gateway.marker_field()
            );

            let mut progress = ConsoleProgress::stderr();
            match Migrator::new(&gateway, config.tuning.clone()).migrate(spec, &mut progress) {
                Ok(report) => {
                    if !report.warnings.is_empty() {
                        warn!("Finished with {} warning(s)", report.warnings.len());
                    }
                    info!(
                        "Done: {} -> {} in {} pass(es)",
                        report.old.as_ref().map_or("<none>", |o| o.concrete.as_str()),
                        report.new.concrete,
                        report.passes
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(failure) => {
                    error!("{}", failure);
                    if let (MigrationFailure::Reindex { new_index, .. }, Some(e)) =
                        (&failure, failure.rollback_error())
                    {
                        error!("Rollback failed, delete {} manually: {}", new_index, e);
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}
