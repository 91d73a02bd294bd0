use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};
use tubescope_core::{ApiClient, AppConfig, JobApi, apply_filters, count_matches, sort_videos};

use crate::{
    filters::{CliSort, FilterArgs, SourceArgs, direction, load_board},
    format::format_video_row,
    jobs::GenerateArgs,
};

mod filters;
mod format;
mod jobs;

#[derive(Parser)]
#[command(name = "tubescope")]
#[command(about = "Browse a YouTube board, convert videos to transcripts, and generate AI reports")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, e.g. http://localhost:8000/api
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Board (dashboard) id
    #[arg(short, long, global = true)]
    board: Option<String>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert 1-5 video links into transcripts
    Convert {
        #[arg(required = true, num_args = 1..)]
        urls: Vec<String>,

        /// Return after submitting instead of waiting
        #[arg(long)]
        no_wait: bool,
    },
    /// Keep waiting for a conversion started earlier
    Resume,
    /// List the board's videos
    Videos {
        #[command(flatten)]
        filters: FilterArgs,

        #[command(flatten)]
        source: SourceArgs,

        #[arg(long, value_enum, default_value = "date")]
        sort: CliSort,

        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,

        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,

        /// Only print how many videos match
        #[arg(long)]
        count: bool,
    },
    /// AI reports
    #[command(subcommand)]
    Report(ReportCommand),
    /// Ingestion progress
    Status {
        /// Read a local status.json instead of asking the server
        #[arg(long)]
        file: Option<PathBuf>,

        /// Follow a running ingestion until it finishes
        #[arg(short, long)]
        watch: bool,

        /// Show finished runs instead
        #[arg(long)]
        history: bool,
    },
    /// Remaining daily conversion allowance
    Quota,
}

#[derive(Subcommand)]
enum ReportCommand {
    /// Request a report from filters or a natural-language query
    Generate {
        /// Natural-language request; filters are ignored when set
        #[arg(long)]
        nl: Option<String>,

        /// Extra instructions for the report writer
        #[arg(long)]
        prompt: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,

        #[command(flatten)]
        source: SourceArgs,

        #[arg(long)]
        no_wait: bool,
    },
    /// List reports, newest first
    History {
        /// Wait for pending reports to finish
        #[arg(short, long)]
        watch: bool,
    },
    /// Print a report
    Show { id: String },
    /// Delete a report
    Delete { id: String },
    /// Show which videos a report would be built from
    Preview {
        #[arg(long)]
        nl: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,

        #[command(flatten)]
        source: SourceArgs,

        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.api_url {
        config.api_base_url = url.clone();
    }
    if let Some(board) = &cli.board {
        config.board_id = board.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let api: Arc<dyn JobApi> = Arc::new(ApiClient::new(config.api_settings())?);

    match cli.command {
        Command::Convert { urls, no_wait } => jobs::convert(&config, api, urls, !no_wait).await,
        Command::Resume => jobs::resume(&config, api).await,
        Command::Videos {
            filters,
            source,
            sort,
            asc,
            limit,
            count,
        } => {
            let (videos, board) = load_board(&source, api.as_ref(), &config.scoring).await?;
            let keywords = board
                .as_ref()
                .map(|b| b.product_keywords())
                .unwrap_or_else(|| config.product_keywords());
            let spec = filters.to_spec();
            if count {
                println!("{}", count_matches(&videos, &spec, &keywords));
                return Ok(());
            }
            let mut selected = apply_filters(&videos, &spec, &keywords);
            sort_videos(&mut selected, sort.into(), direction(asc));
            for video in selected.iter().take(limit) {
                println!("{}", format_video_row(video));
            }
            println!(
                "\n{} {} of {} videos",
                style("•").cyan(),
                selected.len().min(limit),
                selected.len()
            );
            Ok(())
        }
        Command::Report(ReportCommand::Generate {
            nl,
            prompt,
            filters,
            source,
            no_wait,
        }) => {
            jobs::report_generate(
                &config,
                api,
                GenerateArgs {
                    nl,
                    prompt,
                    filters,
                    source,
                    wait: !no_wait,
                },
            )
            .await
        }
        Command::Report(ReportCommand::History { watch }) => {
            jobs::report_history(&config, api, watch).await
        }
        Command::Report(ReportCommand::Show { id }) => jobs::report_show(&config, api, &id).await,
        Command::Report(ReportCommand::Delete { id }) => {
            jobs::report_delete(&config, api, &id).await
        }
        Command::Report(ReportCommand::Preview {
            nl,
            filters,
            source,
            limit,
        }) => jobs::report_preview(&config, api, nl, &filters, &source, limit).await,
        Command::Status {
            file,
            watch,
            history,
        } => match file {
            Some(file) => jobs::status_local(&config, file, watch, history).await,
            None => jobs::status_remote(&config, api, watch, history).await,
        },
        Command::Quota => jobs::quota(api).await,
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}
