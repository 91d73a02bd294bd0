use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tubescope_core::{
    AppConfig, ConversionController, ConversionPhase, ConversionStatus, JobApi, JobStatus,
    JobStore, PollEnd, ReportController, ReportRequest, apply_filters,
    conversion::SubmitOutcome,
    poller::{self, PollStep},
    progress::{HISTORY_FILE, read_history, read_status, watch_status},
    rank_by_query,
    store::FileKv,
};

use crate::{
    filters::{FilterArgs, SourceArgs, load_board},
    format::{
        format_duration, format_history_row, format_progress, format_quota,
        format_report_readable, format_run_record, format_video_row,
    },
};

const REFRESH: Duration = Duration::from_millis(250);

pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn create_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );
    pb
}

fn ok_mark() -> console::StyledObject<&'static str> {
    style("✓").green().bold()
}

fn conversion_controller(config: &AppConfig, api: Arc<dyn JobApi>) -> ConversionController {
    let store = JobStore::new(FileKv::new(config.pending_store_path()));
    ConversionController::new(
        api,
        Arc::new(store),
        config.board_id.clone(),
        config.conversion_poll(),
    )
    .on_data_changed(|| tracing::info!("board data changed"))
}

fn print_outcome(outcome: &SubmitOutcome) {
    for id in &outcome.already_available {
        println!("{} {} already has a transcript", ok_mark(), style(id).dim());
    }
    for id in &outcome.already_pending {
        println!("{} {} is already converting", style("•").cyan(), style(id).dim());
    }
    if !outcome.submitted.is_empty() {
        println!(
            "{} Submitted {} video(s): {}",
            ok_mark(),
            outcome.submitted.len(),
            style(outcome.submitted.join(", ")).dim()
        );
    }
}

async fn follow_conversion(controller: &mut ConversionController) -> ConversionStatus {
    let started = Instant::now();
    let spinner = create_spinner("Waiting for transcripts...");
    while controller.is_polling() {
        let status = controller.status();
        if let ConversionPhase::Polling { attempt, found } = status.phase {
            spinner.set_message(format!(
                "Waiting for transcripts... {found}/{} ready (check {attempt})",
                status.pending.len()
            ));
        }
        tokio::time::sleep(REFRESH).await;
    }
    let status = controller.wait().await;
    match &status.phase {
        ConversionPhase::Completed => spinner.finish_with_message(format!(
            "{} Transcripts ready ({})",
            ok_mark(),
            format_duration(started.elapsed())
        )),
        ConversionPhase::TimedOut => spinner.finish_with_message(format!(
            "{} {}",
            style("…").yellow().bold(),
            status.message.as_deref().unwrap_or("Still converting")
        )),
        _ => spinner.finish_and_clear(),
    }
    status
}

pub async fn convert(
    config: &AppConfig,
    api: Arc<dyn JobApi>,
    urls: Vec<String>,
    wait: bool,
) -> Result<()> {
    let mut controller = conversion_controller(config, api);
    let outcome = controller.submit(&urls).await?;
    print_outcome(&outcome);
    if wait && controller.is_polling() {
        follow_conversion(&mut controller).await;
    } else if controller.is_polling() {
        controller.cancel();
        println!(
            "{} Run {} to keep waiting",
            style("→").dim(),
            style("tubescope resume").cyan()
        );
    }
    Ok(())
}

pub async fn resume(config: &AppConfig, api: Arc<dyn JobApi>) -> Result<()> {
    let mut controller = conversion_controller(config, api);
    let ids = controller.restore().await?;
    if ids.is_empty() {
        println!("{} Nothing pending for board {}", ok_mark(), style(&config.board_id).cyan());
        return Ok(());
    }
    println!(
        "{} Resuming {} pending video(s): {}",
        style("•").cyan(),
        ids.len(),
        style(ids.join(", ")).dim()
    );
    follow_conversion(&mut controller).await;
    Ok(())
}

pub async fn quota(api: Arc<dyn JobApi>) -> Result<()> {
    let quota = api.guest_remaining().await?;
    println!("{}", format_quota(&quota));
    Ok(())
}

fn report_controller(config: &AppConfig, api: Arc<dyn JobApi>) -> ReportController {
    ReportController::new(api, config.product_keywords(), config.report_poll())
}

pub struct GenerateArgs {
    pub nl: Option<String>,
    pub prompt: Option<String>,
    pub filters: FilterArgs,
    pub source: SourceArgs,
    pub wait: bool,
}

pub async fn report_generate(
    config: &AppConfig,
    api: Arc<dyn JobApi>,
    args: GenerateArgs,
) -> Result<()> {
    let (request, videos, keywords) = match args.nl {
        Some(query) => (
            ReportRequest::NaturalLanguage {
                query,
                custom_prompt: args.prompt,
            },
            Vec::new(),
            config.product_keywords(),
        ),
        None => {
            let (videos, board) = load_board(&args.source, api.as_ref(), &config.scoring).await?;
            (
                ReportRequest::Filter {
                    filters: args.filters.to_spec(),
                    custom_prompt: args.prompt,
                },
                videos,
                board
                    .map(|b| b.product_keywords())
                    .unwrap_or_else(|| config.product_keywords()),
            )
        }
    };

    let mut reports = ReportController::new(api, keywords, config.report_poll());
    let id = reports.submit(request, &videos).await?;
    println!("{} Report queued: {}", ok_mark(), style(&id).cyan());
    if !args.wait {
        reports.cancel();
        return Ok(());
    }

    let spinner = create_spinner("Generating report...");
    let end = reports.wait().await;
    spinner.finish_and_clear();

    let entry = reports.entries().into_iter().find(|r| r.id == id);
    match (end, entry.map(|e| e.status)) {
        (PollEnd::Completed(()), Some(JobStatus::Completed)) => {
            let report = reports.open(&id).await?;
            println!("{}", style("─".repeat(60)).dim());
            println!("{}", format_report_readable(&report));
        }
        (PollEnd::TimedOut { .. }, _) => println!(
            "{} Still generating; check {} later",
            style("…").yellow().bold(),
            style("tubescope report history").cyan()
        ),
        _ => {}
    }
    for failed in reports.take_new_failures().into_iter().filter(|r| r.id == id) {
        println!(
            "{} {} failed: {}",
            style("✗").red().bold(),
            failed.title,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

pub async fn report_history(config: &AppConfig, api: Arc<dyn JobApi>, wait: bool) -> Result<()> {
    let mut reports = report_controller(config, api);
    let history = reports.history().await?;
    if history.is_empty() {
        println!("{}", style("No reports yet").dim());
        return Ok(());
    }
    for entry in &history {
        println!("{}", format_history_row(entry));
    }
    if wait && reports.is_polling() {
        let spinner = create_spinner("Waiting for in-flight reports...");
        reports.wait().await;
        spinner.finish_and_clear();
        for entry in reports.entries() {
            println!("{}", format_history_row(&entry));
        }
    } else {
        reports.cancel();
    }
    Ok(())
}

pub async fn report_show(config: &AppConfig, api: Arc<dyn JobApi>, id: &str) -> Result<()> {
    let mut reports = report_controller(config, api);
    let report = reports.open(id).await?;
    if report.status == JobStatus::Failed {
        bail!(
            "report {id} failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!("{}", format_report_readable(&report));
    Ok(())
}

pub async fn report_delete(config: &AppConfig, api: Arc<dyn JobApi>, id: &str) -> Result<()> {
    let mut reports = report_controller(config, api);
    reports.delete(id).await?;
    println!("{} Deleted {}", ok_mark(), style(id).dim());
    Ok(())
}

pub async fn report_preview(
    config: &AppConfig,
    api: Arc<dyn JobApi>,
    nl: Option<String>,
    filters: &FilterArgs,
    source: &SourceArgs,
    limit: usize,
) -> Result<()> {
    let (videos, board) = load_board(source, api.as_ref(), &config.scoring).await?;
    let selection = match nl {
        Some(query) => rank_by_query(&videos, &query),
        None => {
            let keywords = board
                .as_ref()
                .map(|b| b.product_keywords())
                .unwrap_or_else(|| config.product_keywords());
            apply_filters(&videos, &filters.to_spec(), &keywords)
        }
    };
    println!(
        "{} {} of {} videos selected",
        style("•").cyan(),
        style(selection.len()).bold(),
        videos.len()
    );
    for video in selection.iter().take(limit) {
        println!("  {}", format_video_row(video));
    }
    Ok(())
}

pub async fn status_local(
    config: &AppConfig,
    file: PathBuf,
    watch: bool,
    history: bool,
) -> Result<()> {
    if history {
        let records = read_history(&file.with_file_name(HISTORY_FILE)).await;
        for record in records.iter().rev() {
            println!("{}", format_run_record(record));
        }
        return Ok(());
    }

    let status = read_status(&file).await;
    if !watch || !status.is_running() {
        println!("{}", format_progress(&status));
        return Ok(());
    }

    let bar = create_bar(status.total);
    let observer = bar.clone();
    let poll = config.status_poll();
    let handle = watch_status(file, poll.interval, poll.max_attempts, move |status| {
        observer.set_length(status.total);
        observer.set_position(status.current);
        observer.set_message(status.phase.to_string());
    });
    match handle.join().await {
        PollEnd::Completed(status) => {
            bar.finish_with_message(format!("{} {}", ok_mark(), format_progress(&status)))
        }
        _ => bar.abandon_with_message("stopped watching"),
    }
    Ok(())
}

pub async fn status_remote(
    config: &AppConfig,
    api: Arc<dyn JobApi>,
    watch: bool,
    history: bool,
) -> Result<()> {
    if history {
        for record in api.status_history().await?.iter().rev() {
            println!("{}", format_run_record(record));
        }
        return Ok(());
    }

    let status = api.status().await?;
    if !watch || !status.is_running() {
        println!("{}", format_progress(&status));
        return Ok(());
    }

    let bar = create_bar(status.total);
    let observer = bar.clone();
    let poll = config.status_poll();
    let handle = poller::start(
        move |_| {
            let api = api.clone();
            let observer = observer.clone();
            async move {
                let status = api.status().await?;
                observer.set_length(status.total);
                observer.set_position(status.current);
                observer.set_message(status.phase.to_string());
                Ok(if status.is_running() {
                    PollStep::Continue
                } else {
                    PollStep::Done(status)
                })
            }
        },
        poll.interval,
        poll.max_attempts,
    );
    match handle.join().await {
        PollEnd::Completed(status) => {
            bar.finish_with_message(format!("{} {}", ok_mark(), format_progress(&status)))
        }
        _ => bar.abandon_with_message("stopped watching"),
    }
    Ok(())
}
