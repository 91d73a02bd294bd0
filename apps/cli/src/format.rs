use std::time::Duration;

use console::style;
use tubescope_core::{JobStatus, ProgressStatus, Quota, Report, ReportSummary, RunRecord, Video};

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// 1234567 -> "1.2M", 45300 -> "45.3K"
pub fn format_views(views: u64) -> String {
    match views {
        v if v >= 1_000_000 => format!("{:.1}M", v as f64 / 1_000_000.0),
        v if v >= 1_000 => format!("{:.1}K", v as f64 / 1_000.0),
        v => v.to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

pub fn format_video_row(video: &Video) -> String {
    let rank = match video.rank {
        Some(rank) => style(rank.to_string()).yellow().bold().to_string(),
        None => style("-").dim().to_string(),
    };
    let transcript = match (video.has_transcript(), video.transcript_source) {
        (true, Some(source)) => style(format!("{source:?}").to_lowercase()).green().to_string(),
        (true, None) => style("yes").green().to_string(),
        (false, _) => style("no").dim().to_string(),
    };
    format!(
        "{rank} {score:>6.2}  {date:<10}  {views:>7}  {transcript:<7}  {title}  {id}",
        score = video.score,
        date = video.day().map(|d| d.to_string()).unwrap_or_else(|| "unknown".into()),
        views = format_views(video.views),
        title = truncate(&video.title, 60),
        id = style(&video.id).dim(),
    )
}

pub fn format_status(status: JobStatus) -> String {
    match status {
        JobStatus::Pending => style("pending").yellow().to_string(),
        JobStatus::Processing => style("processing").cyan().to_string(),
        JobStatus::Completed => style("completed").green().to_string(),
        JobStatus::Failed => style("failed").red().to_string(),
    }
}

pub fn format_history_row(summary: &ReportSummary) -> String {
    let mut row = format!(
        "{}  {:<10}  {:<19}  {:>3} videos  {}",
        style(&summary.id).dim(),
        format_status(summary.status),
        truncate(&summary.created_at, 19),
        summary.selected_count,
        truncate(&summary.title, 50),
    );
    if let Some(error) = &summary.error {
        row.push_str(&format!("\n    {} {}", style("error:").red(), error));
    }
    row
}

pub fn format_report_readable(report: &Report) -> String {
    let mut output = String::new();
    output.push_str(&format!("# {}\n\n", report.title));
    output.push_str(&format!(
        "**Created:** {} | **Videos:** {} | **With transcript:** {}\n\n",
        report.created_at, report.selected_count, report.with_transcript_count
    ));

    if !report.video_titles.is_empty() {
        output.push_str("## Sources\n\n");
        for title in &report.video_titles {
            output.push_str(&format!("• {}\n", title));
        }
        output.push('\n');
    }

    output.push_str(&report.report);
    output.push('\n');
    output
}

pub fn format_progress(status: &ProgressStatus) -> String {
    let channel = status.channel.as_deref().unwrap_or("-");
    let mut line = format!(
        "{} {}/{} ({})  channel {}",
        status.phase,
        status.current,
        status.total,
        if status.is_running() { "running" } else { "idle" },
        channel
    );
    if status.failed_count > 0 {
        line.push_str(&format!(", {} failed", status.failed_count));
    }
    line
}

pub fn format_run_record(record: &RunRecord) -> String {
    format!(
        "{}  {:<22}  {}/{}  {} failed",
        style(&record.completed_at).dim(),
        record.phase_label,
        record.status.current,
        record.status.total,
        record.status.failed_count
    )
}

pub fn format_quota(quota: &Quota) -> String {
    if quota.is_unlimited() {
        return format!(
            "signed in: {} videos or {} minutes per day",
            quota.limit_count, quota.limit_minutes
        );
    }
    format!(
        "{} of {} videos and {} of {} minutes left today",
        quota.remaining_count, quota.limit_count, quota.remaining_minutes, quota.limit_minutes
    )
}
