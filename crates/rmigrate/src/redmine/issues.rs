use std::path::{Path, PathBuf};
use std::time::Duration;

use colored::Colorize;
use rmigrate_core::markup::file_name_of;
use rmigrate_core::redmine::{render_issue_comments, render_issue_text, RedmineIssue};

use super::{write_file, RedmineClient, RedmineConfig};
use crate::prelude::{println, *};

#[derive(Debug, clap::Args, Clone)]
pub struct IssuesOptions {
    /// Output directory
    #[arg(long, default_value = "redmine_issues")]
    pub out: PathBuf,

    /// Index offset to start from, for resuming an interrupted export
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Issues per index page. Redmine serves at most 100.
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u16).range(1..=100))]
    pub limit: u16,

    /// Pause between index pages, in milliseconds
    #[arg(long, default_value_t = 1500)]
    pub delay_ms: u64,

    #[command(flatten)]
    pub redmine: RedmineConfig,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IssueExportStats {
    pub exported: usize,
    pub skipped: usize,
    pub attachments: usize,
    pub attachment_failures: usize,
}

/// Write the JSON, text and comments exports of one issue and download its
/// attachments.
async fn export_issue(
    client: &RedmineClient,
    out: &Path,
    raw: serde_json::Value,
    stats: &mut IssueExportStats,
) -> Result<()> {
    let issue: RedmineIssue =
        serde_json::from_value(raw.clone()).wrap_err("Unexpected issue format")?;
    let id = issue.id;

    let json = serde_json::to_string_pretty(&raw)?;
    write_file(&out.join(format!("issue_{id}.json")), json.as_bytes()).await?;
    write_file(
        &out.join(format!("issue_{id}.txt")),
        render_issue_text(&issue).as_bytes(),
    )
    .await?;
    write_file(
        &out.join(format!("issue_{id}_comments.txt")),
        render_issue_comments(&issue).as_bytes(),
    )
    .await?;

    let attachment_dir = out.join(format!("issue_{id}_attachments"));
    for attachment in &issue.attachments {
        let (Some(filename), Some(content_url)) =
            (attachment.filename.as_deref(), attachment.content_url.as_deref())
        else {
            continue;
        };

        log::info!("Downloading attachment {filename} of issue #{id}");
        let dest = attachment_dir.join(file_name_of(filename));
        match client.download(content_url, &dest).await {
            Ok(()) => stats.attachments += 1,
            Err(e) => {
                log::warn!("Failed to download attachment '{filename}' of issue #{id}: {e}");
                stats.attachment_failures += 1;
            }
        }
    }

    Ok(())
}

/// Page through the project's issues and export each one. Only a failed
/// index request aborts; individual issues are skipped with a warning.
pub async fn export_issues(client: &RedmineClient, options: &IssuesOptions) -> Result<IssueExportStats> {
    tokio::fs::create_dir_all(&options.out)
        .await
        .map_err(|e| Error::Write {
            path: options.out.clone(),
            message: e.to_string(),
        })?;

    let mut stats = IssueExportStats::default();
    let mut offset = options.offset;

    loop {
        let page = client.list_issues(offset, usize::from(options.limit)).await?;
        if page.is_empty() {
            break;
        }
        log::info!("Retrieved {} issues (offset {offset})", page.len());
        offset += page.len();

        for entry in page {
            let raw = match client.fetch_issue(entry.id).await {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!("Skipping issue #{}: {e}", entry.id);
                    stats.skipped += 1;
                    continue;
                }
            };

            match export_issue(client, &options.out, raw, &mut stats).await {
                Ok(()) => stats.exported += 1,
                Err(e) => {
                    log::warn!("Skipping issue #{}: {e:#}", entry.id);
                    stats.skipped += 1;
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(options.delay_ms)).await;
    }

    Ok(stats)
}

pub async fn run(options: IssuesOptions, _global: crate::Global) -> Result<()> {
    let client = RedmineClient::new(&options.redmine)?;
    println!(
        "{} issues of '{}' from {}",
        "Exporting".green().bold(),
        options.redmine.project,
        client.base_url()
    );

    let stats = export_issues(&client, &options).await?;

    let mut table = new_table();
    table.add_row(prettytable::row![
        "Issues exported".bold().cyan(),
        stats.exported.to_string().green().to_string()
    ]);
    table.add_row(prettytable::row![
        "Issues skipped".bold().cyan(),
        stats.skipped.to_string().yellow().to_string()
    ]);
    table.add_row(prettytable::row![
        "Attachments".bold().cyan(),
        format!(
            "{} downloaded, {} failed",
            stats.attachments, stats.attachment_failures
        )
    ]);
    table.printstd();

    println!("Output written to {}", options.out.display());
    Ok(())
}
