use std::path::{Path, PathBuf};

use colored::Colorize;
use rmigrate_core::markup::{embedded_image_refs, file_name_of, sanitize_title};
use rmigrate_core::redmine::{render_wiki_page_file, resolve_image_url, WikiPage};

use super::{write_file, RedmineClient, RedmineConfig};
use crate::prelude::{println, *};

#[derive(Debug, clap::Args, Clone)]
pub struct WikiOptions {
    /// Output directory
    #[arg(long, default_value = "wiki_pages")]
    pub out: PathBuf,

    #[command(flatten)]
    pub redmine: RedmineConfig,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WikiExportStats {
    pub pages: usize,
    pub skipped: usize,
    pub attachments: usize,
    pub images: usize,
    pub download_failures: usize,
}

async fn download_counted(
    client: &RedmineClient,
    url: &str,
    dest: &Path,
    counter: &mut usize,
    failures: &mut usize,
) {
    match client.download(url, dest).await {
        Ok(()) => {
            log::info!("Downloaded {}", dest.display());
            *counter += 1;
        }
        Err(e) => {
            log::warn!("{e}");
            *failures += 1;
        }
    }
}

/// Write one page file plus its `_attachments` and `_images` directories
async fn export_page(
    client: &RedmineClient,
    out: &Path,
    page: &WikiPage,
    stats: &mut WikiExportStats,
) -> Result<()> {
    let safe_title = sanitize_title(&page.title);
    write_file(
        &out.join(format!("{safe_title}.txt")),
        render_wiki_page_file(page).as_bytes(),
    )
    .await?;

    let attachment_dir = out.join(format!("{safe_title}_attachments"));
    for attachment in &page.attachments {
        let (Some(filename), Some(content_url)) =
            (attachment.filename.as_deref(), attachment.content_url.as_deref())
        else {
            continue;
        };
        download_counted(
            client,
            content_url,
            &attachment_dir.join(file_name_of(filename)),
            &mut stats.attachments,
            &mut stats.download_failures,
        )
        .await;
    }

    let image_dir = out.join(format!("{safe_title}_images"));
    let text = page.text.as_deref().unwrap_or_default();
    for image in embedded_image_refs(text) {
        let Some(url) = resolve_image_url(&image, &page.attachments, client.base_url()) else {
            log::warn!(
                "Could not resolve image '{image}' on '{}' as attachment or URL, skipping",
                page.title
            );
            continue;
        };
        download_counted(
            client,
            &url,
            &image_dir.join(file_name_of(&image)),
            &mut stats.images,
            &mut stats.download_failures,
        )
        .await;
    }

    Ok(())
}

/// Export every page listed in the wiki index. A failed index request aborts;
/// pages that cannot be fetched are skipped with a warning.
pub async fn export_wiki(client: &RedmineClient, out: &Path) -> Result<WikiExportStats> {
    let index = client.wiki_index().await?;
    log::info!("Found {} wiki pages", index.len());

    let mut stats = WikiExportStats::default();
    for entry in index {
        let mut page = match client.wiki_page(&entry.title).await {
            Ok(page) => page,
            Err(e) => {
                log::warn!("Skipping wiki page '{}': {e}", entry.title);
                stats.skipped += 1;
                continue;
            }
        };
        page.title = entry.title;

        match export_page(client, out, &page, &mut stats).await {
            Ok(()) => stats.pages += 1,
            Err(e) => {
                log::warn!("Skipping wiki page '{}': {e:#}", page.title);
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}

pub async fn run(options: WikiOptions, _global: crate::Global) -> Result<()> {
    let client = RedmineClient::new(&options.redmine)?;
    println!(
        "{} wiki of '{}' from {}",
        "Exporting".green().bold(),
        options.redmine.project,
        client.base_url()
    );

    let stats = export_wiki(&client, &options.out).await?;

    let mut table = new_table();
    table.add_row(prettytable::row![
        "Pages exported".bold().cyan(),
        stats.pages.to_string().green().to_string()
    ]);
    table.add_row(prettytable::row![
        "Pages skipped".bold().cyan(),
        stats.skipped.to_string().yellow().to_string()
    ]);
    table.add_row(prettytable::row![
        "Downloads".bold().cyan(),
        format!(
            "{} attachments, {} images, {} failed",
            stats.attachments, stats.images, stats.download_failures
        )
    ]);
    table.printstd();

    println!("Output written to {}", options.out.display());
    Ok(())
}
