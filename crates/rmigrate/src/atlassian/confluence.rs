use std::collections::HashSet;
use std::path::{Path, PathBuf};

use colored::Colorize;
use rmigrate_core::atlassian::confluence::{
    classify_create_failure, create_page_payload, first_page_id, ContentSearchResponse,
    CreatedContent,
};
use rmigrate_core::hierarchy::{
    AttachmentUploader, HierarchyResolver, PageId, PageRecord, PageService, RemoteError,
    ResolutionReport, UploadError, UploadOutcome,
};
use rmigrate_core::redmine::parse_wiki_page_file;

use super::{create_authenticated_client, create_upload_client, file_part, AtlassianConfig};
use crate::convert::{Pandoc, PandocConfig};
use crate::prelude::{println, *};

/// Confluence commands
#[derive(Debug, clap::Subcommand)]
pub enum Commands {
    /// Create the pages of an exported Redmine wiki, parents before children
    #[clap(name = "import")]
    Import(ImportOptions),
}

#[derive(Debug, clap::Args, Clone)]
pub struct ImportOptions {
    /// Directory written by `rmigrate redmine wiki`
    #[arg(long)]
    pub wiki_dir: PathBuf,

    /// Target space key
    #[arg(long, env = "CONFLUENCE_SPACE_KEY")]
    pub space: String,

    #[command(flatten)]
    pub atlassian: AtlassianConfig,

    #[command(flatten)]
    pub pandoc: PandocConfig,
}

/// Confluence REST v1 client for one space
pub struct ConfluenceClient {
    client: reqwest::Client,
    upload_client: reqwest::Client,
    api_base: String,
    space_key: String,
}

impl ConfluenceClient {
    pub fn new(config: &AtlassianConfig, space_key: &str) -> Result<Self> {
        Ok(Self {
            client: create_authenticated_client(config)?,
            upload_client: create_upload_client(config, "nocheck")?,
            api_base: format!("{}/wiki/rest/api", config.base_url()),
            space_key: space_key.to_string(),
        })
    }
}

fn transport(e: reqwest::Error) -> RemoteError {
    RemoteError::Transport(e.to_string())
}

impl PageService for ConfluenceClient {
    async fn create_page(
        &self,
        title: &str,
        parent: Option<&PageId>,
        body: &str,
    ) -> Result<PageId, RemoteError> {
        let url = format!("{}/content", self.api_base);
        let payload = create_page_payload(&self.space_key, title, parent, body);

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_create_failure(title, status.as_u16(), &body));
        }

        let created: CreatedContent = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        Ok(PageId(created.id))
    }

    async fn find_page_id_by_title(&self, title: &str) -> Result<Option<PageId>, RemoteError> {
        let url = format!("{}/content", self.api_base);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("spaceKey", self.space_key.as_str()),
                ("title", title),
                ("type", "page"),
            ])
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let search: ContentSearchResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        Ok(first_page_id(search))
    }
}

impl AttachmentUploader for ConfluenceClient {
    async fn upload(&self, page: &PageId, path: &Path) -> Result<UploadOutcome, UploadError> {
        let read_error = |e: std::io::Error| UploadError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        let bytes = tokio::fs::read(path).await.map_err(read_error)?;
        if bytes.is_empty() {
            return Ok(UploadOutcome::SkippedEmpty);
        }

        log::info!(
            "Uploading {} ({} bytes) to page {page}",
            path.display(),
            bytes.len()
        );

        let part = file_part(path, bytes).map_err(|e| UploadError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = format!("{}/content/{}/child/attachment", self.api_base, page);
        let response = self
            .upload_client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::Http {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        Ok(UploadOutcome::Uploaded)
    }
}

// --- Content source ---

/// Files in `dir`, sorted by name. A missing directory yields nothing.
async fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .wrap_err_with(|| format!("Failed to read {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Build one [`PageRecord`] per exported `*.txt` page in `wiki_dir`
pub async fn load_page_records(wiki_dir: &Path) -> Result<Vec<PageRecord>> {
    if !tokio::fs::metadata(wiki_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        return Err(Error::NotADirectory(wiki_dir.to_path_buf()).into());
    }

    let mut records = Vec::new();
    let page_files = sorted_files(wiki_dir)
        .await?
        .into_iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == "txt"));

    for page_file in page_files {
        let Some(stem) = page_file.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        let contents = tokio::fs::read_to_string(&page_file)
            .await
            .wrap_err_with(|| format!("Failed to read {}", page_file.display()))?;
        let parsed = parse_wiki_page_file(&contents);

        let mut seen = HashSet::new();
        let mut attachments = Vec::new();
        for suffix in ["attachments", "images"] {
            for file in sorted_files(&wiki_dir.join(format!("{stem}_{suffix}"))).await? {
                let name = file.file_name().map(|n| n.to_os_string());
                if seen.insert(name) {
                    attachments.push(file);
                }
            }
        }

        records.push(PageRecord {
            title: parsed.title.unwrap_or(stem),
            parent_title: parsed.parent,
            body_source: parsed.body,
            attachment_paths: attachments,
        });
    }

    Ok(records)
}

// --- CLI handler ---

fn print_report(report: &ResolutionReport) {
    let mut table = new_table();
    table.add_row(prettytable::row![
        "Pages created".bold().cyan(),
        (report.created.len() - report.reused.len()).to_string().green().to_string()
    ]);
    table.add_row(prettytable::row![
        "Pages already present".bold().cyan(),
        report.reused.len().to_string().bright_white().to_string()
    ]);
    table.add_row(prettytable::row![
        "Pages failed".bold().cyan(),
        report.failed.len().to_string().red().to_string()
    ]);
    table.add_row(prettytable::row![
        "Pages not placed".bold().cyan(),
        report.unplaced.len().to_string().yellow().to_string()
    ]);
    table.add_row(prettytable::row![
        "Passes after roots".bold().cyan(),
        report.passes.to_string()
    ]);
    table.add_row(prettytable::row![
        "Attachments".bold().cyan(),
        format!(
            "{} uploaded, {} empty, {} failed",
            report.attachments.uploaded, report.attachments.skipped, report.attachments.failed
        )
    ]);
    table.printstd();

    if !report.unplaced.is_empty() {
        println!(
            "\n{}",
            "Pages whose parent could not be resolved:".yellow().bold()
        );
        for title in &report.unplaced {
            println!("  - {title}");
        }
    }

    if !report.failed.is_empty() {
        println!("\n{}", "Pages that failed:".red().bold());
        for failed in &report.failed {
            println!("  - {}: {}", failed.title, failed.reason.bright_black());
        }
    }
}

async fn import_handler(options: ImportOptions) -> Result<()> {
    let records = load_page_records(&options.wiki_dir).await?;
    println!(
        "{} {} page(s) from {}",
        "Loaded".green().bold(),
        records.len(),
        options.wiki_dir.display()
    );

    let client = ConfluenceClient::new(&options.atlassian, &options.space)?;
    let pandoc = Pandoc::textile_to_html(&options.pandoc);

    let report = HierarchyResolver::new(&client, &client, &pandoc)
        .resolve(records)
        .await;

    print_report(&report);

    if report.is_complete() {
        println!("\n{}", "All pages imported.".green().bold());
    }

    Ok(())
}

/// Run Confluence commands
pub async fn run(cmd: Commands, global: crate::Global) -> Result<()> {
    if global.verbose {
        println!("Running Confluence command...");
    }

    match cmd {
        Commands::Import(options) => import_handler(options).await,
    }
}
