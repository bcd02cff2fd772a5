use std::path::{Path, PathBuf};
use std::time::Duration;

use colored::Colorize;
use rmigrate_core::atlassian::jira::{
    build_issue_description, is_content_limit_exceeded, issue_create_payload,
    parse_error_messages, truncate_description, CreatedIssue, PriorityMap,
};
use rmigrate_core::hierarchy::MarkupConverter;
use rmigrate_core::markup::preprocess_redmine_plaintext;
use rmigrate_core::redmine::RedmineIssue;
use serde_json::Value;

use super::{
    check_response, create_authenticated_client, create_upload_client, file_part, AtlassianConfig,
};
use crate::convert::{Pandoc, PandocConfig};
use crate::prelude::{println, *};

/// Jira commands
#[derive(Debug, clap::Subcommand)]
pub enum Commands {
    /// Create Jira issues from an exported Redmine issue directory
    #[clap(name = "import")]
    Import(ImportOptions),
}

#[derive(Debug, clap::Args, Clone)]
pub struct ImportOptions {
    /// Directory written by `rmigrate redmine issues`
    #[arg(long)]
    pub issues_dir: PathBuf,

    /// Target project key
    #[arg(long, env = "JIRA_PROJECT_KEY")]
    pub project: String,

    /// Issue type used for every created issue
    #[arg(long, default_value = "Task")]
    pub issue_type: String,

    /// TOML file mapping Redmine priorities to Jira priorities
    #[arg(long)]
    pub priority_map: Option<PathBuf>,

    /// Source name shown in the "Migrated from" panel
    #[arg(long, default_value = "Redmine")]
    pub migrated_from: String,

    /// Description length used when Jira rejects the full description
    #[arg(long, default_value_t = 500)]
    pub summary_char_limit: usize,

    /// Pause between issues, in milliseconds
    #[arg(long, default_value_t = 600)]
    pub delay_ms: u64,

    #[command(flatten)]
    pub atlassian: AtlassianConfig,

    #[command(flatten)]
    pub pandoc: PandocConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateIssueError {
    #[error("description exceeds the Jira content limit")]
    ContentLimitExceeded,

    #[error("Jira rejected the issue [{status}]: {message}")]
    Rejected { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid create response: {0}")]
    InvalidResponse(String),
}

/// Jira Cloud REST v3 client
pub struct JiraClient {
    client: reqwest::Client,
    upload_client: reqwest::Client,
    base_url: String,
}

impl JiraClient {
    pub fn new(config: &AtlassianConfig) -> Result<Self> {
        Ok(Self {
            client: create_authenticated_client(config)?,
            upload_client: create_upload_client(config, "no-check")?,
            base_url: config.base_url().to_string(),
        })
    }

    pub async fn create_issue(&self, payload: &Value) -> Result<CreatedIssue, CreateIssueError> {
        let url = format!("{}/rest/api/3/issue", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| CreateIssueError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_content_limit_exceeded(&body) {
                return Err(CreateIssueError::ContentLimitExceeded);
            }
            return Err(CreateIssueError::Rejected {
                status: status.as_u16(),
                message: parse_error_messages(&body),
            });
        }

        response
            .json()
            .await
            .map_err(|e| CreateIssueError::InvalidResponse(e.to_string()))
    }

    /// Upload one file to an issue
    pub async fn attach_file(&self, issue_key: &str, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| eyre!("Failed to read {}: {e}", path.display()))?;
        let form = reqwest::multipart::Form::new().part("file", file_part(path, bytes)?);

        let url = format!("{}/rest/api/3/issue/{issue_key}/attachments", self.base_url);
        let response = self
            .upload_client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        check_response(response, "Failed to upload attachment").await?;
        Ok(())
    }
}

/// Exported `issue_*.json` files in `dir`, sorted by name
async fn issue_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|_| Error::NotADirectory(dir.to_path_buf()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_issue = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("issue_") && n.ends_with(".json"));
        if is_issue && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Sorted regular files in `dir`, empty when the directory does not exist
async fn attachment_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };
    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.is_ok_and(|t| t.is_file()) {
            files.push(entry.path());
        }
    }
    files.sort();
    files
}

/// Creates one Jira issue per exported Redmine issue
pub struct IssueImporter<C> {
    client: JiraClient,
    converter: C,
    priorities: PriorityMap,
    project: String,
    issue_type: String,
    migrated_from: String,
    summary_char_limit: usize,
}

impl<C: MarkupConverter> IssueImporter<C> {
    pub fn new(options: &ImportOptions, client: JiraClient, converter: C, priorities: PriorityMap) -> Self {
        Self {
            client,
            converter,
            priorities,
            project: options.project.clone(),
            issue_type: options.issue_type.clone(),
            migrated_from: options.migrated_from.clone(),
            summary_char_limit: options.summary_char_limit,
        }
    }

    async fn description_markdown(&self, issue: &RedmineIssue) -> String {
        let description = issue.description.as_deref().unwrap_or_default();
        if description.trim().is_empty() {
            return "No description.".to_string();
        }

        let preprocessed = preprocess_redmine_plaintext(description);
        match self.converter.convert(&preprocessed).await {
            Ok(markdown) => markdown,
            Err(e) => {
                log::warn!("Redmine #{}: {e}, using the raw description", issue.id);
                preprocessed
            }
        }
    }

    fn payload(&self, issue: &RedmineIssue, markdown: &str) -> Value {
        let summary = issue
            .subject
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("No subject");
        let description = build_issue_description(&self.migrated_from, issue, markdown);
        let priority = self.priorities.map(issue.priority_name());

        issue_create_payload(&self.project, summary, description, &self.issue_type, priority)
    }

    /// Create the issue, retrying once with a truncated description when
    /// Jira reports the content limit.
    pub async fn create(&self, issue: &RedmineIssue) -> Result<CreatedIssue, CreateIssueError> {
        let markdown = self.description_markdown(issue).await;

        match self.client.create_issue(&self.payload(issue, &markdown)).await {
            Err(CreateIssueError::ContentLimitExceeded) => {
                log::warn!(
                    "Content limit exceeded for Redmine #{}, retrying with a {} character description",
                    issue.id,
                    self.summary_char_limit
                );
                let short = truncate_description(&markdown, self.summary_char_limit);
                self.client.create_issue(&self.payload(issue, &short)).await
            }
            result => result,
        }
    }

    /// Attach the text exports, then the downloaded attachments. Returns the
    /// number of files uploaded; failures are logged.
    async fn attach_exports(&self, issue_key: &str, dir: &Path, redmine_id: u64) -> usize {
        let mut files = Vec::new();
        for name in [
            format!("issue_{redmine_id}.txt"),
            format!("issue_{redmine_id}_comments.txt"),
        ] {
            let path = dir.join(name);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                files.push(path);
            }
        }
        files.extend(attachment_files(&dir.join(format!("issue_{redmine_id}_attachments"))).await);

        let mut uploaded = 0;
        for path in files {
            match self.client.attach_file(issue_key, &path).await {
                Ok(()) => {
                    log::info!("Attached {} to {issue_key}", path.display());
                    uploaded += 1;
                }
                Err(e) => log::warn!("Failed to attach {} to {issue_key}: {e}", path.display()),
            }
        }
        uploaded
    }

    /// Import one exported issue file, returning the created issue key
    pub async fn import_file(&self, path: &Path) -> Result<String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        let issue: RedmineIssue = serde_json::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse {}", path.display()))?;

        let created = self
            .create(&issue)
            .await
            .wrap_err_with(|| format!("Redmine #{}", issue.id))?;

        let dir = path.parent().unwrap_or(Path::new("."));
        let attached = self.attach_exports(&created.key, dir, issue.id).await;
        log::info!(
            "Created {} for Redmine #{} with {attached} attachment(s)",
            created.key,
            issue.id
        );

        Ok(created.key)
    }
}

// --- CLI handler ---

/// Priority map from a TOML file, or the built-in defaults
async fn load_priority_map(path: Option<&Path>) -> Result<PriorityMap> {
    let Some(path) = path else {
        return Ok(PriorityMap::default());
    };
    let contents = tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("Cannot read priority map {}", path.display()))?;
    PriorityMap::from_toml(&contents)
        .wrap_err_with(|| format!("Invalid priority map {}", path.display()))
}

async fn import_handler(options: ImportOptions) -> Result<()> {
    let priorities = load_priority_map(options.priority_map.as_deref()).await?;
    let files = issue_files(&options.issues_dir).await?;
    println!(
        "{} {} issue file(s) in {}",
        "Found".green().bold(),
        files.len(),
        options.issues_dir.display()
    );

    let client = JiraClient::new(&options.atlassian)?;
    let importer = IssueImporter::new(
        &options,
        client,
        Pandoc::textile_to_markdown(&options.pandoc),
        priorities,
    );

    let mut created = Vec::new();
    let mut failed = Vec::new();
    for (index, path) in files.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(Duration::from_millis(options.delay_ms)).await;
        }
        match importer.import_file(path).await {
            Ok(key) => {
                println!("{} {key} from {}", "Created".green(), path.display());
                created.push(key);
            }
            Err(e) => {
                log::error!("{}: {e:#}", path.display());
                failed.push(path.display().to_string());
            }
        }
    }

    let mut table = new_table();
    table.add_row(prettytable::row![
        "Issues created".bold().cyan(),
        created.len().to_string().green().to_string()
    ]);
    table.add_row(prettytable::row![
        "Issues failed".bold().cyan(),
        failed.len().to_string().red().to_string()
    ]);
    table.printstd();

    for path in &failed {
        println!("  - {}", path.bright_black());
    }

    Ok(())
}

/// Run Jira commands
pub async fn run(cmd: Commands, global: crate::Global) -> Result<()> {
    if global.verbose {
        println!("Running Jira command...");
    }

    match cmd {
        Commands::Import(options) => import_handler(options).await,
    }
}
