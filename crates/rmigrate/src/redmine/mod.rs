use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmigrate_core::redmine::{
    IssueDetailResponse, IssueListEntry, IssueListResponse, WikiIndexEntry, WikiIndexResponse,
    WikiPage, WikiPageResponse,
};
use serde::de::DeserializeOwned;

use crate::atlassian::check_response;
use crate::prelude::{println, *};

pub mod issues;
pub mod wiki;

/// Redmine commands
#[derive(Debug, clap::Subcommand)]
pub enum Commands {
    /// Export every issue of a project, including closed ones
    #[clap(name = "issues")]
    Issues(issues::IssuesOptions),

    /// Export every wiki page of a project with attachments and images
    #[clap(name = "wiki")]
    Wiki(wiki::WikiOptions),
}

/// Redmine connection settings
#[derive(Debug, Clone, clap::Args)]
pub struct RedmineConfig {
    /// Redmine site URL
    #[arg(long = "redmine-url", env = "REDMINE_BASE_URL")]
    pub base_url: String,

    /// REST API key, sent as X-Redmine-API-Key
    #[arg(long = "redmine-api-key", env = "REDMINE_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Project identifier
    #[arg(long = "redmine-project", env = "REDMINE_PROJECT")]
    pub project: String,

    /// Request timeout in seconds
    #[arg(long = "redmine-timeout", env = "REDMINE_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,
}

impl RedmineConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Read-only Redmine REST client for one project
pub struct RedmineClient {
    client: reqwest::Client,
    base_url: String,
    project: String,
}

impl RedmineClient {
    pub fn new(config: &RedmineConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-redmine-api-key"),
            HeaderValue::from_str(&config.api_key)
                .map_err(|e| eyre!("Invalid header value: {}", e))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            project: config.project.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, context: &str) -> Result<T> {
        log::debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("{context}: {e}")))?;

        let response = check_response(response, context).await?;

        response
            .json()
            .await
            .map_err(|e| eyre!("{context}: failed to parse response: {e}"))
    }

    /// One page of the project's issues, any status
    pub async fn list_issues(&self, offset: usize, limit: usize) -> Result<Vec<IssueListEntry>> {
        let url = format!(
            "{}/issues.json?project_id={}&status_id=*&offset={offset}&limit={limit}",
            self.base_url,
            urlencoding::encode(&self.project)
        );
        let page: IssueListResponse = self.get_json(&url, "Failed to fetch issues").await?;
        Ok(page.issues)
    }

    /// Full issue JSON with journals and attachments
    pub async fn fetch_issue(&self, id: u64) -> Result<serde_json::Value> {
        let url = format!(
            "{}/issues/{id}.json?include=journals,attachments",
            self.base_url
        );
        let detail: IssueDetailResponse = self
            .get_json(&url, &format!("Failed to fetch issue #{id}"))
            .await?;
        Ok(detail.issue)
    }

    pub async fn wiki_index(&self) -> Result<Vec<WikiIndexEntry>> {
        let url = format!(
            "{}/projects/{}/wiki/index.json",
            self.base_url,
            urlencoding::encode(&self.project)
        );
        let index: WikiIndexResponse = self.get_json(&url, "Failed to fetch wiki index").await?;
        Ok(index.wiki_pages)
    }

    pub async fn wiki_page(&self, title: &str) -> Result<WikiPage> {
        let url = format!(
            "{}/projects/{}/wiki/{}.json?include=attachments",
            self.base_url,
            urlencoding::encode(&self.project),
            urlencoding::encode(title)
        );
        let page: WikiPageResponse = self
            .get_json(&url, &format!("Failed to fetch wiki page '{title}'"))
            .await?;
        Ok(page.wiki_page)
    }

    /// Download `url` to `dest`, creating the parent directory
    pub async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to download {url}: {e}")))?;

        let response = check_response(response, &format!("Failed to download {url}")).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| eyre!("Failed to read {url}: {e}"))?;

        write_file(dest, &bytes).await?;

        Ok(())
    }
}

/// Write a file, creating the parent directory
pub(crate) async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| Error::Write {
            path: parent.to_path_buf(),
            message: e.to_string(),
        })?;
    }
    tokio::fs::write(path, contents).await.map_err(|e| {
        Error::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
        .into()
    })
}

/// Run Redmine commands
pub async fn run(cmd: Commands, global: crate::Global) -> Result<()> {
    if global.verbose {
        println!("Running Redmine command...");
    }

    match cmd {
        Commands::Issues(options) => issues::run(options, global).await,
        Commands::Wiki(options) => wiki::run(options, global).await,
    }
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> RedmineConfig {
    RedmineConfig {
        base_url: base_url.to_string(),
        api_key: "secret".to_string(),
        project: "demo".to_string(),
        timeout_secs: 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_list_issues_sends_api_key_and_paging() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/issues.json")
            .match_header("x-redmine-api-key", "secret")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("project_id".into(), "demo".into()),
                Matcher::UrlEncoded("status_id".into(), "*".into()),
                Matcher::UrlEncoded("offset".into(), "200".into()),
                Matcher::UrlEncoded("limit".into(), "100".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"issues": [{"id": 5, "subject": "x"}], "total_count": 1}"#)
            .create_async()
            .await;

        let client = RedmineClient::new(&test_config(&server.url())).unwrap();
        let issues = client.list_issues(200, 100).await.unwrap();

        mock.assert_async().await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, 5);
    }

    #[tokio::test]
    async fn test_wiki_page_title_is_url_encoded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/projects/demo/wiki/Install%20Guide.json")
            .match_query(Matcher::UrlEncoded("include".into(), "attachments".into()))
            .with_status(200)
            .with_body(r#"{"wiki_page": {"title": "Install Guide", "text": "h1. Hi", "version": 2}}"#)
            .create_async()
            .await;

        let client = RedmineClient::new(&test_config(&server.url())).unwrap();
        let page = client.wiki_page("Install Guide").await.unwrap();

        mock.assert_async().await;
        assert_eq!(page.version, Some(2));
        assert_eq!(page.text.as_deref(), Some("h1. Hi"));
    }

    #[tokio::test]
    async fn test_failed_request_reports_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/projects/demo/wiki/index.json")
            .with_status(401)
            .with_body("Unauthorized")
            .create_async()
            .await;

        let client = RedmineClient::new(&test_config(&server.url())).unwrap();
        let err = client.wiki_index().await.unwrap_err();

        assert_eq!(err.to_string(), "Failed to fetch wiki index [401]: Unauthorized");
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/attachments/download/3/a.bin")
            .with_status(200)
            .with_body(vec![0u8, 1, 2])
            .create_async()
            .await;

        let client = RedmineClient::new(&test_config(&server.url())).unwrap();
        let dest = dir.path().join("nested/a.bin");
        client
            .download(&format!("{}/attachments/download/3/a.bin", server.url()), &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(dest).unwrap(), vec![0u8, 1, 2]);
    }
}
