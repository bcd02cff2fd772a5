use std::path::Path;
use std::time::Duration;

use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::prelude::*;

pub mod confluence;
pub mod jira;

/// Atlassian Cloud credentials shared by the Jira and Confluence importers
#[derive(Debug, Clone, clap::Args)]
pub struct AtlassianConfig {
    /// Site URL, e.g. https://example.atlassian.net
    #[arg(long = "atlassian-url", env = "ATLASSIAN_BASE_URL")]
    pub base_url: String,

    /// Account email used for Basic auth
    #[arg(long = "atlassian-email", env = "ATLASSIAN_EMAIL")]
    pub email: String,

    /// API token used for Basic auth
    #[arg(long = "atlassian-token", env = "ATLASSIAN_API_TOKEN", hide_env_values = true)]
    pub api_token: String,

    /// Request timeout in seconds
    #[arg(long = "atlassian-timeout", env = "ATLASSIAN_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,
}

impl AtlassianConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    fn basic_auth_header(&self) -> Result<HeaderValue> {
        let auth_string = format!("{}:{}", self.email, self.api_token);
        let auth_encoded = base64::engine::general_purpose::STANDARD.encode(&auth_string);
        HeaderValue::from_str(&format!("Basic {auth_encoded}"))
            .map_err(|e| eyre!("Invalid header value: {}", e))
    }
}

/// Create an authenticated HTTP client with Basic Auth headers
pub fn create_authenticated_client(config: &AtlassianConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, config.basic_auth_header()?);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| eyre!("Failed to build HTTP client: {}", e))
}

/// Client for multipart uploads. It must not carry a JSON `Content-Type`, and
/// Atlassian requires the XSRF bypass header (`nocheck` for Confluence,
/// `no-check` for Jira).
pub fn create_upload_client(
    config: &AtlassianConfig,
    xsrf_token: &'static str,
) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, config.basic_auth_header()?);
    headers.insert(
        HeaderName::from_static("x-atlassian-token"),
        HeaderValue::from_static(xsrf_token),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| eyre!("Failed to build upload client: {e}"))
}

/// Check that an HTTP response was successful, returning a descriptive error otherwise.
pub async fn check_response(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(Error::HttpStatus {
        context: context.to_string(),
        status,
        body,
    }
    .into())
}

/// Multipart `file` part for the file at `path`
pub fn file_part(path: &Path, bytes: Vec<u8>) -> Result<reqwest::multipart::Part> {
    let filename = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let mime = mime_from_extension(&filename);

    reqwest::multipart::Part::bytes(bytes)
        .file_name(filename)
        .mime_str(mime)
        .map_err(|e| eyre!("Invalid MIME type: {e}"))
}

/// Infer MIME type from file extension.
pub fn mime_from_extension(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "txt" | "log" => "text/plain",
        "json" => "application/json",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "zip" => "application/zip",
        "gz" | "gzip" => "application/gzip",
        "csv" => "text/csv",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> AtlassianConfig {
    AtlassianConfig {
        base_url: format!("{base_url}/"),
        email: "me@example.com".to_string(),
        api_token: "token".to_string(),
        timeout_secs: 5,
    }
}
