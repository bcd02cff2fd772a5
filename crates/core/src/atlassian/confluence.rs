//! Confluence REST v1 payloads and response classification
//!
//! This module contains zero I/O operations and is fully testable with fixture data.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::hierarchy::{PageId, RemoteError};

// ============================================================================
// Domain Models (Input from API)
// ============================================================================

/// Page returned by `POST /content`
#[derive(Debug, Deserialize, Clone)]
pub struct CreatedContent {
    pub id: String,
}

/// `GET /content?spaceKey=..&title=..` response
#[derive(Debug, Deserialize, Clone)]
pub struct ContentSearchResponse {
    #[serde(default)]
    pub results: Vec<ContentSummary>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
}

// ============================================================================
// Pure Helper Functions
// ============================================================================

/// Request body for creating a page in storage format
pub fn create_page_payload(space_key: &str, title: &str, parent: Option<&PageId>, body: &str) -> Value {
    let mut payload = json!({
        "type": "page",
        "title": title,
        "space": { "key": space_key },
        "body": {
            "storage": {
                "value": body,
                "representation": "storage"
            }
        }
    });

    if let Some(parent) = parent {
        payload["ancestors"] = json!([{ "id": parent.as_str() }]);
    }

    payload
}

/// First match of a title search, if any
pub fn first_page_id(response: ContentSearchResponse) -> Option<PageId> {
    response.results.into_iter().next().map(|c| PageId(c.id))
}

/// Turn a failed create response into a [`RemoteError`].
///
/// Confluence reports a title clash either as `409 Conflict` or as a
/// `400 Bad Request` whose message says the page "already exists".
pub fn classify_create_failure(title: &str, status: u16, body: &str) -> RemoteError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.trim().to_string());

    let mentions_existing = message.to_lowercase().contains("already exists");
    if status == 409 || (status == 400 && mentions_existing) {
        return RemoteError::AlreadyExists {
            title: title.to_string(),
        };
    }

    RemoteError::Http { status, message }
}
