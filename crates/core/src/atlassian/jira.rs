//! Jira issue payloads built from exported Redmine issues
//!
//! Descriptions are sent as Atlassian Document Format (ADF). Everything here is
//! pure and tested with fixture data.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::redmine::RedmineIssue;

/// Jira error code returned when a description is too large
pub const CONTENT_LIMIT_EXCEEDED: &str = "CONTENT_LIMIT_EXCEEDED";

pub const DEFAULT_JIRA_PRIORITY: &str = "Medium";

// ============================================================================
// Priority mapping
// ============================================================================

/// Redmine priority name to Jira priority name
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriorityMap {
    /// Jira priority used for unmapped or missing Redmine priorities
    #[serde(default = "default_fallback")]
    pub default: String,
    #[serde(default)]
    pub priorities: BTreeMap<String, String>,
}

fn default_fallback() -> String {
    DEFAULT_JIRA_PRIORITY.to_string()
}

impl Default for PriorityMap {
    fn default() -> Self {
        let priorities = [
            ("P0", "Highest (P1)"),
            ("P1", "High (P2)"),
            ("P2", "Medium (P3)"),
            ("P3", "Low"),
            ("P4", "Lowest"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            default: default_fallback(),
            priorities,
        }
    }
}

impl PriorityMap {
    /// Parse a map from TOML:
    ///
    /// ```toml
    /// default = "Medium"
    ///
    /// [priorities]
    /// Urgent = "Highest"
    /// ```
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn map(&self, redmine_priority: Option<&str>) -> &str {
        redmine_priority
            .and_then(|p| self.priorities.get(p))
            .map(String::as_str)
            .unwrap_or(self.default.as_str())
    }
}

// ============================================================================
// ADF builders
// ============================================================================

fn adf_text_paragraph(text: &str) -> Value {
    json!({
        "type": "paragraph",
        "content": [{ "type": "text", "text": text }]
    })
}

/// ADF rejects empty text nodes, so empty cells get an empty paragraph
fn adf_cell(kind: &str, text: &str) -> Value {
    let paragraph = if text.is_empty() {
        json!({ "type": "paragraph", "content": [] })
    } else {
        adf_text_paragraph(text)
    };
    json!({ "type": kind, "content": [paragraph] })
}

pub fn adf_info_panel(text: &str) -> Value {
    json!({
        "type": "panel",
        "attrs": { "panelType": "info" },
        "content": [adf_text_paragraph(text)]
    })
}

/// Two-column Field/Value table describing the source issue
pub fn adf_metadata_table(issue: &RedmineIssue) -> Value {
    let id = issue.id.to_string();
    let fields = [
        ("Redmine ID", id.as_str()),
        ("Author", issue.author_name()),
        ("Status", issue.status_name()),
        ("Tracker", issue.tracker_name()),
        ("Priority", issue.priority_name().unwrap_or_default()),
        ("Assigned To", issue.assignee_name().unwrap_or_default()),
        ("Created", issue.created_on.as_deref().unwrap_or_default()),
        ("Updated", issue.updated_on.as_deref().unwrap_or_default()),
    ];

    let mut rows = vec![json!({
        "type": "tableRow",
        "content": [adf_cell("tableHeader", "Field"), adf_cell("tableHeader", "Value")]
    })];
    rows.extend(fields.iter().map(|(field, value)| {
        json!({
            "type": "tableRow",
            "content": [adf_cell("tableCell", field), adf_cell("tableCell", value)]
        })
    }));

    json!({ "type": "table", "content": rows })
}

/// One ADF paragraph per blank-line separated block of markdown
pub fn adf_paragraphs_from_markdown(markdown: &str) -> Vec<Value> {
    markdown
        .trim()
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(adf_text_paragraph)
        .collect()
}

pub fn adf_document(content: Vec<Value>) -> Value {
    json!({ "type": "doc", "version": 1, "content": content })
}

/// Full issue description: provenance panel, metadata table, then the body
pub fn build_issue_description(migrated_from: &str, issue: &RedmineIssue, markdown: &str) -> Value {
    let mut content = vec![
        adf_info_panel(&format!("Migrated from {migrated_from}")),
        adf_metadata_table(issue),
    ];
    content.extend(adf_paragraphs_from_markdown(markdown));
    adf_document(content)
}

/// First `limit` characters of `markdown`, with `...` appended when cut
pub fn truncate_description(markdown: &str, limit: usize) -> String {
    if markdown.chars().count() <= limit {
        return markdown.to_string();
    }
    let mut truncated: String = markdown.chars().take(limit).collect();
    truncated.push_str("...");
    truncated
}

pub fn issue_create_payload(
    project_key: &str,
    summary: &str,
    description: Value,
    issue_type: &str,
    priority: &str,
) -> Value {
    json!({
        "fields": {
            "project": { "key": project_key },
            "summary": summary,
            "description": description,
            "issuetype": { "name": issue_type },
            "priority": { "name": priority }
        }
    })
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Deserialize, Clone)]
pub struct CreatedIssue {
    pub key: String,
    #[serde(default)]
    pub id: Option<String>,
}

/// Human readable message from a Jira error body. Collects `errorMessages`
/// and per-field `errors`, falling back to the raw body.
pub fn parse_error_messages(body: &str) -> String {
    let Ok(error_json) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };

    let mut messages = Vec::new();

    if let Some(error_messages) = error_json.get("errorMessages").and_then(|em| em.as_array()) {
        messages.extend(error_messages.iter().filter_map(|m| m.as_str()).map(str::to_string));
    }

    if let Some(errors) = error_json.get("errors").and_then(|e| e.as_object()) {
        for (field, error) in errors {
            if let Some(error_text) = error.as_str() {
                messages.push(format!("{field}: {error_text}"));
            }
        }
    }

    if messages.is_empty() {
        body.to_string()
    } else {
        messages.join("\n")
    }
}

pub fn is_content_limit_exceeded(body: &str) -> bool {
    body.contains(CONTENT_LIMIT_EXCEEDED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redmine::NamedRef;

    fn named(name: &str) -> Option<NamedRef> {
        Some(NamedRef {
            id: Some(1),
            name: Some(name.to_string()),
        })
    }

    fn issue() -> RedmineIssue {
        RedmineIssue {
            id: 101,
            subject: Some("Printer on fire".to_string()),
            status: named("New"),
            tracker: named("Bug"),
            priority: named("P1"),
            author: named("Alice"),
            created_on: Some("2024-01-01".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_priority_map() {
        let map = PriorityMap::default();
        assert_eq!(map.map(Some("P0")), "Highest (P1)");
        assert_eq!(map.map(Some("P4")), "Lowest");
        assert_eq!(map.map(Some("Urgent")), "Medium");
        assert_eq!(map.map(None), "Medium");
    }

    #[test]
    fn test_priority_map_from_toml() {
        let map = PriorityMap::from_toml(
            r#"
default = "Low"

[priorities]
Urgent = "Highest"
Normal = "Medium"
"#,
        )
        .unwrap();

        assert_eq!(map.map(Some("Urgent")), "Highest");
        assert_eq!(map.map(Some("P0")), "Low");
        assert_eq!(map.map(None), "Low");
    }

    #[test]
    fn test_priority_map_from_toml_without_default() {
        let map = PriorityMap::from_toml("[priorities]\nA = \"B\"\n").unwrap();
        assert_eq!(map.default, "Medium");
    }

    #[test]
    fn test_metadata_table_rows() {
        let table = adf_metadata_table(&issue());
        let rows = table["content"].as_array().unwrap();

        assert_eq!(rows.len(), 9);
        assert_eq!(rows[0]["content"][0]["type"], "tableHeader");
        assert_eq!(rows[0]["content"][0]["content"][0]["content"][0]["text"], "Field");
        assert_eq!(rows[1]["content"][1]["content"][0]["content"][0]["text"], "101");
        assert_eq!(rows[3]["content"][1]["content"][0]["content"][0]["text"], "New");

        // Assigned To is missing
        assert_eq!(rows[6]["content"][0]["content"][0]["content"][0]["text"], "Assigned To");
        assert_eq!(rows[6]["content"][1]["content"][0]["content"], json!([]));
    }

    #[test]
    fn test_paragraphs_from_markdown() {
        let paragraphs = adf_paragraphs_from_markdown("\nfirst line\nstill first\n\n\n\n  second  \n\n");
        assert_eq!(
            paragraphs,
            vec![
                adf_text_paragraph("first line\nstill first"),
                adf_text_paragraph("second")
            ]
        );
        assert!(adf_paragraphs_from_markdown("  \n\n ").is_empty());
    }

    #[test]
    fn test_build_issue_description() {
        let doc = build_issue_description("Redmine", &issue(), "Body text");

        assert_eq!(doc["type"], "doc");
        assert_eq!(doc["version"], 1);
        let content = doc["content"].as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert_eq!(content[0]["type"], "panel");
        assert_eq!(content[0]["attrs"]["panelType"], "info");
        assert_eq!(content[0]["content"][0]["content"][0]["text"], "Migrated from Redmine");
        assert_eq!(content[1]["type"], "table");
        assert_eq!(content[2]["content"][0]["text"], "Body text");
    }

    #[test]
    fn test_truncate_description() {
        assert_eq!(truncate_description("short", 10), "short");
        assert_eq!(truncate_description("exactly", 7), "exactly");
        assert_eq!(truncate_description("abcdefgh", 3), "abc...");
        assert_eq!(truncate_description("héllo wörld", 4), "héll...");
    }

    #[test]
    fn test_issue_create_payload() {
        let payload = issue_create_payload("OPS", "Summary", adf_document(vec![]), "Task", "High (P2)");
        assert_eq!(payload["fields"]["project"]["key"], "OPS");
        assert_eq!(payload["fields"]["summary"], "Summary");
        assert_eq!(payload["fields"]["issuetype"]["name"], "Task");
        assert_eq!(payload["fields"]["priority"]["name"], "High (P2)");
        assert_eq!(payload["fields"]["description"]["type"], "doc");
    }

    #[test]
    fn test_parse_error_messages() {
        let body = r#"{"errorMessages":["Bad things"],"errors":{"priority":"Priority name 'X' is not valid"}}"#;
        assert_eq!(
            parse_error_messages(body),
            "Bad things\npriority: Priority name 'X' is not valid"
        );
        assert_eq!(parse_error_messages("not json"), "not json");
        assert_eq!(parse_error_messages("{}"), "{}");
    }

    #[test]
    fn test_is_content_limit_exceeded() {
        let body = r#"{"errorMessages":[],"errors":{"description":"CONTENT_LIMIT_EXCEEDED"}}"#;
        assert!(is_content_limit_exceeded(body));
        assert!(!is_content_limit_exceeded(r#"{"errorMessages":["nope"]}"#));
    }
}
