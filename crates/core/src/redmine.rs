//! Redmine API models and the on-disk export formats
//!
//! The exporters write one readable text file per issue or wiki page next to
//! the raw JSON. The importers read those files back, so the renderers and the
//! parser in this module must stay in sync.

use serde::{Deserialize, Serialize};
use url::Url;

/// Separator between the metadata header and the body of an exported wiki page
pub const WIKI_BODY_SEPARATOR: &str = "---\n\n";

/// `{id, name}` reference Redmine uses for users, statuses, trackers, etc.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct NamedRef {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Attachment metadata on issues and wiki pages
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct RedmineAttachment {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_url: Option<String>,
}

/// Journal entry; entries without notes are field changes only
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Journal {
    #[serde(default)]
    pub user: Option<NamedRef>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_on: Option<String>,
}

/// Issue as returned by `/issues/{id}.json?include=journals,attachments`
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct RedmineIssue {
    pub id: u64,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<NamedRef>,
    #[serde(default)]
    pub tracker: Option<NamedRef>,
    #[serde(default)]
    pub priority: Option<NamedRef>,
    #[serde(default)]
    pub author: Option<NamedRef>,
    #[serde(default)]
    pub assigned_to: Option<NamedRef>,
    #[serde(default)]
    pub created_on: Option<String>,
    #[serde(default)]
    pub updated_on: Option<String>,
    #[serde(default)]
    pub journals: Vec<Journal>,
    #[serde(default)]
    pub attachments: Vec<RedmineAttachment>,
}

/// Minimal issue entry from the `/issues.json` listing
#[derive(Debug, Deserialize, Clone)]
pub struct IssueListEntry {
    pub id: u64,
}

/// One page of `/issues.json`
#[derive(Debug, Deserialize, Clone)]
pub struct IssueListResponse {
    #[serde(default)]
    pub issues: Vec<IssueListEntry>,
}

/// `/issues/{id}.json` wrapper. The issue is kept as raw JSON so the export
/// preserves every field, including custom ones.
#[derive(Debug, Deserialize, Clone)]
pub struct IssueDetailResponse {
    pub issue: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WikiIndexEntry {
    pub title: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WikiIndexResponse {
    #[serde(default)]
    pub wiki_pages: Vec<WikiIndexEntry>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct WikiParent {
    pub title: String,
}

/// Wiki page as returned by `/projects/{p}/wiki/{title}.json?include=attachments`
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct WikiPage {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub author: Option<NamedRef>,
    #[serde(default)]
    pub created_on: Option<String>,
    #[serde(default)]
    pub updated_on: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub parent: Option<WikiParent>,
    #[serde(default)]
    pub attachments: Vec<RedmineAttachment>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WikiPageResponse {
    pub wiki_page: WikiPage,
}

fn name_of(reference: &Option<NamedRef>) -> &str {
    reference
        .as_ref()
        .and_then(|r| r.name.as_deref())
        .unwrap_or_default()
}

/// Field accessors shared by the text export and the Jira metadata table
impl RedmineIssue {
    pub fn status_name(&self) -> &str {
        name_of(&self.status)
    }

    pub fn tracker_name(&self) -> &str {
        name_of(&self.tracker)
    }

    pub fn priority_name(&self) -> Option<&str> {
        self.priority.as_ref().and_then(|p| p.name.as_deref())
    }

    pub fn author_name(&self) -> &str {
        name_of(&self.author)
    }

    pub fn assignee_name(&self) -> Option<&str> {
        self.assigned_to.as_ref().and_then(|a| a.name.as_deref())
    }
}

/// Readable export of an issue: header, description and comments
pub fn render_issue_text(issue: &RedmineIssue) -> String {
    let mut out = String::new();
    out.push_str(&format!("Issue #{}\n", issue.id));
    out.push_str(&format!(
        "Subject: {}\n",
        issue.subject.as_deref().unwrap_or_default()
    ));
    out.push_str(&format!("Status: {}\n", issue.status_name()));
    out.push_str(&format!("Tracker: {}\n", issue.tracker_name()));
    out.push_str(&format!(
        "Priority: {}\n",
        issue.priority_name().unwrap_or_default()
    ));
    out.push_str(&format!(
        "Assigned to: {}\n",
        issue.assignee_name().unwrap_or("Unassigned")
    ));
    out.push_str(&format!("Author: {}\n", issue.author_name()));
    out.push_str(&format!(
        "Created: {}\n",
        issue.created_on.as_deref().unwrap_or_default()
    ));
    out.push_str(&format!(
        "Updated: {}\n",
        issue.updated_on.as_deref().unwrap_or_default()
    ));
    out.push_str(&format!(
        "Description:\n{}\n\n",
        issue.description.as_deref().unwrap_or_default()
    ));
    out.push_str(&render_issue_comments(issue));
    out
}

/// The `--- Comments ---` section on its own. Journals without notes are skipped.
pub fn render_issue_comments(issue: &RedmineIssue) -> String {
    let mut out = String::from("--- Comments ---\n");
    for journal in &issue.journals {
        let notes = journal.notes.as_deref().unwrap_or_default();
        if notes.is_empty() {
            continue;
        }
        let user = journal
            .user
            .as_ref()
            .and_then(|u| u.name.as_deref())
            .unwrap_or("Unknown");
        let created = journal.created_on.as_deref().unwrap_or_default();
        out.push_str(&format!("\n[{created}] {user}:\n{notes}\n"));
    }
    out
}

/// Exported wiki page: metadata header, separator, raw Textile body
pub fn render_wiki_page_file(page: &WikiPage) -> String {
    let attachment_names = page
        .attachments
        .iter()
        .filter_map(|a| a.filename.as_deref())
        .map(|name| format!("'{name}'"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut out = String::new();
    out.push_str(&format!("Title: {}\n", page.title));
    out.push_str(&format!(
        "Author: {}\n",
        page.author
            .as_ref()
            .and_then(|a| a.name.as_deref())
            .unwrap_or("Unknown")
    ));
    out.push_str(&format!(
        "Created On: {}\n",
        page.created_on.as_deref().unwrap_or("Unknown")
    ));
    out.push_str(&format!(
        "Last Updated: {}\n",
        page.updated_on.as_deref().unwrap_or("Unknown")
    ));
    out.push_str(&format!(
        "Version: {}\n",
        page.version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    ));
    out.push_str(&format!(
        "Parent Page: {}\n",
        page.parent
            .as_ref()
            .map(|p| p.title.as_str())
            .unwrap_or("None")
    ));
    out.push_str(&format!(
        "Comments: {}\n",
        page.comments.as_deref().unwrap_or_default()
    ));
    out.push_str(&format!("Attachments: [{attachment_names}]\n"));
    out.push('\n');
    out.push_str(WIKI_BODY_SEPARATOR);
    out.push_str(page.text.as_deref().unwrap_or_default());
    out
}

/// What the Confluence importer needs from an exported wiki page file
#[derive(Debug, Clone, PartialEq)]
pub struct WikiPageFile {
    pub title: Option<String>,
    pub parent: Option<String>,
    pub body: String,
}

/// Parse a file written by [`render_wiki_page_file`]. Files without a
/// separator are treated as body-only with no header.
pub fn parse_wiki_page_file(contents: &str) -> WikiPageFile {
    let (header, body) = match contents.find(WIKI_BODY_SEPARATOR) {
        Some(split) => (
            &contents[..split],
            &contents[split + WIKI_BODY_SEPARATOR.len()..],
        ),
        None => ("", contents),
    };

    let mut title = None;
    let mut parent = None;
    for line in header.lines() {
        if let Some(value) = line.strip_prefix("Title:") {
            let value = value.trim();
            if !value.is_empty() {
                title = Some(value.to_string());
            }
        } else if let Some(value) = line.strip_prefix("Parent Page:") {
            let value = value.trim();
            if !value.is_empty() && value != "None" {
                parent = Some(value.to_string());
            }
        }
    }

    WikiPageFile {
        title,
        parent,
        body: body.to_string(),
    }
}

/// Where to download an embedded image from: a matching attachment, an
/// absolute URL, or a path on the Redmine host. `None` when none applies.
pub fn resolve_image_url(
    reference: &str,
    attachments: &[RedmineAttachment],
    base_url: &str,
) -> Option<String> {
    let from_attachment = attachments
        .iter()
        .find(|a| a.filename.as_deref() == Some(reference))
        .and_then(|a| a.content_url.clone());
    if from_attachment.is_some() {
        return from_attachment;
    }

    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Some(reference.to_string());
    }

    if reference.starts_with('/') {
        let base = Url::parse(base_url).ok()?;
        return base.join(reference).ok().map(String::from);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Option<NamedRef> {
        Some(NamedRef {
            id: None,
            name: Some(name.to_string()),
        })
    }

    fn sample_issue() -> RedmineIssue {
        RedmineIssue {
            id: 42,
            subject: Some("Crash on login".to_string()),
            description: Some("Steps to reproduce".to_string()),
            status: named("New"),
            tracker: named("Bug"),
            priority: named("P1"),
            author: named("Alice"),
            assigned_to: None,
            created_on: Some("2024-01-02T03:04:05Z".to_string()),
            updated_on: Some("2024-02-03T04:05:06Z".to_string()),
            journals: vec![
                Journal {
                    user: named("Bob"),
                    notes: Some("Reproduced".to_string()),
                    created_on: Some("2024-01-03T00:00:00Z".to_string()),
                },
                Journal {
                    user: named("Bob"),
                    notes: Some(String::new()),
                    created_on: Some("2024-01-04T00:00:00Z".to_string()),
                },
            ],
            attachments: vec![],
        }
    }

    #[test]
    fn test_issue_deserializes_from_redmine_json() {
        let json = r#"{
            "id": 7,
            "subject": "Hello",
            "priority": {"id": 2, "name": "P2"},
            "journals": [{"user": {"id": 1, "name": "Ann"}, "notes": "hi", "created_on": "x"}],
            "custom_fields": [{"id": 9, "value": "ignored"}]
        }"#;

        let issue: RedmineIssue = serde_json::from_str(json).unwrap();

        assert_eq!(issue.id, 7);
        assert_eq!(issue.priority_name(), Some("P2"));
        assert_eq!(issue.assignee_name(), None);
        assert_eq!(issue.journals.len(), 1);
        assert!(issue.attachments.is_empty());
    }

    #[test]
    fn test_render_issue_text() {
        let text = render_issue_text(&sample_issue());

        assert_eq!(
            text,
            "Issue #42\n\
             Subject: Crash on login\n\
             Status: New\n\
             Tracker: Bug\n\
             Priority: P1\n\
             Assigned to: Unassigned\n\
             Author: Alice\n\
             Created: 2024-01-02T03:04:05Z\n\
             Updated: 2024-02-03T04:05:06Z\n\
             Description:\n\
             Steps to reproduce\n\
             \n\
             --- Comments ---\n\
             \n\
             [2024-01-03T00:00:00Z] Bob:\n\
             Reproduced\n"
        );
    }

    #[test]
    fn test_render_issue_comments_without_journals() {
        let mut issue = sample_issue();
        issue.journals.clear();
        assert_eq!(render_issue_comments(&issue), "--- Comments ---\n");
    }

    #[test]
    fn test_wiki_page_file_round_trips_parent_and_body() {
        let page = WikiPage {
            title: "Setup".to_string(),
            text: Some("h1. Setup\n\nRun it.".to_string()),
            author: named("Alice"),
            created_on: None,
            updated_on: None,
            version: Some(3),
            comments: None,
            parent: Some(WikiParent {
                title: "Wiki".to_string(),
            }),
            attachments: vec![RedmineAttachment {
                filename: Some("a.png".to_string()),
                content_url: None,
            }],
        };

        let rendered = render_wiki_page_file(&page);
        assert!(rendered.contains("Version: 3\n"));
        assert!(rendered.contains("Created On: Unknown\n"));
        assert!(rendered.contains("Attachments: ['a.png']\n"));

        let parsed = parse_wiki_page_file(&rendered);
        assert_eq!(parsed.title.as_deref(), Some("Setup"));
        assert_eq!(parsed.parent.as_deref(), Some("Wiki"));
        assert_eq!(parsed.body, "h1. Setup\n\nRun it.");
    }

    #[test]
    fn test_parse_wiki_page_file_root_page() {
        let parsed = parse_wiki_page_file("Title: Wiki\nParent Page: None\n\n---\n\nbody");
        assert_eq!(parsed.parent, None);
        assert_eq!(parsed.body, "body");
    }

    #[test]
    fn test_parse_wiki_page_file_without_separator() {
        let parsed = parse_wiki_page_file("just text\nParent Page: Ignored");
        assert_eq!(parsed.title, None);
        assert_eq!(parsed.parent, None);
        assert_eq!(parsed.body, "just text\nParent Page: Ignored");
    }

    #[test]
    fn test_resolve_image_url() {
        let attachments = vec![RedmineAttachment {
            filename: Some("shot.png".to_string()),
            content_url: Some("https://rm.example.com/attachments/download/5/shot.png".to_string()),
        }];
        let base = "https://rm.example.com/redmine/";

        assert_eq!(
            resolve_image_url("shot.png", &attachments, base).as_deref(),
            Some("https://rm.example.com/attachments/download/5/shot.png")
        );
        assert_eq!(
            resolve_image_url("https://cdn.example.com/x.png", &attachments, base).as_deref(),
            Some("https://cdn.example.com/x.png")
        );
        assert_eq!(
            resolve_image_url("/images/logo.png", &attachments, base).as_deref(),
            Some("https://rm.example.com/images/logo.png")
        );
        assert_eq!(resolve_image_url("missing.png", &attachments, base), None);
    }

    #[test]
    fn test_resolve_image_url_joins_against_base() {
        let base = "https://rm.example.com/";

        assert_eq!(
            resolve_image_url("//cdn.example.com/x.png", &[], base).as_deref(),
            Some("https://cdn.example.com/x.png")
        );
        assert_eq!(
            resolve_image_url("/images/a.png?v=2", &[], "https://bot:pw@rm.example.com:8443/redmine")
                .as_deref(),
            Some("https://bot:pw@rm.example.com:8443/images/a.png?v=2")
        );
        assert_eq!(resolve_image_url("/x.png", &[], "not a url"), None);
    }
}
