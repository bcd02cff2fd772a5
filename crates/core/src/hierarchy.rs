//! Parent-before-child page creation
//!
//! Wiki pages reference their parent by title, and a child can only be created
//! once the remote id of its parent is known. [`HierarchyResolver`] creates all
//! roots first and then sweeps the remaining pages in passes, placing every
//! page whose parent was placed in an earlier pass, until nothing is left or a
//! pass places nothing.
//!
//! All remote work goes through the [`PageService`], [`AttachmentUploader`] and
//! [`MarkupConverter`] traits so the resolver can be driven by in-memory fakes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::markup;

/// Remote identifier of a created page
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A page to materialise on the remote service
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub title: String,
    pub parent_title: Option<String>,
    pub body_source: String,
    pub attachment_paths: Vec<PathBuf>,
}

impl PageRecord {
    pub fn new(title: impl Into<String>, parent_title: Option<&str>) -> Self {
        Self {
            title: title.into(),
            parent_title: parent_title.map(str::to_string),
            body_source: String::new(),
            attachment_paths: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body_source = body.into();
        self
    }

    pub fn with_attachments(mut self, paths: Vec<PathBuf>) -> Self {
        self.attachment_paths = paths;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_title.is_none()
    }

    /// File names of the attachments, used to rewrite `<img>` tags
    pub fn attachment_file_names(&self) -> Vec<String> {
        self.attachment_paths
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }
}

/// Failure reported by a [`PageService`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("page '{title}' already exists")]
    AlreadyExists { title: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UploadError {
    #[error("cannot read {path}: {message}")]
    Read { path: String, message: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("conversion failed: {0}")]
pub struct ConvertError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// Zero-byte file, not sent
    SkippedEmpty,
}

/// Remote content service pages are created on
#[allow(async_fn_in_trait)]
pub trait PageService {
    /// Create a page, failing with [`RemoteError::AlreadyExists`] when a page
    /// with this title is already present.
    async fn create_page(
        &self,
        title: &str,
        parent: Option<&PageId>,
        body: &str,
    ) -> Result<PageId, RemoteError>;

    async fn find_page_id_by_title(&self, title: &str) -> Result<Option<PageId>, RemoteError>;
}

#[allow(async_fn_in_trait)]
pub trait AttachmentUploader {
    async fn upload(&self, page: &PageId, path: &Path) -> Result<UploadOutcome, UploadError>;
}

/// Converts page source markup into the remote body format
#[allow(async_fn_in_trait)]
pub trait MarkupConverter {
    async fn convert(&self, source: &str) -> Result<String, ConvertError>;
}

/// Title to remote id of every page placed during a run
pub type CreatedPageIndex = BTreeMap<String, PageId>;

#[derive(Debug, Clone, PartialEq)]
pub struct FailedPage {
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachmentStats {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome of one resolution run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionReport {
    pub created: CreatedPageIndex,
    /// Titles that already existed remotely and were adopted by lookup
    pub reused: BTreeSet<String>,
    pub failed: Vec<FailedPage>,
    /// Pages whose parent never got placed (missing, cyclic or failed parent)
    pub unplaced: Vec<String>,
    /// Passes over the pending set. Root creation is not a pass, so a
    /// Root/Child/Grandchild chain reports 2 and a lone orphan reports 1.
    pub passes: usize,
    pub attachments: AttachmentStats,
}

impl ResolutionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.unplaced.is_empty()
    }

    fn fail(&mut self, title: &str, reason: impl Into<String>) {
        let reason = reason.into();
        log::warn!("Failed to place page '{title}': {reason}");
        self.failed.push(FailedPage {
            title: title.to_string(),
            reason,
        });
    }
}

pub struct HierarchyResolver<'a, S, U, C> {
    service: &'a S,
    uploader: &'a U,
    converter: &'a C,
}

impl<'a, S, U, C> HierarchyResolver<'a, S, U, C>
where
    S: PageService,
    U: AttachmentUploader,
    C: MarkupConverter,
{
    pub fn new(service: &'a S, uploader: &'a U, converter: &'a C) -> Self {
        Self {
            service,
            uploader,
            converter,
        }
    }

    /// Place every record whose ancestry can be resolved.
    ///
    /// Per-page failures never abort the run; they end up in
    /// [`ResolutionReport::failed`] or [`ResolutionReport::unplaced`].
    pub async fn resolve(&self, records: Vec<PageRecord>) -> ResolutionReport {
        let mut report = ResolutionReport::default();
        let mut roots: BTreeMap<String, PageRecord> = BTreeMap::new();
        let mut pending: BTreeMap<String, PageRecord> = BTreeMap::new();

        for record in records {
            if roots.contains_key(&record.title) || pending.contains_key(&record.title) {
                report.fail(&record.title, "duplicate title, keeping the first record");
                continue;
            }
            let bucket = if record.is_root() {
                &mut roots
            } else {
                &mut pending
            };
            bucket.insert(record.title.clone(), record);
        }

        log::info!(
            "Resolving {} root page(s) and {} child page(s)",
            roots.len(),
            pending.len()
        );

        for record in roots.values() {
            self.place(record, None, &mut report).await;
        }

        let max_passes = pending.len();
        while !pending.is_empty() && report.passes < max_passes {
            report.passes += 1;

            // Only parents placed before this pass started count, so each
            // generation of the tree lands in its own pass.
            let eligible: Vec<(String, PageId)> = pending
                .values()
                .filter_map(|record| {
                    let parent = record.parent_title.as_deref()?;
                    let parent_id = report.created.get(parent)?;
                    Some((record.title.clone(), parent_id.clone()))
                })
                .collect();

            if eligible.is_empty() {
                log::debug!("Pass {} placed nothing, stopping", report.passes);
                break;
            }

            log::debug!(
                "Pass {}: {} of {} pending page(s) eligible",
                report.passes,
                eligible.len(),
                pending.len()
            );

            for (title, parent_id) in eligible {
                if let Some(record) = pending.remove(&title) {
                    self.place(&record, Some(&parent_id), &mut report).await;
                }
            }
        }

        for (title, record) in pending {
            log::warn!(
                "Could not place '{title}': parent '{}' was never created",
                record.parent_title.as_deref().unwrap_or_default()
            );
            report.unplaced.push(title);
        }

        report
    }

    async fn place(
        &self,
        record: &PageRecord,
        parent: Option<&PageId>,
        report: &mut ResolutionReport,
    ) {
        let converted = match self.converter.convert(&record.body_source).await {
            Ok(converted) => converted,
            Err(e) => {
                report.fail(&record.title, e.to_string());
                return;
            }
        };
        let body = markup::replace_images_with_attachment_macros(
            &converted,
            &record.attachment_file_names(),
        );

        let page_id = match self.service.create_page(&record.title, parent, &body).await {
            Ok(id) => {
                log::info!("Created page '{}' ({id})", record.title);
                id
            }
            Err(RemoteError::AlreadyExists { .. }) => {
                match self.service.find_page_id_by_title(&record.title).await {
                    Ok(Some(id)) => {
                        log::info!("Page '{}' already exists ({id}), reusing it", record.title);
                        report.reused.insert(record.title.clone());
                        id
                    }
                    Ok(None) => {
                        report.fail(&record.title, "already exists but no id was found");
                        return;
                    }
                    Err(e) => {
                        report.fail(&record.title, format!("lookup after conflict: {e}"));
                        return;
                    }
                }
            }
            Err(e) => {
                report.fail(&record.title, e.to_string());
                return;
            }
        };

        report.created.insert(record.title.clone(), page_id.clone());
        self.upload_attachments(record, &page_id, report).await;
    }

    async fn upload_attachments(
        &self,
        record: &PageRecord,
        page_id: &PageId,
        report: &mut ResolutionReport,
    ) {
        for path in &record.attachment_paths {
            match self.uploader.upload(page_id, path).await {
                Ok(UploadOutcome::Uploaded) => {
                    log::debug!("Uploaded {} to '{}'", path.display(), record.title);
                    report.attachments.uploaded += 1;
                }
                Ok(UploadOutcome::SkippedEmpty) => {
                    log::warn!("Skipped empty attachment {}", path.display());
                    report.attachments.skipped += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Failed to upload {} to '{}': {e}",
                        path.display(),
                        record.title
                    );
                    report.attachments.failed += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeService {
        existing: Mutex<BTreeMap<String, PageId>>,
        calls: Mutex<Vec<(String, Option<String>)>>,
        bodies: Mutex<BTreeMap<String, String>>,
        fail_titles: HashSet<String>,
        hide_existing: bool,
    }

    impl FakeService {
        fn failing(titles: &[&str]) -> Self {
            Self {
                fail_titles: titles.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            }
        }

        fn with_existing(titles: &[&str]) -> Self {
            let service = Self::default();
            {
                let mut existing = service.existing.lock().unwrap();
                for title in titles {
                    existing.insert(title.to_string(), PageId::new(format!("old-{title}")));
                }
            }
            service
        }

        fn call_order(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(t, _)| t.clone())
                .collect()
        }
    }

    impl PageService for FakeService {
        async fn create_page(
            &self,
            title: &str,
            parent: Option<&PageId>,
            body: &str,
        ) -> Result<PageId, RemoteError> {
            self.calls
                .lock()
                .unwrap()
                .push((title.to_string(), parent.map(|p| p.to_string())));

            if self.fail_titles.contains(title) {
                return Err(RemoteError::Http {
                    status: 500,
                    message: "boom".to_string(),
                });
            }

            let mut existing = self.existing.lock().unwrap();
            if existing.contains_key(title) {
                return Err(RemoteError::AlreadyExists {
                    title: title.to_string(),
                });
            }
            let id = PageId::new(format!("id-{title}"));
            existing.insert(title.to_string(), id.clone());
            self.bodies
                .lock()
                .unwrap()
                .insert(title.to_string(), body.to_string());
            Ok(id)
        }

        async fn find_page_id_by_title(&self, title: &str) -> Result<Option<PageId>, RemoteError> {
            if self.hide_existing {
                return Ok(None);
            }
            Ok(self.existing.lock().unwrap().get(title).cloned())
        }
    }

    #[derive(Default)]
    struct FakeUploader {
        uploads: Mutex<Vec<(String, PathBuf)>>,
    }

    impl AttachmentUploader for FakeUploader {
        async fn upload(&self, page: &PageId, path: &Path) -> Result<UploadOutcome, UploadError> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            if name.starts_with("empty") {
                return Ok(UploadOutcome::SkippedEmpty);
            }
            if name.starts_with("broken") {
                return Err(UploadError::Remote(RemoteError::Http {
                    status: 413,
                    message: "too large".to_string(),
                }));
            }
            self.uploads
                .lock()
                .unwrap()
                .push((page.to_string(), path.to_path_buf()));
            Ok(UploadOutcome::Uploaded)
        }
    }

    /// Wraps the body in a paragraph, fails on bodies containing "bad"
    struct FakeConverter;

    impl MarkupConverter for FakeConverter {
        async fn convert(&self, source: &str) -> Result<String, ConvertError> {
            if source.contains("bad") {
                return Err(ConvertError("pandoc exited with status 1".to_string()));
            }
            Ok(format!("<p>{source}</p>"))
        }
    }

    async fn run(service: &FakeService, records: Vec<PageRecord>) -> ResolutionReport {
        let uploader = FakeUploader::default();
        HierarchyResolver::new(service, &uploader, &FakeConverter)
            .resolve(records)
            .await
    }

    #[tokio::test]
    async fn test_chain_is_created_one_generation_per_pass() {
        let service = FakeService::default();
        let records = vec![
            PageRecord::new("Grandchild", Some("Child")),
            PageRecord::new("Child", Some("Root")),
            PageRecord::new("Root", None),
        ];

        let report = run(&service, records).await;

        assert_eq!(report.created.len(), 3);
        assert!(report.unplaced.is_empty());
        assert!(report.is_complete());
        assert_eq!(report.passes, 2);
        assert_eq!(service.call_order(), vec!["Root", "Child", "Grandchild"]);

        let calls = service.calls.lock().unwrap().clone();
        assert_eq!(calls[0].1, None);
        assert_eq!(calls[1].1.as_deref(), Some("id-Root"));
        assert_eq!(calls[2].1.as_deref(), Some("id-Child"));
    }

    #[tokio::test]
    async fn test_acyclic_tree_places_everything() {
        let service = FakeService::default();
        let records = vec![
            PageRecord::new("D", Some("B")),
            PageRecord::new("E", Some("C")),
            PageRecord::new("B", Some("A")),
            PageRecord::new("F", Some("E")),
            PageRecord::new("A", None),
            PageRecord::new("C", Some("A")),
            PageRecord::new("Other", None),
        ];

        let report = run(&service, records).await;

        assert_eq!(report.created.len(), 7);
        assert!(report.unplaced.is_empty());
        assert_eq!(report.passes, 3);

        let order = service.call_order();
        let pos = |t: &str| order.iter().position(|o| o == t).unwrap();
        assert!(pos("A") < pos("B"));
        assert!(pos("B") < pos("D"));
        assert!(pos("C") < pos("E"));
        assert!(pos("E") < pos("F"));
    }

    #[tokio::test]
    async fn test_cycle_is_left_unplaced() {
        let service = FakeService::default();
        let records = vec![
            PageRecord::new("A", Some("B")),
            PageRecord::new("B", Some("A")),
            PageRecord::new("Root", None),
        ];

        let report = run(&service, records).await;

        assert_eq!(report.created.keys().collect::<Vec<_>>(), vec!["Root"]);
        assert_eq!(report.unplaced, vec!["A".to_string(), "B".to_string()]);
        assert!(!report.is_complete());
        assert_eq!(service.call_order(), vec!["Root"]);
    }

    #[tokio::test]
    async fn test_orphan_stops_after_one_pass() {
        let service = FakeService::default();
        let records = vec![PageRecord::new("Orphan", Some("Missing"))];

        let report = run(&service, records).await;

        assert!(report.created.is_empty());
        assert_eq!(report.unplaced, vec!["Orphan".to_string()]);
        assert_eq!(report.passes, 1);
        assert!(service.call_order().is_empty());
    }

    #[tokio::test]
    async fn test_self_parent_is_unplaced() {
        let service = FakeService::default();
        let report = run(&service, vec![PageRecord::new("Loop", Some("Loop"))]).await;
        assert_eq!(report.unplaced, vec!["Loop".to_string()]);
    }

    #[tokio::test]
    async fn test_second_run_reuses_existing_pages() {
        let service = FakeService::default();
        let records = vec![
            PageRecord::new("Root", None),
            PageRecord::new("Child", Some("Root")),
            PageRecord::new("Grandchild", Some("Child")),
        ];

        let first = run(&service, records.clone()).await;
        let second = run(&service, records).await;

        assert_eq!(
            first.created.keys().collect::<Vec<_>>(),
            second.created.keys().collect::<Vec<_>>()
        );
        assert_eq!(first.created, second.created);
        assert!(first.reused.is_empty());
        assert_eq!(second.reused.len(), 3);
        assert!(second.failed.is_empty());
    }

    #[tokio::test]
    async fn test_existing_parent_id_is_used_for_children() {
        let service = FakeService::with_existing(&["Root"]);
        let records = vec![
            PageRecord::new("Root", None),
            PageRecord::new("Child", Some("Root")),
        ];

        let report = run(&service, records).await;

        assert_eq!(report.created["Root"], PageId::new("old-Root"));
        let calls = service.calls.lock().unwrap().clone();
        assert_eq!(calls[1], ("Child".to_string(), Some("old-Root".to_string())));
    }

    #[tokio::test]
    async fn test_existing_page_without_id_is_failed() {
        let service = FakeService {
            hide_existing: true,
            ..FakeService::with_existing(&["Root"])
        };
        let records = vec![
            PageRecord::new("Root", None),
            PageRecord::new("Child", Some("Root")),
        ];

        let report = run(&service, records).await;

        assert!(report.created.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].title, "Root");
        assert_eq!(report.unplaced, vec!["Child".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_page_is_not_retried() {
        let service = FakeService::failing(&["Child"]);
        let records = vec![
            PageRecord::new("Root", None),
            PageRecord::new("Child", Some("Root")),
            PageRecord::new("Grandchild", Some("Child")),
        ];

        let report = run(&service, records).await;

        assert_eq!(report.created.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].title, "Child");
        assert!(report.failed[0].reason.contains("HTTP 500"));
        assert_eq!(report.unplaced, vec!["Grandchild".to_string()]);
        let child_attempts = service
            .call_order()
            .iter()
            .filter(|t| t.as_str() == "Child")
            .count();
        assert_eq!(child_attempts, 1);
    }

    #[tokio::test]
    async fn test_converter_failure_fails_page() {
        let service = FakeService::default();
        let records = vec![PageRecord::new("Root", None).with_body("bad markup")];

        let report = run(&service, records).await;

        assert!(report.created.is_empty());
        assert!(report.failed[0].reason.contains("pandoc exited"));
        assert!(service.call_order().is_empty());
    }

    #[tokio::test]
    async fn test_body_images_become_attachment_macros() {
        let service = FakeService::default();
        let records = vec![PageRecord::new("Root", None)
            .with_body(r#"<img src="shot.png">"#)
            .with_attachments(vec![PathBuf::from("Root_images/shot.png")])];

        run(&service, records).await;

        let bodies = service.bodies.lock().unwrap();
        assert_eq!(
            bodies["Root"],
            r#"<p><ac:image><ri:attachment ri:filename="shot.png"/></ac:image></p>"#
        );
    }

    #[tokio::test]
    async fn test_attachment_problems_do_not_fail_the_page() {
        let service = FakeService::default();
        let uploader = FakeUploader::default();
        let records = vec![PageRecord::new("Root", None).with_attachments(vec![
            PathBuf::from("a/ok.png"),
            PathBuf::from("a/empty.txt"),
            PathBuf::from("a/broken.pdf"),
        ])];

        let report = HierarchyResolver::new(&service, &uploader, &FakeConverter)
            .resolve(records)
            .await;

        assert!(report.is_complete());
        assert_eq!(
            report.attachments,
            AttachmentStats {
                uploaded: 1,
                skipped: 1,
                failed: 1
            }
        );
        let uploads = uploader.uploads.lock().unwrap();
        assert_eq!(uploads[0], ("id-Root".to_string(), PathBuf::from("a/ok.png")));
    }

    #[tokio::test]
    async fn test_duplicate_titles_keep_first_record() {
        let service = FakeService::default();
        let records = vec![
            PageRecord::new("Root", None).with_body("first"),
            PageRecord::new("Root", Some("Elsewhere")).with_body("second"),
        ];

        let report = run(&service, records).await;

        assert_eq!(report.created.len(), 1);
        assert!(report.unplaced.is_empty());
        assert_eq!(report.failed[0].title, "Root");
        assert_eq!(service.bodies.lock().unwrap()["Root"], "<p>first</p>");
    }

    #[test]
    fn test_attachment_file_names() {
        let record = PageRecord::new("P", None).with_attachments(vec![
            PathBuf::from("dir/a.png"),
            PathBuf::from("other/b c.pdf"),
        ]);
        assert_eq!(record.attachment_file_names(), vec!["a.png", "b c.pdf"]);
    }
}
