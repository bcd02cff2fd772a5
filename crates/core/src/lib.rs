//! Core library for rmigrate
//!
//! This crate implements the **Functional Core** of the rmigrate application,
//! following the Functional Core - Imperative Shell architectural pattern.
//!
//! # Architecture Overview
//!
//! The rmigrate project uses a two-crate architecture to enforce separation of concerns:
//!
//! - **`rmigrate_core`** (this crate): Data models, pure transformations and the
//!   page hierarchy resolver
//! - **`rmigrate`**: HTTP clients, file system export/import, the pandoc process and
//!   the CLI (the Imperative Shell)
//!
//! ## Functional Core Principles
//!
//! - **Pure functions**: markup rewriting, Redmine text rendering, ADF building and
//!   error classification depend only on their arguments
//! - **Collaborators behind traits**: the [`hierarchy`] resolver never performs I/O
//!   itself; it drives the [`hierarchy::PageService`], [`hierarchy::AttachmentUploader`]
//!   and [`hierarchy::MarkupConverter`] implementations it is handed
//! - **Testable**: everything here is tested with fixture data and in-memory fakes
//!
//! # Module Organization
//!
//! - [`atlassian`]: Confluence and Jira request payloads, response models and error
//!   classification
//! - [`hierarchy`]: Parent-before-child page creation with idempotent recovery
//! - [`markup`]: Textile/HTML helpers used on page and issue bodies
//! - [`redmine`]: Redmine API models and the on-disk export formats
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use rmigrate_core::hierarchy::{HierarchyResolver, PageRecord};
//!
//! let resolver = HierarchyResolver::new(&confluence, &confluence, &pandoc);
//! let report = resolver.resolve(records).await;
//!
//! for title in &report.unplaced {
//!     println!("could not place {title}");
//! }
//! ```

pub mod atlassian;
pub mod hierarchy;
pub mod markup;
pub mod redmine;
