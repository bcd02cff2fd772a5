/// Atlassian-related transformations (Confluence, Jira)
///
/// Request payloads, response models and error classification for the two
/// import targets. All functions are free of I/O operations and testable with
/// fixture data.
pub mod confluence;
pub mod jira;
