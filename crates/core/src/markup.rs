//! Textile and HTML helpers applied to wiki pages and issue descriptions
//!
//! Rendering itself is delegated to pandoc; these functions only patch the
//! input and output around it.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};

static HTML_IMG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<img[^>]+src=['"]([^'"]+)['"][^>]*>"#).expect("valid html img regex")
});

static HTML_IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<img [^>]*src=['"]([^'"]+)['"]"#).expect("valid html img src regex")
});

static TEXTILE_IMG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!(.+?)!").expect("valid textile image regex"));

static WIKI_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("valid wiki link regex"));

static NUMBERED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(^\d+\.\s+.+)").expect("valid numbered line regex"));

static BRACED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\{[\s\S]*?\})").expect("valid braced block regex"));

static UPPERCASE_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"((?:[A-Z ]+, ?)+)").expect("valid uppercase list regex"));

static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\r\n|\r|\n){2,}").expect("valid blank line regex"));

static UNSAFE_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("valid file name regex"));

/// Replace `<img>` tags that point at one of the page's attachments with the
/// Confluence storage-format image macro. Other images are left untouched.
pub fn replace_images_with_attachment_macros(html: &str, attachment_names: &[String]) -> String {
    let names: HashSet<&str> = attachment_names.iter().map(String::as_str).collect();

    HTML_IMG
        .replace_all(html, |caps: &Captures| {
            let src = html_escape::decode_html_entities(&caps[1]);
            if names.contains(src.as_ref()) {
                format!(
                    r#"<ac:image><ri:attachment ri:filename="{}"/></ac:image>"#,
                    html_escape::encode_double_quoted_attribute(src.as_ref())
                )
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Normalise the plaintext conventions Redmine users write into something
/// pandoc's textile reader renders sensibly.
pub fn preprocess_redmine_plaintext(text: &str) -> String {
    let text = WIKI_LINK.replace_all(text, "[$1]");
    let text = NUMBERED_LINE.replace_all(&text, "**$1**");
    let text = BRACED_BLOCK.replace_all(&text, "```\n$1\n```");
    let text = UPPERCASE_LIST.replace_all(&text, |caps: &Captures| {
        let items: Vec<String> = caps[1]
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| format!("- {item}"))
            .collect();
        if items.is_empty() {
            caps[0].to_string()
        } else {
            items.join("\n")
        }
    });
    BLANK_RUN.replace_all(&text, "\n\n").into_owned()
}

/// Image references embedded in a wiki page, from both Textile `!src!` and
/// HTML `<img src>` syntax. Sorted and de-duplicated.
pub fn embedded_image_refs(content: &str) -> Vec<String> {
    let mut refs = BTreeSet::new();

    for caps in TEXTILE_IMG.captures_iter(content) {
        if let Some(reference) = clean_textile_image_ref(&caps[1]) {
            refs.insert(reference);
        }
    }
    for caps in HTML_IMG_SRC.captures_iter(content) {
        refs.insert(caps[1].to_string());
    }

    refs.into_iter().collect()
}

/// Strip Textile alignment prefixes and a trailing `(alt text)` from an image
/// reference. Returns `None` for matches that are clearly prose, e.g. the text
/// between two exclamation marks in "Done! Next!".
fn clean_textile_image_ref(raw: &str) -> Option<String> {
    if raw.starts_with(char::is_whitespace) || raw.ends_with(char::is_whitespace) {
        return None;
    }

    let mut reference = raw.trim_start_matches(['<', '>', '=']);
    if reference.ends_with(')') {
        if let Some(open) = reference.rfind('(') {
            reference = &reference[..open];
        }
    }

    let reference = reference.trim();
    if reference.is_empty() {
        None
    } else {
        Some(reference.to_string())
    }
}

/// File name used when storing a page or its attachment directories on disk.
pub fn sanitize_title(title: &str) -> String {
    UNSAFE_FILE_CHARS.replace_all(title, "_").into_owned()
}

/// Last path segment of a path or URL, without any query string.
pub fn file_name_of(reference: &str) -> &str {
    let without_query = reference.split('?').next().unwrap_or(reference);
    without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(without_query)
}
