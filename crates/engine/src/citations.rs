//! Citation validation for generated reports.
//!
//! A report may only link sources that research actually returned. Links to
//! anything else are stripped; markdown links keep their label.

use std::collections::HashSet;
use std::sync::LazyLock;

use delve_core::{Citation, normalize_url};
use regex_lite::{Captures, Regex};

static MARKDOWN_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]*)\]\((https?://[^\s)]+)\)").expect("markdown link pattern is valid")
});

static BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s)\]>]+").expect("bare URL pattern is valid"));

static SOURCES_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^#{1,6}\s*(sources|references)\b").expect("sources heading pattern is valid")
});

/// Result of validating a report's links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub text: String,
    /// URLs removed because they are not in the citation set.
    pub stripped: Vec<String>,
}

/// Strip every `http(s)` URL whose normalized form is not in `allowed`.
pub fn strip_unknown_urls(text: &str, allowed: &HashSet<String>) -> Validated {
    let mut stripped = Vec::new();

    // ── Markdown links: keep the label, drop the target ──
    let text = MARKDOWN_LINK.replace_all(text, |caps: &Captures<'_>| {
        let url = &caps[2];
        if allowed.contains(&normalize_url(url)) {
            caps[0].to_string()
        } else {
            stripped.push(url.to_string());
            caps[1].to_string()
        }
    });

    // ── Bare URLs outside markdown links ──
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in BARE_URL.find_iter(&text) {
        if inside_markdown_link(&text, m.start()) {
            continue;
        }
        let raw = m.as_str();
        let url = raw.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"']);
        out.push_str(&text[last..m.start()]);
        if allowed.contains(&normalize_url(url)) {
            out.push_str(url);
        } else {
            stripped.push(url.to_string());
        }
        out.push_str(&raw[url.len()..]);
        last = m.end();
    }
    out.push_str(&text[last..]);

    Validated {
        text: out,
        stripped,
    }
}

/// A URL directly preceded by `](` is the target of a kept markdown link.
fn inside_markdown_link(text: &str, start: usize) -> bool {
    text[..start].ends_with("](")
}

/// Append a `### Sources` section unless the report already has one.
pub fn ensure_sources_section(text: &str, citations: &[Citation]) -> String {
    if SOURCES_HEADING.is_match(text) || citations.is_empty() {
        return text.to_string();
    }

    let mut out = text.trim_end().to_string();
    out.push_str("\n\n### Sources\n\n");
    for (i, c) in citations.iter().enumerate() {
        out.push_str(&format!("[{}] [{}]({})\n", i + 1, c.title, c.url));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(urls: &[&str]) -> HashSet<String> {
        urls.iter().map(|u| normalize_url(u)).collect()
    }

    #[test]
    fn patterns_compile() {
        assert!(MARKDOWN_LINK.is_match("[x](https://a.example/b)"));
        assert!(BARE_URL.is_match("see https://a.example"));
        assert!(SOURCES_HEADING.is_match("intro\n## References\n"));
    }

    #[test]
    fn unknown_link_is_always_stripped() {
        let v = strip_unknown_urls("Read [this](https://made.up/p).", &HashSet::new());
        assert_eq!(v.text, "Read this.");
        assert_eq!(v.stripped, vec!["https://made.up/p".to_string()]);
    }

    #[test]
    fn keeps_known_links() {
        let text = "Water boils at 100 °C [NIST](https://www.nist.gov/water).";
        let v = strip_unknown_urls(text, &allowed(&["https://nist.gov/water/"]));
        assert_eq!(v.text, text);
        assert!(v.stripped.is_empty());
    }

    #[test]
    fn strips_unknown_markdown_link_keeping_label() {
        let text = "See [a blog](https://made.up/post) for more.";
        let v = strip_unknown_urls(text, &allowed(&["https://nist.gov"]));
        assert_eq!(v.text, "See a blog for more.");
        assert_eq!(v.stripped, vec!["https://made.up/post".to_string()]);
    }

    #[test]
    fn strips_bare_urls_and_keeps_punctuation() {
        let text = "Sources: https://nist.gov, https://made.up/x.";
        let v = strip_unknown_urls(text, &allowed(&["https://nist.gov"]));
        assert_eq!(v.text, "Sources: https://nist.gov, .");
        assert_eq!(v.stripped, vec!["https://made.up/x".to_string()]);
    }

    #[test]
    fn appends_sources_when_missing() {
        let citations = vec![Citation {
            url: "https://nist.gov".into(),
            title: "NIST".into(),
        }];
        let out = ensure_sources_section("# Report\n\nBody", &citations);
        assert!(out.ends_with("### Sources\n\n[1] [NIST](https://nist.gov)\n"));

        let already = "# Report\n\n## References\n- x";
        assert_eq!(ensure_sources_section(already, &citations), already);
    }
}
