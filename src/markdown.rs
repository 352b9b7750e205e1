//! HTML to Markdown conversion for chat providers
//!
//! Only `a`, `p`, `ul`, `li`, `strong`, `small`, `br` and `pre` are converted.
//! Every other tag is stripped and its text kept.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

const ALLOWED_TAGS: [&str; 8] = ["a", "p", "ul", "li", "strong", "small", "br", "pre"];

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("invalid comment pattern"));

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?([A-Za-z][A-Za-z0-9]*)\b[^>]*>").expect("invalid tag pattern")
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("invalid whitespace pattern"));

static LINK_SAFETY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s+target=["']_blank["']\s+rel=["']noopener noreferrer["']"#)
        .expect("invalid link attribute pattern")
});

static MARKDOWN_SPECIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([*_\[\]\\])").expect("invalid markdown pattern"));

static ANCHOR_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<a\s[^>]*>").expect("invalid anchor pattern"));

static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhref=["']([^"'<>]+)["']"#).expect("invalid href pattern")
});

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\btitle=["']([^"'<>]+)["']"#).expect("invalid title pattern")
});

// href first, then title, each quoted
static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"<a href=["']([^"'<>]+)["'] title=["']([^"'<>]+)["'][^>]*>(?:[^<]*</a>)?"#,
    )
    .expect("invalid anchor pattern")
});

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^&(?:amp|lt|gt|quot|apos|#[0-9]+|#[xX][0-9A-Fa-f]+);")
        .expect("invalid entity pattern")
});

/// A link found in an anchor tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    pub title: String,
}

/// Escapes `&`, `<` and `>`. Quotes and the XML entities or numeric
/// character references already present are left alone.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (idx, ch) in text.char_indices() {
        match ch {
            '&' if ENTITY_RE.is_match(&text[idx..]) => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Converts newlines to `<br>` tags.
pub fn nl2br(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "<br>\n")
}

fn strip_tags(html: &str) -> String {
    let html = COMMENT_RE.replace_all(html, "");
    TAG_RE
        .replace_all(&html, |caps: &Captures| {
            let name = caps[1].to_ascii_lowercase();
            match name.as_str() {
                // anchors keep their attributes for link extraction
                "a" => caps[0].to_string(),
                "br" => "<br>".to_string(),
                _ if ALLOWED_TAGS.contains(&name.as_str()) => {
                    if caps[0].starts_with("</") {
                        format!("</{}>", name)
                    } else {
                        format!("<{}>", name)
                    }
                }
                _ => String::new(),
            }
        })
        .into_owned()
}

fn escape_markdown(text: &str) -> String {
    let escaped = MARKDOWN_SPECIAL_RE.replace_all(text, r"\${1}");
    match escaped.strip_prefix('#') {
        Some(rest) => format!("\\#{}", rest),
        None => escaped.into_owned(),
    }
}

/// Collects the `href`/`title` pairs of every anchor, one per distinct href.
pub fn extract_links(html: &str) -> Vec<Link> {
    let mut links: Vec<Link> = Vec::new();
    for tag in ANCHOR_OPEN_RE.find_iter(html) {
        let (Some(href), Some(title)) = (
            HREF_RE.captures(tag.as_str()),
            TITLE_RE.captures(tag.as_str()),
        ) else {
            continue;
        };
        if links.iter().any(|l| l.href == href[1]) {
            continue;
        }
        links.push(Link {
            href: href[1].to_string(),
            title: title[1].to_string(),
        });
    }
    links
}

fn convert_links(text: &str) -> String {
    let links: HashMap<String, String> = extract_links(text)
        .into_iter()
        .map(|l| (l.href, l.title))
        .collect();

    ANCHOR_RE
        .replace_all(text, |caps: &Captures| {
            let (href, title) = (&caps[1], &caps[2]);
            match links.get(href) {
                Some(known) if known == title => format!("[{}]({})", title, href),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Converts a constrained HTML message into Markdown.
pub fn html_to_markdown(html: &str) -> String {
    let markdown = strip_tags(html);
    let markdown = WHITESPACE_RE.replace_all(&markdown, " ");
    let markdown = LINK_SAFETY_RE.replace_all(&markdown, "");

    // escape before any markdown syntax is inserted
    let markdown = escape_markdown(&markdown);
    let markdown = convert_links(&markdown);

    let markdown = markdown
        .replace("<p>", "")
        .replace("</p>", "\n")
        .replace("<ul>", "")
        .replace("</ul>", "\n")
        .replace("<li>", "- ")
        .replace("</li>", "\n")
        .replace("<strong>", "**")
        .replace("</strong>", "**")
        .replace("<small>", "<sub><sup>")
        .replace("</small>", "</sup></sub>")
        .replace("<br> ", "\n")
        .replace("<br>", "\n")
        .replace("<pre>", "```\n")
        .replace("</pre>", "```\n\n");

    escape_html(markdown.trim_start_matches('\n'))
}
