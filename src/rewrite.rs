//! Reference extraction and rewriting.
//!
//! Finds every asset reference in an HTML or CSS text and swaps the path for
//! its hashed counterpart from the [`RenameMap`]. Only the path value changes:
//! quotes, other attributes, query strings and fragments are kept byte for
//! byte, and the reference keeps its form (root-relative stays root-relative,
//! `../images/x.jpg` stays relative). Since a hashed file lives in the same
//! directory as its original, swapping the final path segment is enough.
//!
//! Rewriting is idempotent: hashed names are map values, never keys, so a
//! second pass finds nothing to change.

use regex::Regex;
use std::fs;
use std::io;
use std::ops::Range;
use std::path::Path;
use std::sync::LazyLock;

use crate::html::{Tag, Token, tokenize};
use crate::types::RenameMap;

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^'")\s]+))\s*\)"#).unwrap()
});

static CSS_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)@import\s+(?:"([^"]*)"|'([^']*)')"#).unwrap());

/// Prefixes that mark a reference as external. Checked before any path
/// resolution.
const EXTERNAL_PREFIXES: &[&str] = &[
    "http:",
    "https:",
    "//",
    "mailto:",
    "data:",
    "tel:",
    "javascript:",
    "blob:",
    "#",
];

/// Where a reference was found. Determines whether it is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceSite {
    /// `<link rel="stylesheet" href>`
    Stylesheet,
    /// `<script src>`
    Script,
    /// `<img src>`
    Image,
    /// CSS `url(...)`, in a stylesheet, a `<style>` block or a `style` attribute.
    CssUrl,
    /// CSS `@import "..."`.
    CssImport,
    /// Any other `<link href>`: preloads, icons, manifests.
    Link,
    /// `og:image` / `twitter:image` meta content.
    SocialImage,
    /// Any other meta `content`.
    Meta,
    /// Generic `href` on anchors and other elements.
    Href,
    /// Generic `src` on media elements.
    Src,
}

impl ReferenceSite {
    /// Whether a dangling reference of this kind fails the build. Anchors,
    /// media and generic meta content are rewritten when they match but are
    /// not required to resolve.
    pub fn is_verified(self) -> bool {
        matches!(
            self,
            Self::Stylesheet
                | Self::Script
                | Self::Image
                | Self::CssUrl
                | Self::CssImport
                | Self::Link
                | Self::SocialImage
        )
    }
}

/// One reference in a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub site: ReferenceSite,
    pub value: String,
    /// Byte range of the value in the text.
    pub span: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Html,
    Css,
}

impl TextKind {
    pub fn from_path(rel_path: &str) -> Option<Self> {
        let ext = rel_path.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "html" | "htm" => Some(Self::Html),
            "css" => Some(Self::Css),
            _ => None,
        }
    }
}

/// All references in `text`, ordered by position.
pub fn find_references(text: &str, kind: TextKind) -> Vec<Reference> {
    let mut refs = match kind {
        TextKind::Css => css_references(text, 0),
        TextKind::Html => html_references(text),
    };
    refs.sort_by_key(|r| r.span.start);
    refs
}

fn html_references(text: &str) -> Vec<Reference> {
    let mut refs = Vec::new();
    let mut in_style = false;

    for token in tokenize(text) {
        match token {
            Token::StartTag(tag) => {
                in_style = tag.name == "style" && !tag.self_closing;

                let (attr, site) = match tag.name.as_str() {
                    "link" if tag.attr_has_token("rel", "stylesheet") => ("href", ReferenceSite::Stylesheet),
                    "link" => ("href", ReferenceSite::Link),
                    "script" => ("src", ReferenceSite::Script),
                    "img" => ("src", ReferenceSite::Image),
                    "meta" if is_social_image(&tag) => ("content", ReferenceSite::SocialImage),
                    "meta" => ("content", ReferenceSite::Meta),
                    _ if tag.has_attr("href") => ("href", ReferenceSite::Href),
                    _ => ("src", ReferenceSite::Src),
                };
                if let Some(a) = tag.attr(attr)
                    && let (Some(value), Some(span)) = (&a.value, &a.value_span)
                    && !value.trim().is_empty()
                {
                    refs.push(Reference {
                        site,
                        value: value.clone(),
                        span: span.clone(),
                    });
                }

                if let Some(style) = tag.attr("style")
                    && let (Some(value), Some(span)) = (&style.value, &style.value_span)
                {
                    refs.extend(css_references(value, span.start));
                }
            }
            Token::Text(span) if in_style => {
                refs.extend(css_references(&text[span.clone()], span.start));
                in_style = false;
            }
            _ => in_style = false,
        }
    }
    refs
}

fn is_social_image(tag: &Tag) -> bool {
    ["property", "name"].iter().any(|attr| {
        tag.attr_value(attr).is_some_and(|v| {
            let v = v.trim().to_ascii_lowercase();
            matches!(v.as_str(), "og:image" | "og:image:url" | "twitter:image")
        })
    })
}

fn css_references(text: &str, offset: usize) -> Vec<Reference> {
    let mut refs = Vec::new();
    for (re, site) in [(&*CSS_URL, ReferenceSite::CssUrl), (&*CSS_IMPORT, ReferenceSite::CssImport)] {
        for caps in re.captures_iter(text) {
            let Some(m) = caps.iter().skip(1).flatten().next() else {
                continue;
            };
            if m.as_str().trim().is_empty() {
                continue;
            }
            refs.push(Reference {
                site,
                value: m.as_str().to_string(),
                span: offset + m.start()..offset + m.end(),
            });
        }
    }
    refs
}

/// Whether a reference points outside the build tree.
pub fn is_external(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    if EXTERNAL_PREFIXES.iter().any(|p| v.starts_with(p)) {
        return true;
    }
    // Any other URI scheme (`ftp:`, `sms:`, …).
    match v.split_once(':') {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && !scheme.contains('/')
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Split `style.css?v=1#x` into `("style.css", "?v=1#x")`.
pub fn split_suffix(value: &str) -> (&str, &str) {
    match value.find(['?', '#']) {
        Some(i) => value.split_at(i),
        None => (value, ""),
    }
}

/// Canonical build-root-relative key for a reference path (query and
/// fragment already removed), as seen from `file_rel`.
///
/// A leading `/` means the build root; anything else is relative to the
/// referencing file's directory. Returns `None` for empty paths and paths
/// that climb above the root.
pub fn resolve_key(path: &str, file_rel: &str) -> Option<String> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    let joined = match path.strip_prefix('/') {
        Some(rooted) => rooted.to_string(),
        None => match file_rel.rsplit_once('/') {
            Some((dir, _)) => format!("{dir}/{path}"),
            None => path.to_string(),
        },
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

/// The rewritten form of a single reference value, or `None` if it is
/// external or has no mapping.
pub fn rewrite_value(value: &str, file_rel: &str, map: &RenameMap) -> Option<String> {
    if is_external(value) {
        return None;
    }
    let (path, suffix) = split_suffix(value);
    let key = resolve_key(path, file_rel)?;
    let hashed = map.get(&key)?;
    let hashed_name = hashed.rsplit('/').next().unwrap_or(hashed);
    let prefix = match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "",
    };
    Some(format!("{prefix}{hashed_name}{suffix}"))
}

/// Rewrite every mapped reference in `text`. Returns the new text and the
/// number of references changed.
pub fn rewrite_text(text: &str, kind: TextKind, file_rel: &str, map: &RenameMap) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut changed = 0;

    for reference in find_references(text, kind) {
        if reference.span.start < cursor {
            continue;
        }
        if let Some(new_value) = rewrite_value(&reference.value, file_rel, map)
            && new_value != reference.value
        {
            out.push_str(&text[cursor..reference.span.start]);
            out.push_str(&new_value);
            cursor = reference.span.end;
            changed += 1;
        }
    }
    out.push_str(&text[cursor..]);
    (out, changed)
}

/// Rewrite a file under `root` in place. Files are only written when
/// something changed.
pub fn rewrite_file(root: &Path, file_rel: &str, map: &RenameMap) -> io::Result<usize> {
    let Some(kind) = TextKind::from_path(file_rel) else {
        return Ok(0);
    };
    let path = root.join(file_rel);
    let text = fs::read_to_string(&path)?;
    let (rewritten, changed) = rewrite_text(&text, kind, file_rel, map);
    if changed > 0 {
        fs::write(&path, rewritten)?;
    }
    Ok(changed)
}

/// Build-root-relative keys of the stylesheets `css` imports.
pub fn css_imports(css: &str, file_rel: &str) -> Vec<String> {
    find_references(css, TextKind::Css)
        .into_iter()
        .filter(|r| matches!(r.site, ReferenceSite::CssImport | ReferenceSite::CssUrl))
        .filter(|r| !is_external(&r.value))
        .filter_map(|r| resolve_key(split_suffix(&r.value).0, file_rel))
        .filter(|key| key.to_ascii_lowercase().ends_with(".css"))
        .collect()
}
