//! `<head>` reconstruction.
//!
//! Every page's head is rebuilt into a fixed, total order of tag categories.
//! For each managed category the rule is preserve-or-synthesize: a tag the
//! author wrote is kept verbatim and no default is generated; a missing tag
//! gets a default. Anything outside the managed categories is kept, in its
//! original order, in a remainder group.
//!
//! ## Output order
//!
//! 1. charset
//! 2. viewport (preserve only)
//! 3. theme-color
//! 4. title (preserve only)
//! 5. canonical (preserve only)
//! 6. favicon, apple-touch-icon (only when the linked file exists)
//! 7. Open Graph: `og:title`, `og:type`, `og:image`, then other `og:*`
//! 8. Twitter Card: `twitter:card`, `twitter:title`, then other `twitter:*`
//! 9. preloads, sorted as strings
//! 10. stylesheets, original order
//! 11. remainder (comments, `<style>`, `<base>`, unmanaged meta), original order
//! 12. version script
//! 13. other scripts, original order
//! 14. CSP
//!
//! Each tag is emitted on its own line indented by two spaces, so feeding the
//! output back in reproduces it exactly: every synthesized tag is recognized
//! as an existing tag of its category on the second pass.

use maud::html;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SiteConfig;
use crate::html::{Tag, Token, tokenize};
use crate::manifest::ImageManifest;
use crate::types::{AssetKind, RenameMap};
use crate::rewrite::{is_external, resolve_key, split_suffix};
use crate::version::{hashed_version_file, is_version_script};

#[derive(Error, Debug)]
pub enum HeadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no <head> element in {0}")]
    MissingHead(String),
    #[error("<head> in {0} is never closed")]
    UnclosedHead(String),
}

/// Head tag categories in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Category {
    Charset,
    Viewport,
    ThemeColor,
    Title,
    Canonical,
    Favicon,
    TouchIcon,
    OgTitle,
    OgType,
    OgImage,
    OgOther,
    TwitterCard,
    TwitterTitle,
    TwitterOther,
    PreloadStyle,
    PreloadImage,
    PreloadFont,
    PreloadOther,
    Stylesheet,
    Remainder,
    VersionScript,
    Script,
    Csp,
}

impl Category {
    /// At most one tag of these categories survives; later duplicates are
    /// dropped.
    fn is_singular(self) -> bool {
        matches!(
            self,
            Self::Charset
                | Self::Viewport
                | Self::ThemeColor
                | Self::Title
                | Self::Canonical
                | Self::Favicon
                | Self::TouchIcon
                | Self::OgTitle
                | Self::OgType
                | Self::OgImage
                | Self::TwitterCard
                | Self::TwitterTitle
                | Self::Csp
        )
    }

    fn is_preload(self) -> bool {
        matches!(
            self,
            Self::PreloadStyle | Self::PreloadImage | Self::PreloadFont | Self::PreloadOther
        )
    }
}

/// Everything head reconstruction needs besides the page itself. Computed
/// once per build from the finished staging tree.
#[derive(Debug, Clone, Default)]
pub struct HeadContext {
    pub site_name: String,
    pub theme_color: String,
    pub csp_policy: String,
    /// Hashed stylesheet to preload on every page.
    pub css_preload: Option<String>,
    /// Page stem → hashed hero image to preload.
    pub heroes: BTreeMap<String, String>,
    /// Fallback `og:image` for pages without a hero.
    pub social_image: Option<String>,
    /// Hashed font files to preload, already limited and ordered.
    pub font_preloads: Vec<String>,
    pub favicon: Option<String>,
    pub touch_icon: Option<String>,
    /// Hashed version script of this build, if it has one.
    pub version_script: Option<String>,
    /// Tree that icon links must resolve in. Icon tags pointing at files
    /// missing from it are dropped. `None` keeps every icon tag.
    pub output_root: Option<PathBuf>,
}

impl HeadContext {
    /// Gather head inputs from the staging tree at `root`.
    pub fn discover(
        root: &Path,
        config: &SiteConfig,
        map: &RenameMap,
        manifest: &ImageManifest,
    ) -> Self {
        let heroes = config
            .head
            .hero
            .iter()
            .filter_map(|(page, section)| {
                manifest
                    .hero_for(section)
                    .map(|img| (page.clone(), img.to_string()))
            })
            .collect();

        let version_script = hashed_version_file(map, config).map(str::to_string);
        if version_script.is_none() {
            debug!("no hashed version script in this build, omitting version tag");
        }

        Self {
            site_name: config.site.name.clone(),
            theme_color: config.site.theme_color.clone(),
            csp_policy: config.head.csp_policy(),
            css_preload: map
                .first_under(&config.assets.styles_dir, "css")
                .map(str::to_string),
            heroes,
            social_image: manifest.hero_for("landing").map(str::to_string),
            font_preloads: select_fonts(root, map, config.head.font_preloads),
            favicon: existing_asset(root, map, &config.head.favicon),
            touch_icon: existing_asset(root, map, &config.head.touch_icon),
            version_script,
            output_root: Some(root.to_path_buf()),
        }
    }

    fn hero_for_page(&self, page_rel: &str) -> Option<&str> {
        let stem = page_rel
            .rsplit('/')
            .next()
            .unwrap_or(page_rel)
            .trim_end_matches(".html");
        self.heroes.get(stem).map(String::as_str)
    }
}

/// Hashed path of `rel` if the file exists in the build, else `None`.
fn existing_asset(root: &Path, map: &RenameMap, rel: &str) -> Option<String> {
    let path = map.get(rel).unwrap_or(rel);
    if root.join(path).is_file() {
        Some(path.to_string())
    } else {
        debug!("{} not present, skipping", rel);
        None
    }
}

/// Up to `limit` hashed fonts: `.woff2` first, then `.woff`, then the rest,
/// each group by path.
fn select_fonts(root: &Path, map: &RenameMap, limit: usize) -> Vec<String> {
    let rank = |ext: &str| -> u8 {
        match ext {
            "woff2" => 0,
            "woff" => 1,
            _ => 2,
        }
    };
    let mut fonts: Vec<(u8, &str)> = map
        .iter()
        .filter_map(|(original, hashed)| {
            let ext = original.rsplit_once('.')?.1.to_ascii_lowercase();
            (AssetKind::from_extension(&ext) == Some(AssetKind::Font))
                .then(|| (rank(&ext), hashed))
        })
        .filter(|(_, hashed)| root.join(hashed).is_file())
        .collect();
    fonts.sort();
    fonts
        .into_iter()
        .take(limit)
        .map(|(_, hashed)| hashed.to_string())
        .collect()
}

/// Rebuild the first `<head>` of `html`. Everything outside the head block
/// is returned unchanged.
pub fn reconstruct_head(html: &str, page_rel: &str, ctx: &HeadContext) -> Result<String, HeadError> {
    let (open_end, close_start) = locate_head(html, page_rel)?;
    let mut groups: BTreeMap<Category, Vec<String>> = BTreeMap::new();

    for (category, raw) in head_items(&html[open_end..close_start]) {
        if category == Category::VersionScript {
            debug!("{}: dropping stale version script", page_rel);
            continue;
        }
        if matches!(category, Category::Favicon | Category::TouchIcon)
            && let Some(root) = &ctx.output_root
            && icon_is_missing(&raw, page_rel, root)
        {
            warn!("{}: icon target missing, tag dropped: {}", page_rel, raw);
            continue;
        }
        let group = groups.entry(category).or_default();
        if category.is_singular() && !group.is_empty() {
            warn!("{}: duplicate {:?} tag dropped: {}", page_rel, category, raw);
            continue;
        }
        group.push(raw);
    }

    synthesize_defaults(&mut groups, page_rel, ctx);

    let mut preloads = Vec::new();
    let mut tags = Vec::new();
    for (category, group) in groups {
        if category.is_preload() {
            preloads.extend(group);
            continue;
        }
        if category > Category::PreloadOther {
            flush_preloads(&mut preloads, &mut tags);
        }
        tags.extend(group);
    }
    flush_preloads(&mut preloads, &mut tags);

    let mut out = String::with_capacity(html.len() + 512);
    out.push_str(&html[..open_end]);
    for tag in &tags {
        out.push_str("\n  ");
        out.push_str(tag);
    }
    out.push('\n');
    out.push_str(&html[close_start..]);
    Ok(out)
}

/// Whether an icon link points at a local file that is not under `root`.
/// External links and links without an `href` are never missing.
fn icon_is_missing(raw: &str, page_rel: &str, root: &Path) -> bool {
    let href = tokenize(raw).into_iter().find_map(|token| match token {
        Token::StartTag(tag) => tag.attr_value("href").map(str::to_string),
        _ => None,
    });
    let Some(href) = href.filter(|h| !h.trim().is_empty()) else {
        return false;
    };
    if is_external(&href) {
        return false;
    }
    !resolve_key(split_suffix(&href).0, page_rel).is_some_and(|key| root.join(key).is_file())
}

fn flush_preloads(preloads: &mut Vec<String>, tags: &mut Vec<String>) {
    if preloads.is_empty() {
        return;
    }
    preloads.sort();
    tags.append(preloads);
}

fn synthesize_defaults(groups: &mut BTreeMap<Category, Vec<String>>, page_rel: &str, ctx: &HeadContext) {
    let mut fill = |category: Category, tags: Vec<String>| {
        let group = groups.entry(category).or_default();
        if group.is_empty() {
            group.extend(tags);
        }
    };
    let one = |markup: maud::Markup| vec![markup.into_string()];

    fill(Category::Charset, one(html! { meta charset="UTF-8"; }));
    fill(
        Category::ThemeColor,
        one(html! { meta name="theme-color" content=(ctx.theme_color); }),
    );
    if let Some(href) = &ctx.favicon {
        fill(Category::Favicon, one(html! { link rel="icon" href=(href); }));
    }
    if let Some(href) = &ctx.touch_icon {
        fill(
            Category::TouchIcon,
            one(html! { link rel="apple-touch-icon" href=(href); }),
        );
    }

    fill(
        Category::OgTitle,
        one(html! { meta property="og:title" content=(ctx.site_name); }),
    );
    fill(
        Category::OgType,
        one(html! { meta property="og:type" content="website"; }),
    );
    let hero = ctx.hero_for_page(page_rel);
    if let Some(image) = hero.or(ctx.social_image.as_deref()) {
        let content = format!("/{image}");
        fill(
            Category::OgImage,
            one(html! { meta property="og:image" content=(content); }),
        );
    }
    fill(
        Category::TwitterCard,
        one(html! { meta name="twitter:card" content="summary_large_image"; }),
    );
    fill(
        Category::TwitterTitle,
        one(html! { meta name="twitter:title" content=(ctx.site_name); }),
    );

    if let Some(href) = &ctx.css_preload {
        fill(
            Category::PreloadStyle,
            one(html! { link rel="preload" href=(href) as="style"; }),
        );
    }
    if let Some(href) = hero {
        fill(
            Category::PreloadImage,
            one(html! { link rel="preload" href=(href) as="image"; }),
        );
    }
    let fonts: Vec<String> = ctx
        .font_preloads
        .iter()
        .map(|href| {
            let font_type = format!("font/{}", href.rsplit('.').next().unwrap_or("woff2"));
            html! { link rel="preload" href=(href) as="font" type=(font_type) crossorigin; }
                .into_string()
        })
        .collect();
    fill(Category::PreloadFont, fonts);

    if let Some(src) = &ctx.version_script {
        fill(Category::VersionScript, one(html! { script src=(src) {} }));
    }
    fill(
        Category::Csp,
        one(html! { meta http-equiv="Content-Security-Policy" content=(ctx.csp_policy); }),
    );
}

/// Byte offsets of the end of `<head …>` and the start of `</head>`.
fn locate_head(html: &str, page_rel: &str) -> Result<(usize, usize), HeadError> {
    let tokens = tokenize(html);
    let open = tokens.iter().position(|t| matches!(t, Token::StartTag(tag) if tag.name == "head"));
    let Some(open) = open else {
        return Err(HeadError::MissingHead(page_rel.to_string()));
    };
    let open_end = tokens[open].span().end;
    tokens[open + 1..]
        .iter()
        .find_map(|t| match t {
            Token::EndTag { name, span } if name == "head" => Some(span.start),
            _ => None,
        })
        .map(|close_start| (open_end, close_start))
        .ok_or_else(|| HeadError::UnclosedHead(page_rel.to_string()))
}

/// Split head content into categorized raw items, in source order.
fn head_items(content: &str) -> Vec<(Category, String)> {
    let tokens = tokenize(content);
    let mut items = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        match &tokens[i] {
            Token::Text(span) => {
                let text = content[span.clone()].trim();
                if !text.is_empty() {
                    items.push((Category::Remainder, text.to_string()));
                }
            }
            Token::StartTag(tag) => {
                let end = element_end(&tokens, i, tag);
                let start = tag.span.start;
                let stop = tokens[end].span().end;
                items.push((classify(tag), content[start..stop].to_string()));
                i = end;
            }
            other => {
                items.push((Category::Remainder, content[other.span()].to_string()));
            }
        }
        i += 1;
    }
    items
}

const VOID_ELEMENTS: &[&str] = &["base", "link", "meta", "br", "hr", "img", "input", "source"];

/// Index of the token that closes the element opened at `start`. Void and
/// self-closing tags, and elements never closed, end at their own tag.
fn element_end(tokens: &[Token], start: usize, tag: &Tag) -> usize {
    if tag.self_closing || VOID_ELEMENTS.contains(&tag.name.as_str()) {
        return start;
    }
    let mut depth = 0;
    for (j, token) in tokens.iter().enumerate().skip(start + 1) {
        match token {
            Token::StartTag(t) if t.name == tag.name && !t.self_closing => depth += 1,
            Token::EndTag { name, .. } if *name == tag.name => {
                if depth == 0 {
                    return j;
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    start
}

fn classify(tag: &Tag) -> Category {
    match tag.name.as_str() {
        "meta" => classify_meta(tag),
        "title" => Category::Title,
        "link" => {
            if tag.attr_has_token("rel", "canonical") {
                Category::Canonical
            } else if tag.attr_has_token("rel", "apple-touch-icon") {
                Category::TouchIcon
            } else if tag.attr_has_token("rel", "icon") {
                Category::Favicon
            } else if tag.attr_has_token("rel", "stylesheet") {
                Category::Stylesheet
            } else if tag.attr_has_token("rel", "preload") {
                match tag.attr_value("as").map(|v| v.trim().to_ascii_lowercase()).as_deref() {
                    Some("style") => Category::PreloadStyle,
                    Some("image") => Category::PreloadImage,
                    Some("font") => Category::PreloadFont,
                    _ => Category::PreloadOther,
                }
            } else if tag.attr_has_token("rel", "modulepreload") {
                Category::PreloadOther
            } else {
                Category::Remainder
            }
        }
        "script" => match tag.attr_value("src") {
            Some(src) if is_version_script(src) => Category::VersionScript,
            _ => Category::Script,
        },
        _ => Category::Remainder,
    }
}

fn classify_meta(tag: &Tag) -> Category {
    if tag.has_attr("charset") {
        return Category::Charset;
    }
    if tag.attr_is("http-equiv", "content-security-policy") {
        return Category::Csp;
    }
    let key = tag
        .attr_value("property")
        .or_else(|| tag.attr_value("name"))
        .map(|k| k.trim().to_ascii_lowercase());
    match key.as_deref() {
        Some("viewport") => Category::Viewport,
        Some("theme-color") => Category::ThemeColor,
        Some("og:title") => Category::OgTitle,
        Some("og:type") => Category::OgType,
        Some("og:image") => Category::OgImage,
        Some(k) if k.starts_with("og:") => Category::OgOther,
        Some("twitter:card") => Category::TwitterCard,
        Some("twitter:title") => Category::TwitterTitle,
        Some(k) if k.starts_with("twitter:") => Category::TwitterOther,
        _ => Category::Remainder,
    }
}
