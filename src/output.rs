//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Check
//!
//! ```text
//! Pages
//! 001 about.html
//! 002 index.html
//!
//! Fragments
//!     partials/footer.html
//!
//! Assets
//!     2 styles, 1 script, 4 images, 1 font
//!
//! Images
//!     landing (1 image)
//!     main (1 image)
//!     001 The Red Bike (1 image)
//!         Source: images/projects/red-bike/
//! ```
//!
//! ## Build
//!
//! ```text
//! Hashed (2 styles, 3 scripts, 4 images, 1 font)
//!     css/style.css → css/style.3f9a1c2b.css
//!     js/app.js → js/app.0c4e7d21.js
//!
//! References
//!     12 rewritten, 19 verified
//!
//! Built 10 assets, 3 pages, 1 fragment → docs (48.2 KB) in 0.04s
//! Version 8d1f0a3b9c2e
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::pipeline::{BuildSummary, CheckReport};
use crate::types::AssetKind;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 image`, `2 images`.
fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// Human-readable byte count with one decimal.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

// ============================================================================
// Check
// ============================================================================

/// Format the pre-flight report: what a build would process.
pub fn format_check_output(report: &CheckReport) -> Vec<String> {
    let mut lines = vec!["Pages".to_string()];
    for (i, page) in report.pages.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), page));
    }

    if !report.fragments.is_empty() {
        lines.push(String::new());
        lines.push("Fragments".to_string());
        for fragment in &report.fragments {
            lines.push(format!("{}{}", indent(1), fragment));
        }
    }

    let count = |kind: AssetKind| report.assets.iter().filter(|a| a.kind == kind).count();
    lines.push(String::new());
    lines.push("Assets".to_string());
    lines.push(format!(
        "{}{}, {}, {}, {}",
        indent(1),
        plural(count(AssetKind::Style), "style"),
        plural(count(AssetKind::Script), "script"),
        plural(count(AssetKind::Image), "image"),
        plural(count(AssetKind::Font), "font"),
    ));

    let manifest = &report.manifest;
    lines.push(String::new());
    lines.push("Images".to_string());
    lines.push(format!("{}landing ({})", indent(1), plural(manifest.landing.len(), "image")));
    lines.push(format!("{}main ({})", indent(1), plural(manifest.main.len(), "image")));
    for (i, project) in manifest.projects.iter().enumerate() {
        lines.push(format!(
            "{}{} {} ({})",
            indent(1),
            format_index(i + 1),
            project.title,
            plural(project.images.len(), "image")
        ));
        lines.push(format!(
            "{}Source: images/projects/{}/",
            indent(2),
            project.slug
        ));
    }
    lines
}

pub fn print_check_output(report: &CheckReport) {
    for line in format_check_output(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Build
// ============================================================================

/// Format the summary of a successful build.
pub fn format_build_summary(summary: &BuildSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "Hashed ({}, {}, {}, {})",
        plural(summary.hashed_of_kind(AssetKind::Style), "style"),
        plural(summary.hashed_of_kind(AssetKind::Script), "script"),
        plural(summary.hashed_of_kind(AssetKind::Image), "image"),
        plural(summary.hashed_of_kind(AssetKind::Font), "font"),
    )];
    let mut hashed: Vec<_> = summary.hashed.iter().collect();
    hashed.sort_by(|a, b| a.original.cmp(&b.original));
    for asset in hashed {
        lines.push(format!("{}{} → {}", indent(1), asset.original, asset.hashed));
    }

    lines.push(String::new());
    lines.push("References".to_string());
    lines.push(format!(
        "{}{} rewritten, {} verified",
        indent(1),
        summary.references_rewritten,
        summary.references_verified
    ));

    lines.push(String::new());
    lines.push(format!(
        "Built {}, {}, {} → {} ({}) in {:.2}s",
        plural(summary.hashed.len(), "asset"),
        plural(summary.pages, "page"),
        plural(summary.fragments, "fragment"),
        summary.live_dir.display(),
        format_bytes(summary.output_bytes),
        summary.elapsed.as_secs_f64()
    ));
    lines.push(format!("Version {}", summary.version));
    lines
}

pub fn print_build_summary(summary: &BuildSummary) {
    for line in format_build_summary(summary) {
        println!("{}", line);
    }
}
