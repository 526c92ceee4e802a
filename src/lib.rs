//! # cachesafe
//!
//! A build pipeline for hand-written static sites. It takes a tree of HTML
//! pages, stylesheets, scripts, fonts and images and produces a deployable,
//! content-hashed output tree that browsers can cache forever, then swaps it
//! into place atomically so a failed build never breaks the live site.
//!
//! # Architecture: One Linear Pipeline
//!
//! ```text
//! 1. Discover   site/        →  sorted page, fragment and asset lists
//! 2. Hash       .build-temp/ →  fingerprinted files + rename map
//! 3. Rewrite    rename map   →  every reference points at a hashed file
//! 4. Heads      pages        →  deterministic, idempotent <head> blocks
//! 5. Verify     .build-temp/ →  every local reference resolves
//! 6. Deploy     .build-temp/ →  docs/ (rename swap with rollback)
//! ```
//!
//! All work happens in a staging directory; the live directory is only
//! touched by the final rename.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Pre-flight validation, deterministic discovery, staging copy |
//! | [`hasher`] | Content fingerprints, collision handling, renames |
//! | [`rewrite`] | Reference extraction and rewriting for HTML and CSS |
//! | [`head`] | `<head>` reconstruction: fixed order, preserve-or-synthesize |
//! | [`version`] | Build version stamp derived from the rename map and manifest |
//! | [`verify`] | Post-build check that no local reference dangles |
//! | [`deploy`] | Staging → live promotion with backup and rollback |
//! | [`pipeline`] | Orchestration, build summary, top-level error |
//! | [`manifest`] | Image manifest (`window.__MANIFEST__`) from the `images/` layout |
//! | [`html`] | Small tolerant HTML tokenizer shared by rewrite, head and verify |
//! | [`config`] | `site.toml` loading over stock defaults, validation |
//! | [`types`] | Asset records and the rename map |
//! | [`naming`] | `name.<hex>.ext` filename convention |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Content Addressing
//!
//! A fingerprint depends on file bytes only. Identical sources give identical
//! output trees and an identical version stamp on every machine, so a deploy
//! with no source changes is a no-op for every cache in front of the site.
//!
//! ## A Tokenizer, Not Regexes, For HTML
//!
//! Tags are located with [`html::tokenize`], which understands comments,
//! quoted attribute values and raw-text elements. A `<meta charset>` inside an
//! HTML comment is therefore not mistaken for a real one. CSS `url()` and
//! `@import` are simple enough for regular expressions and use them.
//!
//! ## The Rename Map Is Frozen After Hashing
//!
//! Only the hasher owns a [`types::RenameMapBuilder`]. Every later phase gets
//! a `&RenameMap`, which has no mutators.

pub mod config;
pub mod deploy;
pub mod hasher;
pub mod head;
pub mod html;
pub mod manifest;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod rewrite;
pub mod scan;
pub mod types;
pub mod verify;
pub mod version;

#[cfg(test)]
pub(crate) mod test_helpers;
