// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Diagnostics for `corvid.toml` and `CORVID_*` overrides.
//!
//! Figment errors become [`ConfigError`]s that name the section, point at the
//! offending line when the value came from TOML, and spell keys the way the
//! operator wrote them: `heartbeat_ms` in a file, `CORVID_WHATSAPP_HEARTBEAT_MS`
//! in the environment.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use std::path::Path;

use figment::error::{Error as FigmentError, Kind};
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::loader::env_var_name;

/// Minimum Jaro-Winkler similarity score to suggest a correction.
const SUGGESTION_THRESHOLD: f64 = 0.75;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A key no section of the config knows.
    #[error("unknown key `{key}` in {}", section_label(section.as_deref()))]
    #[diagnostic(
        code(corvid::config::unknown_key),
        help("{}", choices_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        /// Dotted section path, `None` at the top level.
        section: Option<String>,
        /// The key as written: a TOML key or a `CORVID_*` variable.
        key: String,
        suggestion: Option<String>,
        valid_keys: String,
        #[label("this key is not recognized")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value of the wrong type, such as text where a number belongs.
    #[error("invalid type for `{key}`: {detail}")]
    #[diagnostic(code(corvid::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        /// Dotted path, or the `CORVID_*` variable that set it.
        key: String,
        detail: String,
        expected: String,
        #[label("wrong type here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A string outside a fixed set, such as an unknown `runtime.role`.
    #[error("unknown value `{value}` for `{key}`")]
    #[diagnostic(
        code(corvid::config::unknown_value),
        help("{}", choices_help(suggestion.as_deref(), expected))
    )]
    UnknownValue {
        key: String,
        value: String,
        suggestion: Option<String>,
        expected: String,
        #[label("not an accepted value")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A loaded config that breaks a cross-field rule.
    #[error("validation error: {message}")]
    #[diagnostic(code(corvid::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(corvid::config::other))]
    Other(String),
}

fn section_label(section: Option<&str>) -> String {
    match section {
        Some(s) => format!("[{s}]"),
        None => "the top level".to_string(),
    }
}

fn choices_help(suggestion: Option<&str>, choices: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? Valid choices: {choices}"),
        None => format!("valid choices: {choices}"),
    }
}

/// Where a rejected value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    /// A TOML file or inline string, by display name.
    Toml(String),
    Env,
    Unknown,
}

impl Origin {
    fn of(error: &FigmentError, sources: &[(String, String)]) -> Self {
        let Some(metadata) = error.metadata.as_ref() else {
            return Origin::Unknown;
        };
        if let Some(figment::Source::File(path)) = &metadata.source {
            return Origin::Toml(path.display().to_string());
        }
        if metadata.name.contains("environment variable") {
            return Origin::Env;
        }
        // Inline strings carry no path.
        match sources {
            [(name, _)] if metadata.name.contains("TOML") => Origin::Toml(name.clone()),
            _ => Origin::Unknown,
        }
    }

    /// Spells `key` under `parents` the way this origin writes it.
    fn spell(&self, parents: &[&str], key: &str, bare: bool) -> String {
        match self {
            Origin::Env => {
                let mut path = parents.to_vec();
                path.push(key);
                env_var_name(&path)
            }
            _ if bare || parents.is_empty() => key.to_string(),
            _ => format!("{}.{key}", parents.join(".")),
        }
    }

    /// Locates `key` under `section` in the TOML source this origin names.
    fn locate(
        &self,
        sources: &[(String, String)],
        section: Option<&str>,
        key: &str,
    ) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
        let Origin::Toml(origin) = self else {
            return (None, None);
        };
        let found = sources
            .iter()
            .find(|(name, _)| name == origin || Path::new(origin).ends_with(name));
        if let Some((name, content)) = found
            && let Some(offset) = find_key_offset(content, section, key)
        {
            return (
                Some(SourceSpan::new(offset.into(), key.len())),
                Some(NamedSource::new(name, content.clone())),
            );
        }
        (None, None)
    }
}

/// Converts a `figment::Error` into one [`ConfigError`] per underlying error.
///
/// `toml_sources` holds `(name, content)` pairs for every TOML source that
/// fed the figment, used to attach source spans.
pub fn figment_to_config_errors(
    err: FigmentError,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    err.into_iter()
        .map(|error| convert(&error, toml_sources))
        .collect()
}

fn convert(error: &FigmentError, sources: &[(String, String)]) -> ConfigError {
    let origin = Origin::of(error, sources);
    let path: Vec<&str> = error.path.iter().map(String::as_str).collect();

    match &error.kind {
        Kind::UnknownField(field, expected) => {
            // The path ends with the unknown key itself.
            let parents = match path.split_last() {
                Some((last, parents)) if *last == field.as_str() => parents,
                _ => path.as_slice(),
            };
            let section = (!parents.is_empty()).then(|| parents.join("."));
            let suggestion = suggest_key(field, expected).map(|s| origin.spell(parents, &s, true));
            let valid_keys = expected
                .iter()
                .map(|k| origin.spell(parents, k, true))
                .collect::<Vec<_>>()
                .join(", ");
            let (span, src) = origin.locate(sources, section.as_deref(), field);
            ConfigError::UnknownKey {
                section,
                key: origin.spell(parents, field, true),
                suggestion,
                valid_keys,
                span,
                src,
            }
        }
        Kind::InvalidType(actual, expected) => {
            let (parents, key) = split_leaf(&path);
            let section = (!parents.is_empty()).then(|| parents.join("."));
            let (span, src) = origin.locate(sources, section.as_deref(), key);
            ConfigError::InvalidType {
                key: origin.spell(parents, key, false),
                detail: format!("found {actual}, expected {expected}"),
                expected: expected.clone(),
                span,
                src,
            }
        }
        Kind::UnknownVariant(value, expected) => {
            let (parents, key) = split_leaf(&path);
            let section = (!parents.is_empty()).then(|| parents.join("."));
            let (span, src) = origin.locate(sources, section.as_deref(), key);
            ConfigError::UnknownValue {
                key: origin.spell(parents, key, false),
                value: value.clone(),
                suggestion: suggest_key(value, expected),
                expected: expected.join(", "),
                span,
                src,
            }
        }
        _ => ConfigError::Other(error.to_string()),
    }
}

fn split_leaf<'a>(path: &'a [&'a str]) -> (&'a [&'a str], &'a str) {
    match path.split_last() {
        Some((leaf, parents)) => (parents, leaf),
        None => (&[], ""),
    }
}

/// Byte offset of `key` inside the `[section]` table of `content`.
///
/// `None` for `section` searches the keys before the first table header.
/// Only keys assigned directly in that table match; a later table reusing
/// the name is ignored.
pub fn find_key_offset(content: &str, section: Option<&str>, key: &str) -> Option<usize> {
    if key.is_empty() {
        return None;
    }
    let mut current: Option<&str> = None;
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(header) = trimmed.strip_prefix('[') {
            current = header.split(']').next().map(str::trim);
        } else if current == section
            && let Some(rest) = trimmed.strip_prefix(key)
            && rest.trim_start().starts_with('=')
        {
            return Some(offset + line.len() - trimmed.len());
        }
        offset += line.len();
    }
    None
}

/// Best Jaro-Winkler match for `unknown` among `valid_keys`, if close enough.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|&key| (strsim::jaro_winkler(unknown, key), key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Renders errors to stderr with miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    use miette::GraphicalReportHandler;

    let handler = GraphicalReportHandler::new();
    for error in errors {
        let mut buf = String::new();
        if handler.render_report(&mut buf, error).is_ok() {
            eprint!("{buf}");
        } else {
            eprintln!("Error: {error}");
        }
    }
}
