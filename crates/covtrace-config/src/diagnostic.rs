// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-to-miette error bridge with fuzzy match suggestions.
//!
//! Turns Figment extraction errors into miette diagnostics that name the
//! offending key by its dotted path (`trace.page_size`), point at it in the
//! TOML source when the file is known, list the keys its section accepts and
//! suggest the closest one. Type errors also name the `COVTRACE_*`
//! environment variable that overrides the same key.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Minimum Jaro-Winkler similarity score to suggest a correction.
/// Catches typos such as `radius_unit`, `ephemral` or `page_sise`.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// Prefix shared by every environment override.
const ENV_PREFIX: &str = "COVTRACE";

/// A configuration error with rich diagnostic information.
///
/// Keys are dotted paths from the top of the config, so an unknown field in
/// `[fanout]` is reported as `fanout.<field>`.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A key the section does not define.
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(
        code(covtrace::config::unknown_key),
        help("{}", format_unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        /// Dotted path of the unrecognized key.
        key: String,
        /// Dotted path of the closest valid key, if any is similar enough.
        suggestion: Option<String>,
        /// Comma-separated keys the section accepts.
        valid_keys: String,
        #[label("this key is not recognized")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value of the wrong type.
    #[error("invalid type for key `{key}`: {detail}")]
    #[diagnostic(
        code(covtrace::config::invalid_type),
        help("expected {expected}; `{env_var}` overrides the same key")
    )]
    InvalidType {
        /// Dotted path of the key.
        key: String,
        /// What was found against what was expected.
        detail: String,
        expected: String,
        /// Environment variable mapped onto `key`.
        env_var: String,
        #[label("wrong type here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("missing required key `{key}`")]
    #[diagnostic(
        code(covtrace::config::missing_key),
        help("add `{key} = <value>` to your covtrace.toml")
    )]
    MissingKey { key: String },

    /// A value that parsed but violates a semantic constraint.
    #[error("validation error: {message}")]
    #[diagnostic(code(covtrace::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(covtrace::config::other))]
    Other(String),
}

fn format_unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? Valid keys: {valid_keys}"),
        None => format!("valid keys: {valid_keys}"),
    }
}

/// Joins a section path and a field into a dotted key.
pub fn qualified_key(section: &[String], field: &str) -> String {
    if section.is_empty() {
        field.to_string()
    } else {
        format!("{}.{field}", section.join("."))
    }
}

/// Environment variable the loader maps onto the dotted `path`.
///
/// `["trace", "page_size"]` becomes `COVTRACE_TRACE_PAGE_SIZE`.
pub fn env_var_name(path: &[String]) -> String {
    let mut name = String::from(ENV_PREFIX);
    for part in path {
        name.push('_');
        name.push_str(&part.to_uppercase());
    }
    name
}

/// Convert a `figment::Error` into diagnostics.
///
/// A single figment error may hold several; each becomes one `ConfigError`.
/// `toml_sources` pairs a display path with file content and is used to
/// attach source spans.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    use figment::error::Kind;

    let mut errors = Vec::new();

    for error in err {
        let config_error = match &error.kind {
            Kind::UnknownField(field, expected) => {
                let valid_keys: Vec<&str> = expected.to_vec();
                let suggestion =
                    suggest_key(field, &valid_keys).map(|key| qualified_key(&error.path, &key));
                let (span, src) = find_source_span(&error, &error.path, field, toml_sources);
                ConfigError::UnknownKey {
                    key: qualified_key(&error.path, field),
                    suggestion,
                    valid_keys: valid_keys.join(", "),
                    span,
                    src,
                }
            }
            Kind::MissingField(field) => ConfigError::MissingKey {
                key: qualified_key(&error.path, field),
            },
            Kind::InvalidType(actual, expected) => {
                // The path ends with the key itself.
                let (span, src) = match error.path.split_last() {
                    Some((field, section)) => {
                        find_source_span(&error, section, field, toml_sources)
                    }
                    None => (None, None),
                };
                ConfigError::InvalidType {
                    key: error.path.join("."),
                    detail: format!("found {actual}, expected {expected}"),
                    expected: expected.to_string(),
                    env_var: env_var_name(&error.path),
                    span,
                    src,
                }
            }
            _ => ConfigError::Other(error.to_string()),
        };

        errors.push(config_error);
    }

    errors
}

/// Locates `field` under `section` in the TOML source the error came from.
fn find_source_span(
    error: &figment::error::Error,
    section: &[String],
    field: &str,
    toml_sources: &[(String, String)],
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let source_path = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|s| match s {
            figment::Source::File(path) => Some(path.display().to_string()),
            _ => None,
        });

    // Inline strings carry no file source; fall back to the only source given.
    let source = match source_path {
        Some(path) => toml_sources.iter().find(|(p, _)| *p == path),
        None if toml_sources.len() == 1 => toml_sources.first(),
        None => None,
    };

    if let Some((path, content)) = source {
        if let Some(offset) = find_key_offset(content, section, field) {
            let span = SourceSpan::new(offset.into(), field.len());
            return (Some(span), Some(NamedSource::new(path, content.clone())));
        }
    }

    (None, None)
}

/// Byte offset of `field` in TOML `content`.
///
/// With a non-empty `path` the search starts after the `[path[0]]` header;
/// otherwise it starts at the top of the file. Only a key at the start of a
/// line (after indentation) and followed by whitespace or `=` matches.
pub fn find_key_offset(content: &str, path: &[String], field: &str) -> Option<usize> {
    let search_start = match path.first() {
        None => 0,
        Some(section) => {
            let header = format!("[{section}]");
            content.find(&header).map(|pos| pos + header.len())?
        }
    };

    let mut byte_offset = 0;
    for line in content[search_start..].split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(after) = trimmed.strip_prefix(field) {
            if after.starts_with(' ') || after.starts_with('=') || after.starts_with('\t') {
                return Some(search_start + byte_offset + (line.len() - trimmed.len()));
            }
        }
        byte_offset += line.len();
    }

    None
}

/// Suggest a similar key name using Jaro-Winkler string similarity.
///
/// Returns the best match above the similarity threshold, or `None` if
/// no valid key is close enough.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Render diagnostics to stderr using miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    use miette::GraphicalReportHandler;

    let handler = GraphicalReportHandler::new();
    for error in errors {
        let mut buf = String::new();
        let diagnostic: &dyn Diagnostic = error;
        if handler.render_report(&mut buf, diagnostic).is_ok() {
            eprint!("{buf}");
        } else {
            eprintln!("Error: {error}");
        }
    }
}
