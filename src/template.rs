use std::fs;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::RepoSettings;
use crate::models::Status;

/// A rendered notification, ready to hand to the mail collaborator.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

/// Render the body template and subject line for one notification unit.
///
/// The body comes from `<template_dir>/<prefix>_<status>.mustache`, where
/// the prefix is `group` or `individual`; the subject comes from the
/// configured `open_subject`/`closed_subject` string. Both are rendered
/// against the same payload.
pub fn render_notification(
    settings: &RepoSettings,
    status: Status,
    grouped: bool,
    payload: &Value,
) -> Result<Rendered> {
    let prefix = if grouped { "group" } else { "individual" };
    let template_path = settings
        .template_dir
        .join(format!("{prefix}_{status}.mustache"));

    let template = fs::read_to_string(&template_path)
        .with_context(|| format!("Failed to read template: {}", template_path.display()))?;

    let subject_template = match status {
        Status::Open => settings.open_subject.as_str(),
        Status::Closed => settings
            .closed_subject
            .as_deref()
            .context("no 'closed_subject' configured")?,
    };

    Ok(Rendered {
        subject: render(subject_template, payload),
        body: render(&template, payload),
    })
}

/// Minimal `{{name}}` interpolation against a JSON payload.
///
/// Dotted names descend into nested objects. Unknown names render as the
/// empty string, string values render verbatim, anything else renders as
/// JSON.
pub fn render(template: &str, data: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                out.push_str(&lookup(data, after[..end].trim()));
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated tag; emit it as-is.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

fn lookup(data: &Value, name: &str) -> String {
    let mut current = data;
    for part in name.split('.') {
        match current.get(part) {
            Some(value) => current = value,
            None => return String::new(),
        }
    }

    match current {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
