// cteractl - CLI for CTERA Portal and Edge Filer administration
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Lookups on loosely typed filer responses.
//!
//! Filers running different firmware return the same information in
//! different places and shapes. Every lookup here reports *why* it failed
//! (`FieldError`, `CommandError`) so the reason can be logged, but callers
//! building a report collapse any failure to a sentinel string.

use crate::session::{DeviceRef, PortalSession};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;

/// Written for any value that could not be read from a filer.
pub const NOT_APPLICABLE: &str = "Not Applicable";

/// Written for the sampled performance maxima when no samples exist.
pub const NA: &str = "N/A";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("`{path}` is absent (no `{segment}`)")]
    Absent { path: String, segment: String },
    #[error("`{path}` is null")]
    Null { path: String },
    #[error("`{path}` is not a scalar value")]
    NotScalar { path: String },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("remote command `{command}` failed: {message}")]
    Remote { command: String, message: String },
    #[error("remote command `{command}` returned nothing")]
    Empty { command: String },
}

/// Walks a dotted path (`status.device.runningFirmware`). Numeric segments
/// index into arrays.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Result<&'a Value, FieldError> {
    let mut current = root;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| FieldError::Absent {
            path: path.to_string(),
            segment: segment.to_string(),
        })?;
    }
    Ok(current)
}

/// Renders strings, numbers and booleans; anything else has no cell form.
pub fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn field(root: &Value, path: &str) -> Result<String, FieldError> {
    match lookup(root, path)? {
        Value::Null => Err(FieldError::Null {
            path: path.to_string(),
        }),
        value => scalar(value).ok_or_else(|| FieldError::NotScalar {
            path: path.to_string(),
        }),
    }
}

/// First path that yields a scalar wins; otherwise `default`.
pub fn field_or(root: &Value, paths: &[&str], default: &str) -> String {
    for path in paths {
        match field(root, path) {
            Ok(value) => return value,
            Err(err) => debug!(%err, "field lookup failed"),
        }
    }
    default.to_string()
}

/// Places `value` into `tree` under a slash path, creating objects on the way.
/// Anything in the way that is not an object is replaced.
pub fn graft(tree: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        *tree = value;
        return;
    };

    let mut current = tree;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(last.to_string(), value);
    }
}

/// Coerces whatever a debug command returned into text.
pub fn command_text(result: &Value) -> Option<String> {
    match result {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["value", "text"]
            .iter()
            .find_map(|key| map.get(*key).filter(|v| !v.is_null()))
            .map(|inner| scalar(inner).unwrap_or_else(|| inner.to_string()))
            .or_else(|| Some(result.to_string())),
        other => Some(scalar(other).unwrap_or_else(|| other.to_string())),
    }
}

pub fn try_run_command(
    session: &mut dyn PortalSession,
    device: &DeviceRef,
    command: &str,
) -> Result<String, CommandError> {
    let result = session
        .execute(device, "/config/device", "debugCmd", json!(command))
        .map_err(|err| CommandError::Remote {
            command: command.to_string(),
            message: format!("{err:#}"),
        })?;
    command_text(&result).ok_or_else(|| CommandError::Empty {
        command: command.to_string(),
    })
}

/// Runs a CLI command on the filer; any failure becomes [`NOT_APPLICABLE`].
pub fn run_command(session: &mut dyn PortalSession, device: &DeviceRef, command: &str) -> String {
    match try_run_command(session, device, command) {
        Ok(output) => output,
        Err(err) => {
            debug!(device = %device.name, %err, "command failed");
            NOT_APPLICABLE.to_string()
        }
    }
}
