pub mod access;
pub mod client;
pub mod key;
pub mod role;

use acl::{Access, Acl, PermissionSet};
use anyhow::{Context as _, Result};
use colored::*;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Everything a command needs
pub struct Context {
    pub acl: Acl,
    pub format: String,
}

impl Context {
    pub fn json(&self) -> bool {
        self.format == "json"
    }

    /// Print `value` as pretty JSON when JSON output was requested.
    /// Returns whether it printed.
    pub fn emit_json<T: Serialize>(&self, value: &T) -> Result<bool> {
        if self.json() {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Parse a JSON command line argument
pub fn parse_json_arg(name: &str, raw: &str) -> Result<JsonValue> {
    serde_json::from_str(raw).with_context(|| format!("{} must be valid JSON", name))
}

/// One line summary of a permission set, e.g. `read, update (fields, filter)`
pub fn describe_set(set: &PermissionSet) -> String {
    let parts: Vec<String> = set
        .iter()
        .filter(|(_, access)| access.is_granted())
        .map(|(access_type, access)| match access {
            Access::Restricted(restriction) => {
                let mut limits = Vec::new();
                if restriction.fields.is_some() {
                    limits.push("fields");
                }
                if restriction.filter.is_some() {
                    limits.push("filter");
                }
                format!("{} ({})", access_type, limits.join(", "))
            }
            _ => access_type.to_string(),
        })
        .collect();

    if parts.is_empty() {
        "none".dimmed().to_string()
    } else {
        parts.join(", ")
    }
}

pub fn print_matrix<'a>(resources: impl Iterator<Item = (&'a String, &'a PermissionSet)>) {
    let mut empty = true;
    for (resource, set) in resources {
        empty = false;
        println!("    {} {}", format!("{}:", resource).bold(), describe_set(set));
    }
    if empty {
        println!("    {}", "no resources".dimmed());
    }
}

pub fn success(message: impl AsRef<str>) {
    println!("{} {}", "✓".green().bold(), message.as_ref());
}
