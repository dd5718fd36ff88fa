//! Docstring helpers: per-argument descriptions from `Args:`/`Attributes:`
//! sections, task descriptions for `docs_info`, and the `file:` indirection.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::annot::TaskInterface;
use crate::error::ConfigError;

/// Section headers recognized in Google-style docstrings.
static SECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(Args|Arguments|Attributes|Returns|Raises|Example[s]?):\s*$")
        .unwrap()
});

/// Start of one argument entry inside an `Args:` section.
static ARG_ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s+)([A-Za-z_][A-Za-z0-9_]*):\s*(.*)$").unwrap());

/// Extract `name -> description` pairs from the `Args:` (or `Attributes:`)
/// section of a docstring. Continuation lines indented deeper than the entry
/// are folded into the entry's description.
pub fn parse_arg_descriptions(doc: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some(doc) = doc else {
        return out;
    };

    let mut in_args = false;
    let mut current: Option<(String, String, usize)> = None;
    for line in doc.lines() {
        if let Some(caps) = SECTION_RE.captures(line) {
            if let Some((name, text, _)) = current.take() {
                out.insert(name, text.trim().to_string());
            }
            in_args = matches!(&caps[1], "Args" | "Arguments" | "Attributes");
            continue;
        }
        if !in_args {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        match (&mut current, ARG_ENTRY_RE.captures(line)) {
            // deeper-indented line continues the current entry
            (Some((_, text, entry_indent)), caps)
                if indent > *entry_indent && caps.is_none() =>
            {
                text.push(' ');
                text.push_str(line.trim());
            }
            (_, Some(caps)) => {
                if let Some((name, text, _)) = current.take() {
                    out.insert(name, text.trim().to_string());
                }
                current = Some((
                    caps[2].to_string(),
                    caps[3].to_string(),
                    caps[1].len(),
                ));
            }
            _ => {
                // dedented non-entry line ends the section
                if let Some((name, text, _)) = current.take() {
                    out.insert(name, text.trim().to_string());
                }
                in_args = false;
            }
        }
    }
    if let Some((name, text, _)) = current.take() {
        out.insert(name, text.trim().to_string());
    }
    out
}

/// The human-readable description of a docstring: everything before the
/// first recognized section, trimmed.
pub fn task_description(doc: &str) -> String {
    let mut lines = Vec::new();
    for line in doc.lines() {
        if SECTION_RE.is_match(line) {
            break;
        }
        lines.push(line.trim_end());
    }
    lines.join("\n").trim().to_string()
}

/// Build `docs_info` from the docstrings of a task's phase functions,
/// concatenated non-parallel first.
pub fn create_docs_info(
    non_parallel: Option<&TaskInterface>,
    parallel: Option<&TaskInterface>,
) -> Option<String> {
    let mut parts = Vec::new();
    for interface in [non_parallel, parallel].into_iter().flatten() {
        if let Some(doc) = interface.doc.as_deref() {
            let description = task_description(doc);
            if !description.is_empty() {
                parts.push(description);
            }
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Resolve a `file:<relative path>` docs pointer against the task-list
/// directory.
pub fn read_docs_info_from_file(
    docs_info: &str,
    task_list_dir: &Path,
) -> Result<String, ConfigError> {
    let relative = docs_info.trim_start_matches("file:");
    let path = task_list_dir.join(relative);
    std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path,
        source,
    })
}
