//! Local validation of pip requirements manifests.
//!
//! The manifest is copied into the image on its own, ahead of the rest of
//! the source, so it must not reference other files from the build context.

use std::path::Path;

use crate::error::DependencyInstallError;

/// One requirement line, after continuation joining and comment removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Distribution name as written (empty for direct URL requirements).
    pub name: String,
    pub text: String,
    /// 1-based line where the requirement starts.
    pub line: usize,
}

/// Options that take the rest of the line and do not name a distribution.
const GLOBAL_OPTIONS: &[&str] = &[
    "-i",
    "--index-url",
    "--extra-index-url",
    "--no-index",
    "-f",
    "--find-links",
    "--trusted-host",
    "--pre",
    "--prefer-binary",
    "--require-hashes",
    "--only-binary",
    "--no-binary",
    "--use-feature",
];

/// Options that pull in other files from the build context.
const FILE_OPTIONS: &[&str] = &["-r", "--requirement", "-c", "--constraint", "-e", "--editable"];

/// Manifest bytes as text. Invalid UTF-8 is reported at the line holding
/// the first bad byte.
pub fn decode_manifest<'a>(path: &Path, bytes: &'a [u8]) -> Result<&'a str, DependencyInstallError> {
    std::str::from_utf8(bytes).map_err(|e| {
        let valid = &bytes[..e.valid_up_to()];
        let line_start = valid.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        let line_end = bytes[line_start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |i| line_start + i);
        DependencyInstallError::ManifestParse {
            path: path.to_path_buf(),
            line: valid.iter().filter(|&&b| b == b'\n').count() + 1,
            text: String::from_utf8_lossy(&bytes[line_start..line_end]).into_owned(),
            reason: "not valid UTF-8",
        }
    })
}

/// Parse and validate a requirements manifest.
pub fn parse_requirements(
    path: &Path,
    content: &str,
) -> Result<Vec<Requirement>, DependencyInstallError> {
    let mut requirements = Vec::new();
    let mut pending = String::new();
    let mut start_line = 0;

    for (index, raw) in content.lines().enumerate() {
        if pending.is_empty() {
            start_line = index + 1;
        }
        let line = strip_comment(raw);
        if let Some(continued) = line.strip_suffix('\\') {
            pending.push_str(continued);
            pending.push(' ');
            continue;
        }
        pending.push_str(line);
        let logical = std::mem::take(&mut pending);
        if let Some(req) = parse_line(path, start_line, logical.trim())? {
            requirements.push(req);
        }
    }
    if !pending.trim().is_empty() {
        if let Some(req) = parse_line(path, start_line, pending.trim())? {
            requirements.push(req);
        }
    }
    Ok(requirements)
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    let code = match line.find(" #").or_else(|| line.find("\t#")) {
        Some(pos) => &line[..pos],
        None => line,
    };
    code.trim_end()
}

fn parse_line(
    path: &Path,
    line: usize,
    text: &str,
) -> Result<Option<Requirement>, DependencyInstallError> {
    if text.is_empty() {
        return Ok(None);
    }
    let error = |reason| DependencyInstallError::ManifestParse {
        path: path.to_path_buf(),
        line,
        text: text.to_owned(),
        reason,
    };

    if text.starts_with('-') {
        let option = match text.find(|c: char| c.is_whitespace() || c == '=') {
            Some(end) => &text[..end],
            None => text,
        };
        if FILE_OPTIONS.contains(&option) {
            return Err(error("options referencing other files are not supported"));
        }
        if GLOBAL_OPTIONS.contains(&option) {
            return Ok(None);
        }
        return Err(error("unknown option"));
    }

    if text.starts_with('.') || text.starts_with('/') || text.starts_with("file:") {
        return Err(error("local path requirements are not supported"));
    }
    if text.contains("://") && !text.contains('@') {
        return Ok(Some(Requirement {
            name: String::new(),
            text: text.to_owned(),
            line,
        }));
    }

    let name_end = match text.find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))) {
        Some(end) => end,
        None => text.len(),
    };
    let name = &text[..name_end];
    let starts_alnum = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let ends_alnum = name.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if !starts_alnum || !ends_alnum {
        return Err(error("invalid distribution name"));
    }

    let rest = text[name_end..].trim_start();
    let valid_rest = rest.is_empty()
        || rest.starts_with('[')
        || rest.starts_with(';')
        || rest.starts_with('@')
        || ["==", "!=", ">=", "<=", "~=", "===", ">", "<", "("]
            .iter()
            .any(|op| rest.starts_with(op));
    if !valid_rest {
        return Err(error("invalid version specifier"));
    }

    Ok(Some(Requirement {
        name: name.to_owned(),
        text: text.to_owned(),
        line,
    }))
}
