use std::fmt;
use std::str::FromStr;

use crate::Error;

const DEFAULT_TAG: &str = "latest";
const MAX_TAG_LEN: usize = 128;

/// A base image reference: repository name plus version tag.
///
/// # Examples
///
/// ```
/// use strata_core::ImageRef;
///
/// let r: ImageRef = "python:3.8".parse().unwrap();
/// assert_eq!(r.name(), "python");
/// assert_eq!(r.tag(), "3.8");
///
/// let untagged: ImageRef = "debian".parse().unwrap();
/// assert_eq!(untagged.tag(), "latest");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    name: String,
    tag: String,
}

impl ImageRef {
    pub fn new(name: &str, tag: &str) -> crate::Result<Self> {
        validate_name(name)?;
        validate_tag(name, tag)?;
        Ok(Self {
            name: name.to_owned(),
            tag: tag.to_owned(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl FromStr for ImageRef {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        // A colon before the last '/' belongs to a registry port, not a tag.
        let last_slash = s.rfind('/').map_or(0, |i| i + 1);
        match s[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                Self::new(&s[..split], &s[split + 1..])
            }
            None => Self::new(s, DEFAULT_TAG),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

fn validate_name(name: &str) -> crate::Result<()> {
    let invalid = |reason| Error::InvalidImageRef {
        reference: name.to_owned(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return Err(invalid("name must not have empty path components"));
    }
    if name.split('/').any(|c| c == "." || c == "..") {
        return Err(invalid("name must not contain relative path components"));
    }
    let allowed = |c: char| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/' | ':')
    };
    if !name.chars().all(allowed) {
        return Err(invalid(
            "name may only contain lowercase letters, digits, '.', '_', '-', '/'",
        ));
    }
    Ok(())
}

fn validate_tag(name: &str, tag: &str) -> crate::Result<()> {
    let invalid = |reason| Error::InvalidImageRef {
        reference: format!("{name}:{tag}"),
        reason,
    };

    if tag.is_empty() {
        return Err(invalid("tag must not be empty"));
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(invalid("tag must be at most 128 characters"));
    }
    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(invalid("tag must start with a letter, digit, or '_'"));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid(
            "tag may only contain letters, digits, '.', '_', '-'",
        ));
    }
    Ok(())
}
