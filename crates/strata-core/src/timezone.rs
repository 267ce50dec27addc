use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Root of the zone database inside an image.
pub const ZONEINFO_DIR: &str = "/usr/share/zoneinfo";
/// Symlink consulted by libc for the local zone.
pub const LOCALTIME_PATH: &str = "/etc/localtime";
/// Plain-text file holding the zone identifier (Debian convention).
pub const TIMEZONE_FILE: &str = "/etc/timezone";

/// A zone database identifier such as `America/Detroit`.
///
/// Construction only checks the identifier's shape. Whether the zone exists
/// is decided against a concrete root filesystem when the timezone layer is
/// built.
///
/// # Examples
///
/// ```
/// use strata_core::TimezoneId;
///
/// let tz: TimezoneId = "America/Detroit".parse().unwrap();
/// assert_eq!(tz.zoneinfo_path().to_str(), Some("/usr/share/zoneinfo/America/Detroit"));
/// assert!("../etc/passwd".parse::<TimezoneId>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimezoneId(String);

impl TimezoneId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Absolute path of the zone entry inside the image.
    pub fn zoneinfo_path(&self) -> PathBuf {
        PathBuf::from(ZONEINFO_DIR).join(&self.0)
    }
}

impl FromStr for TimezoneId {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let invalid = |reason| Error::InvalidTimezone {
            id: s.to_owned(),
            reason,
        };

        if s.is_empty() {
            return Err(invalid("identifier must not be empty"));
        }
        if s.starts_with('/') {
            return Err(invalid("identifier must be relative to the zone database"));
        }
        if s.split('/').any(|c| c.is_empty() || c == "." || c == "..") {
            return Err(invalid("identifier has an empty or relative component"));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '+'))
        {
            return Err(invalid(
                "identifier may only contain letters, digits, '/', '_', '-', '+'",
            ));
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for TimezoneId {
    type Error = Error;

    fn try_from(value: String) -> crate::Result<Self> {
        value.parse()
    }
}

impl From<TimezoneId> for String {
    fn from(value: TimezoneId) -> Self {
        value.0
    }
}

impl fmt::Display for TimezoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
