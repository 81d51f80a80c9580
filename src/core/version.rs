use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref VERSION_PATTERN: Regex = Regex::new(r"-\d+(\.\d+){2}(-|$)").unwrap();
}

/// Deployment version, major and minor only. Patch levels never gate
/// behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InsightsVersion {
    pub major: u32,
    pub minor: u32,
}

impl InsightsVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for InsightsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// First version serving the scratchpad manager endpoints.
pub const SCRATCHPAD_MANAGER: InsightsVersion = InsightsVersion::new(1, 11);
/// First version accepting `returnFormat` on scratchpad execution.
pub const STRUCTURED_TEXT: InsightsVersion = InsightsVersion::new(1, 12);
/// First version exposing `api/config`.
pub const API_CONFIG: InsightsVersion = InsightsVersion::new(1, 13);

/// Extracts `major.minor` from the last `-X.Y.Z` token of a config version
/// string such as `servicebroker-1.12.0-x`.
pub fn parse_version(config_version: &str) -> Option<InsightsVersion> {
    let matched = VERSION_PATTERN.find_iter(config_version).last()?;
    let version = matched.as_str().replace('-', "");
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some(InsightsVersion::new(major, minor))
}

/// The single gating primitive. An unknown version is never at least
/// anything, so callers fall back to the oldest behavior.
pub fn is_at_least(version: Option<InsightsVersion>, threshold: InsightsVersion) -> bool {
    matches!(version, Some(v) if v >= threshold)
}
