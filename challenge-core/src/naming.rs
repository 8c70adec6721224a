//! Naming rules: repository slugs, which repositories are managed, and which
//! base branches are eligible for auto-merge.
//!
//! Each rule is a single configured value with one predicate, chosen at startup.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MAX_SLUG_LEN: usize = 50;
const FALLBACK_SLUG: &str = "challenge";
const VERSION_BRANCH_PREFIX: &str = "version/v";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {setting} '{value}': expected {expected}")]
pub struct PolicyParseError {
    pub setting: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Lowercase, hyphen-separated form of `text`, at most 50 characters and never empty.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    // Only ASCII is pushed, so byte truncation is on a char boundary.
    slug.truncate(MAX_SLUG_LEN);
    let trimmed = slug.trim_end_matches('-');

    if trimmed.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Last six hex digits of a millisecond timestamp.
pub fn short_id(epoch_millis: u64) -> String {
    format!("{:06x}", epoch_millis & 0xff_ffff)
}

fn is_slug_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}

/// How challenge repositories are named, and therefore recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoNamePolicy {
    /// `<prefix>-<slug>-<short id>`; managed iff the name starts with `<prefix>-`.
    Prefix(String),
    /// `<slug>-<suffix>`; managed iff the whole name is slug characters ending in `-<suffix>`.
    Suffix(String),
}

impl Default for RepoNamePolicy {
    fn default() -> Self {
        Self::Prefix("challenge".to_string())
    }
}

impl RepoNamePolicy {
    /// Repository name for a new challenge titled `title`.
    pub fn repo_name(&self, title: &str, epoch_millis: u64) -> String {
        let slug = slugify(title);
        match self {
            Self::Prefix(prefix) => format!("{}-{}-{}", prefix, slug, short_id(epoch_millis)),
            Self::Suffix(suffix) => format!("{}-{}", slug, suffix),
        }
    }

    /// The only authority on whether a repository is managed by this system.
    pub fn is_challenge_repo(&self, name: &str) -> bool {
        match self {
            Self::Prefix(prefix) => name
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('-')),
            Self::Suffix(suffix) => {
                let Some(stem) = name
                    .strip_suffix(suffix.as_str())
                    .and_then(|rest| rest.strip_suffix('-'))
                else {
                    return false;
                };
                let mut chars = stem.chars();
                match chars.next() {
                    Some(first) if first.is_ascii_lowercase() || first.is_ascii_digit() => {
                        chars.all(is_slug_char)
                    }
                    _ => false,
                }
            }
        }
    }
}

impl FromStr for RepoNamePolicy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PolicyParseError {
            setting: "repository naming",
            value: s.to_string(),
            expected: "'prefix:<word>' or 'suffix:<word>'",
        };

        let (kind, word) = s.trim().split_once(':').ok_or_else(err)?;
        let word = word.trim();
        if word.is_empty() || !word.chars().all(is_slug_char) || word.starts_with('-') {
            return Err(err());
        }

        match kind.trim().to_ascii_lowercase().as_str() {
            "prefix" => Ok(Self::Prefix(word.to_string())),
            "suffix" => Ok(Self::Suffix(word.to_string())),
            _ => Err(err()),
        }
    }
}

impl fmt::Display for RepoNamePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(p) => write!(f, "prefix:{}", p),
            Self::Suffix(s) => write!(f, "suffix:{}", s),
        }
    }
}

/// Version number `N` of a `version/v<N>` branch; `N` has no leading zero.
pub fn parse_version_branch(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(VERSION_BRANCH_PREFIX)?;
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    digits.parse().ok()
}

pub fn version_branch_name(n: u64) -> String {
    format!("{}{}", VERSION_BRANCH_PREFIX, n)
}

/// Which pull-request base branches may be auto-merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseBranchPolicy {
    /// Only `version/v<N>` branches.
    VersionBranches,
    /// Only the named default branch.
    DefaultBranch(String),
    /// The named default branch or any version branch.
    DefaultOrVersion(String),
}

impl Default for BaseBranchPolicy {
    fn default() -> Self {
        Self::VersionBranches
    }
}

impl BaseBranchPolicy {
    /// Build from the configured policy name (`version`, `default`,
    /// `default-or-version`) and the repository default branch.
    pub fn from_setting(kind: &str, default_branch: &str) -> Result<Self, PolicyParseError> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "version" => Ok(Self::VersionBranches),
            "default" => Ok(Self::DefaultBranch(default_branch.to_string())),
            "default-or-version" => Ok(Self::DefaultOrVersion(default_branch.to_string())),
            _ => Err(PolicyParseError {
                setting: "auto-merge base policy",
                value: kind.to_string(),
                expected: "'version', 'default' or 'default-or-version'",
            }),
        }
    }

    pub fn allows(&self, base_ref: &str) -> bool {
        match self {
            Self::VersionBranches => parse_version_branch(base_ref).is_some(),
            Self::DefaultBranch(default) => base_ref == default,
            Self::DefaultOrVersion(default) => {
                base_ref == default || parse_version_branch(base_ref).is_some()
            }
        }
    }
}

impl fmt::Display for BaseBranchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionBranches => f.write_str("version"),
            Self::DefaultBranch(b) => write!(f, "default ({})", b),
            Self::DefaultOrVersion(b) => write!(f, "default-or-version ({})", b),
        }
    }
}
