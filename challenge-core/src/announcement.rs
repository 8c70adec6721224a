//! Announcement comment posted on a pull request once its merge commit is tagged.
//!
//! The first line of every announcement is a hidden marker naming the tag and
//! commit. A pull request never receives two comments with the same marker.

use crate::hosting::PullRequestView;
use crate::version::{CommitSha, VersionTag};

const SUMMARY_LABEL: &str = "summary (en)";
const MAX_SUMMARY_CHARS: usize = 500;
const UNKNOWN_UPLOADER: &str = "unknown";

const MISSING_SUMMARY_REMINDER: &str = "_No English summary was found in the pull request description. \
Please add a `Summary (EN): ...` line (or a `## Summary (EN)` section) when uploading the next version._";

/// Hidden marker identifying the announcement for `tag` on `sha`.
pub fn marker(tag: &VersionTag, sha: &CommitSha) -> String {
    format!("<!-- versiontag {} sha={} -->", tag, sha)
}

/// A rendered announcement, ready to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub marker: String,
    pub body: String,
}

impl Announcement {
    pub fn for_pull(pull: &PullRequestView, tag: &VersionTag, sha: &CommitSha) -> Self {
        let summary = pull.body.as_deref().and_then(extract_english_summary);
        Self::render(pull.author_login.as_deref(), tag, sha, summary.as_deref())
    }

    pub fn render(
        uploader: Option<&str>,
        tag: &VersionTag,
        sha: &CommitSha,
        summary: Option<&str>,
    ) -> Self {
        let marker = marker(tag, sha);
        let uploader = match uploader.map(str::trim).filter(|u| !u.is_empty()) {
            Some(login) => format!("@{}", login),
            None => UNKNOWN_UPLOADER.to_string(),
        };
        let summary_line = match summary {
            Some(text) => format!("**Summary (EN):** {}", text),
            None => MISSING_SUMMARY_REMINDER.to_string(),
        };

        let body = format!(
            "{}\n{} has uploaded version **{}** (commit `{}`).\n\n{}\n",
            marker,
            uploader,
            tag,
            sha.short(),
            summary_line
        );

        Self { marker, body }
    }

    /// True if any of `existing` bodies already carries this announcement's marker.
    pub fn already_posted<'a>(&self, existing: impl IntoIterator<Item = &'a str>) -> bool {
        existing.into_iter().any(|body| body.contains(&self.marker))
    }
}

/// Strip a leading `summary (en)` label, case-insensitively.
fn strip_label(text: &str) -> Option<&str> {
    let prefix = text.get(..SUMMARY_LABEL.len())?;
    if !prefix.eq_ignore_ascii_case(SUMMARY_LABEL) {
        return None;
    }
    Some(&text[SUMMARY_LABEL.len()..])
}

fn is_heading(line: &str) -> bool {
    line.starts_with('#')
}

fn normalise(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(MAX_SUMMARY_CHARS).collect())
}

/// English summary from a pull request body.
///
/// Accepts either an inline `Summary (EN): text` line or a `## Summary (EN)`
/// heading followed by a section that runs until the next heading. Matching is
/// case-insensitive and the first non-empty match wins. Whitespace is collapsed
/// and the result capped at 500 characters.
pub fn extract_english_summary(body: &str) -> Option<String> {
    let lines: Vec<&str> = body.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();

        let unmarked = if is_heading(trimmed) {
            let title = trimmed.trim_start_matches('#').trim();
            let Some(rest) = strip_label(title) else {
                continue;
            };
            if rest.trim().trim_end_matches(':').is_empty() {
                let section = lines[i + 1..]
                    .iter()
                    .take_while(|l| !is_heading(l.trim()))
                    .copied()
                    .collect::<Vec<_>>()
                    .join("\n");
                if let Some(summary) = normalise(&section) {
                    return Some(summary);
                }
                continue;
            }
            // `## Summary (EN): text` is parsed like an inline label.
            title
        } else {
            // Bold or list markup around the label is tolerated.
            trimmed.trim_start_matches(['-', '*', ' '])
        };
        let Some(rest) = strip_label(unmarked) else {
            continue;
        };
        let rest = rest.trim_start_matches('*');
        let Some(text) = rest.strip_prefix(':') else {
            continue;
        };
        if let Some(summary) = normalise(text.trim_start_matches('*')) {
            return Some(summary);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(n: u64) -> VersionTag {
        VersionTag::new(n).unwrap()
    }

    #[test]
    fn test_marker_format() {
        assert_eq!(
            marker(&v(3), &CommitSha::from("deadbeef")),
            "<!-- versiontag v3 sha=deadbeef -->"
        );
    }

    #[test]
    fn test_inline_summary() {
        assert_eq!(
            extract_english_summary("Summary (EN): add feature X").as_deref(),
            Some("add feature X")
        );
        assert_eq!(
            extract_english_summary("intro\nsummary (en):   lots   of\tspace  ").as_deref(),
            Some("lots of space")
        );
        assert_eq!(
            extract_english_summary("- **Summary (EN):** bold label").as_deref(),
            Some("bold label")
        );
    }

    #[test]
    fn test_heading_section() {
        let body = "## Description\nstuff\n\n## Summary (EN)\nFirst line\nsecond line\n\n## Notes\nignored";
        assert_eq!(
            extract_english_summary(body).as_deref(),
            Some("First line second line")
        );
    }

    #[test]
    fn test_heading_with_inline_text() {
        assert_eq!(
            extract_english_summary("## Summary (EN): add feature X\n").as_deref(),
            Some("add feature X")
        );
        assert_eq!(
            extract_english_summary("### summary (en):\nbelow the heading").as_deref(),
            Some("below the heading")
        );
        assert_eq!(extract_english_summary("## Summary (EN) notes\ntext"), None);
    }

    #[test]
    fn test_first_match_wins() {
        let body = "## SUMMARY (EN)\nfrom heading\n\n## Details\nSummary (EN): from inline";
        assert_eq!(extract_english_summary(body).as_deref(), Some("from heading"));
    }

    #[test]
    fn test_empty_matches_are_skipped() {
        let body = "Summary (EN):\n## Summary (EN)\n\n## Other\nSummary (EN): real one";
        assert_eq!(extract_english_summary(body).as_deref(), Some("real one"));
    }

    #[test]
    fn test_missing_summary() {
        assert_eq!(extract_english_summary(""), None);
        assert_eq!(extract_english_summary("Summary (ZH): 你好"), None);
        assert_eq!(extract_english_summary("Summary: no language tag"), None);
    }

    #[test]
    fn test_summary_is_capped() {
        let body = format!("Summary (EN): {}", "x".repeat(800));
        assert_eq!(extract_english_summary(&body).map(|s| s.len()), Some(500));

        // Multi-byte characters are counted as characters.
        let body = format!("Summary (EN): {}", "é".repeat(600));
        assert_eq!(
            extract_english_summary(&body).map(|s| s.chars().count()),
            Some(500)
        );
    }

    #[test]
    fn test_render_with_summary() {
        let announcement = Announcement::render(
            Some("alice"),
            &v(1),
            &CommitSha::from("0123456789abcdef"),
            Some("add feature X"),
        );
        insta::assert_snapshot!(announcement.body.trim_end(), @r###"
        <!-- versiontag v1 sha=0123456789abcdef -->
        @alice has uploaded version **v1** (commit `0123456`).

        **Summary (EN):** add feature X
        "###);
    }

    #[test]
    fn test_render_without_summary_or_author() {
        let announcement = Announcement::render(None, &v(2), &CommitSha::from("abc"), None);
        assert!(announcement.body.starts_with("<!-- versiontag v2 sha=abc -->\n"));
        assert!(announcement.body.contains("unknown has uploaded version **v2**"));
        assert!(announcement.body.contains(MISSING_SUMMARY_REMINDER));
    }

    #[test]
    fn test_already_posted() {
        let announcement = Announcement::render(Some("bob"), &v(1), &CommitSha::from("s1"), None);
        assert!(!announcement.already_posted(["thanks!", "<!-- versiontag v1 sha=s2 -->"]));
        assert!(announcement.already_posted(["thanks!", announcement.body.as_str()]));
    }
}
