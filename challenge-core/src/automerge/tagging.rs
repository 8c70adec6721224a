//! Version tag allocation for merged commits.
//!
//! Tag creation is an optimistic compare-and-swap against the platform: a
//! concurrent writer that takes the same number makes `create_tag` fail with
//! "already exists", and the allocation re-reads the tag list and retries.

use tracing::{error, info, warn};

use crate::hosting::{HostingClient, TagRef};
use crate::version::{CommitSha, VersionTag};

/// Upper bound on list-then-create rounds for one commit.
pub const MAX_TAG_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagAllocation {
    pub tag: VersionTag,
    /// False when the commit already carried a version tag.
    pub newly_created: bool,
}

/// Lowest version tag already bound to `sha`, if any.
fn existing_tag_for(tags: &[TagRef], sha: &CommitSha) -> Option<VersionTag> {
    tags.iter()
        .filter(|t| t.commit_sha == sha.0)
        .filter_map(|t| VersionTag::parse(&t.name))
        .min()
}

/// Find or create the version tag for `sha`.
///
/// Returns `None` when the listing or creation fails for any reason other than
/// a name collision, or when every attempt lost a collision.
pub async fn allocate_version_tag(
    client: &dyn HostingClient,
    owner: &str,
    repo: &str,
    sha: &CommitSha,
) -> Option<TagAllocation> {
    let mut attempt = 0;

    while attempt < MAX_TAG_ATTEMPTS {
        attempt += 1;

        let tags = match client.list_tags(owner, repo).await {
            Ok(tags) => tags,
            Err(e) => {
                error!("Failed to list tags for {}/{}: {}", owner, repo, e);
                return None;
            }
        };

        if let Some(tag) = existing_tag_for(&tags, sha) {
            info!(
                "Commit {} in {}/{} is already tagged {}",
                sha.short(),
                owner,
                repo,
                tag
            );
            return Some(TagAllocation {
                tag,
                newly_created: false,
            });
        }

        let candidate = VersionTag::next_after(tags.iter().map(|t| t.name.as_str()));

        match client
            .create_tag(owner, repo, &candidate.name(), sha.as_str())
            .await
        {
            Ok(()) => {
                info!(
                    "Tagged {} in {}/{} as {}",
                    sha.short(),
                    owner,
                    repo,
                    candidate
                );
                return Some(TagAllocation {
                    tag: candidate,
                    newly_created: true,
                });
            }
            Err(e) if e.is_already_exists() => {
                warn!(
                    "Tag {} in {}/{} was taken concurrently (attempt {}/{})",
                    candidate, owner, repo, attempt, MAX_TAG_ATTEMPTS
                );
            }
            Err(e) => {
                error!(
                    "Failed to create tag {} in {}/{}: {}",
                    candidate, owner, repo, e
                );
                return None;
            }
        }
    }

    warn!(
        "Giving up tagging {} in {}/{} after {} attempts",
        sha.short(),
        owner,
        repo,
        MAX_TAG_ATTEMPTS
    );
    None
}
