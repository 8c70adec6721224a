pub mod announcement;
pub mod automerge;
pub mod best_effort;
pub mod cache;
pub mod error;
pub mod fake;
pub mod github;
pub mod hosting;
pub mod manager;
pub mod naming;
pub mod signature;
pub mod version;

pub use automerge::{AutoMergeEngine, EnginePolicy, MergeOutcome};
pub use cache::InvalidationCache;
pub use error::{ChallengeError, ClientError};
pub use github::{GitHubClient, MergeMethod};
pub use hosting::HostingClient;
pub use manager::{ChallengeManager, ManagerConfig};
pub use naming::{BaseBranchPolicy, RepoNamePolicy};

/// Version string reported by the binaries.
pub fn service_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
