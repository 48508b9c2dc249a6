pub mod decode;
pub mod engine;
pub mod identity;
pub mod source;

pub use decode::RawCommit;
pub use engine::{compute_watermark, SyncConfig, SyncEngine, SyncReport, SyncState};
pub use identity::{AuthorMergePolicy, IdentityResolver};
pub use source::{CommitSource, GithubCommitSource, PER_PAGE};
