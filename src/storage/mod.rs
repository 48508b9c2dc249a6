pub mod manager;
pub mod merge;
pub mod models;
pub mod providers;

pub use manager::{RecordStore, SharedStore};
pub use merge::{IncomingWins, MergePolicy, RejectConflicting};
pub use models::{
    Author, AuthorRef, Commit, CommitFilter, CommitQuery, CommitRecord, CommitRef, CommitSummary,
    SectionKey, SortKey, StoreEvent,
};
pub use providers::{open_provider, StorageConfig, StorageProvider, StorageStats, StorageType};
