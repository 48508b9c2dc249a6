pub mod error;
pub mod logging;
pub mod network;

pub use error::{ConflictError, DecodeError, ErrorSeverity, FetchError, StoreError, SyncError};
pub use logging::{setup_logging, LogFormat, LogOutput, LoggingConfig, SyncTracker};
pub use network::{NetworkConfig, NetworkManager};
