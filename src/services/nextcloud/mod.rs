// Nextcloud integration modules organized by responsibility

pub mod config;
pub mod connection;
pub mod paths;
pub mod retry;
pub mod service;
pub mod share;
pub mod status;

// Re-export main types for convenience
pub use config::{NextcloudConfig, RetryConfig};
pub use connection::{Depth, DownloadTarget, NextcloudConnection, TransferMethod};
pub use paths::{normalize, PathResolver, RemotePath};
pub use retry::with_retry;
pub use service::NextcloudService;
