//! Provision a labeling project and keep its local image storage in sync.
//!
//! A run makes sure the configured project exists on the labeling service
//! (matching names case and space insensitively), attaches a local-file
//! storage pointing at `{document_root}/augmented_images`, validates it and
//! asks the service to scan the directory into tasks.

pub mod conf;
pub mod connection;
pub mod error;
pub mod orchestrator;
pub mod project;
pub mod retry;
pub mod storage;

pub use conf::{Conf, LocalFiles, ServiceSettings};
pub use connection::{ServiceConnection, Session, SESSION_RETRY};
pub use error::{Error, Result};
pub use orchestrator::{provision, Provisioned};
pub use project::{is_match, normalize, Project, ProjectSlot, LABEL_CONFIG};
pub use retry::RetryPolicy;
pub use storage::{
    ImportStorageOptions, LocalStorage, StorageCoordinator, StorageUpdate, SyncResult,
    ValidationResult, CREATE_RETRY, DEFAULT_REGEX_FILTER, SYNC_DIR_NAME,
};
