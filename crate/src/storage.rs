use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::fs;

use crate::connection::{Session, STORAGES_PATH};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Directory under the document root that holds files to import.
pub const SYNC_DIR_NAME: &str = "augmented_images";
pub const DEFAULT_REGEX_FILTER: &str = r".*\.(jpg|jpeg|png)";
pub const DEFAULT_STORAGE_TITLE: &str = "Local Images Storage";
const STORAGE_TYPE: &str = "localfiles";
const DIR_MODE: u32 = 0o755;
const LISTING_PREVIEW: usize = 10;

/// Storage creation: 3 attempts, waits of 4 and 4 seconds.
pub const CREATE_RETRY: RetryPolicy = RetryPolicy::new(
    3,
    Duration::from_secs(1),
    Duration::from_secs(4),
    Duration::from_secs(10),
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalStorage {
    pub id: i64,
    pub project: Option<i64>,
    pub title: Option<String>,
    pub path: Option<String>,
    pub regex_filter: Option<String>,
    #[serde(default)]
    pub use_blob_urls: bool,
    #[serde(default)]
    pub presign: bool,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct NewStorage<'a> {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'a str>,
    pub title: &'a str,
    pub path: &'a str,
    pub regex_filter: &'a str,
    pub use_blob_urls: bool,
    pub presign: bool,
    pub project: i64,
}

/// Fields to change on an existing storage. Unset fields are left out of the
/// request entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_blob_urls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presign: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImportStorageOptions {
    pub title: String,
    pub regex_filter: String,
    pub use_blob_urls: bool,
}

impl Default for ImportStorageOptions {
    fn default() -> Self {
        Self {
            title: "Local File Storage".to_string(),
            regex_filter: DEFAULT_REGEX_FILTER.to_string(),
            use_blob_urls: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct SyncRequest<'a> {
    scan_all: bool,
    project: i64,
    params: SyncParams<'a>,
}

#[derive(Debug, Serialize)]
struct SyncParams<'a> {
    path: &'a str,
    regex_filter: &'a str,
}

/// Storage resource as returned with server-side validation requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationResult(pub JsonValue);

/// Sync response, passed through as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncResult(pub JsonValue);

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Manages the project's local-file storages and the directory they import from.
pub struct StorageCoordinator {
    session: Session,
    project_id: i64,
    document_root: PathBuf,
    data_dir: PathBuf,
    title: String,
    create_retry: RetryPolicy,
}

impl StorageCoordinator {
    /// Ensures `document_root` and its sync subdirectory exist with mode 0755.
    pub async fn new(
        session: Session,
        project_id: i64,
        document_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let document_root = document_root.into();
        let data_dir = document_root.join(SYNC_DIR_NAME);

        ensure_dir(&document_root).await?;
        ensure_dir(&data_dir).await?;

        Ok(Self {
            session,
            project_id,
            document_root,
            data_dir,
            title: DEFAULT_STORAGE_TITLE.to_string(),
            create_retry: CREATE_RETRY,
        })
    }

    /// Title given to storages created by [`StorageCoordinator::create_storage`].
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_create_retry(mut self, policy: RetryPolicy) -> Self {
        self.create_retry = policy;
        self
    }

    pub fn document_root(&self) -> &Path {
        &self.document_root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub async fn list_storages(&self, project_id: i64) -> Result<Vec<LocalStorage>> {
        let request = self
            .session
            .request(Method::GET, STORAGES_PATH)
            .query(&[("project", project_id)]);
        let storages: Vec<LocalStorage> = self.session.json("list storages", request).await?;
        tracing::info!(project_id, count = storages.len(), "Listed storages");
        Ok(storages)
    }

    pub async fn get_storage(&self, storage_id: i64) -> Result<LocalStorage> {
        let request = self
            .session
            .request(Method::GET, &storage_path(storage_id));
        self.session.json("get storage", request).await
    }

    /// Register the sync directory as a new storage of `project_id`. Callers
    /// only do this when the project has no storage yet.
    pub async fn create_storage(&self, project_id: i64) -> Result<LocalStorage> {
        let path = self.data_dir.to_string_lossy();
        let payload = NewStorage {
            kind: Some(STORAGE_TYPE),
            title: &self.title,
            path: &path,
            regex_filter: DEFAULT_REGEX_FILTER,
            use_blob_urls: true,
            presign: false,
            project: project_id,
        };
        tracing::info!(payload = ?payload, "Creating storage");

        let storage: LocalStorage = self
            .create_retry
            .run("create storage", Error::is_retryable, || {
                let request = self
                    .session
                    .request(Method::POST, STORAGES_PATH)
                    .json(&payload);
                self.session.json("create storage", request)
            })
            .await?;

        tracing::info!(storage_id = storage.id, project_id, "Created storage");
        Ok(storage)
    }

    /// Check the storage is listed for the project, log what the local
    /// directories contain, then ask the service to validate it.
    pub async fn validate_storage(&self, storage_id: i64) -> Result<ValidationResult> {
        tracing::info!(storage_id, "Validating storage");

        let storages = self.list_storages(self.project_id).await?;
        if !storages.iter().any(|s| s.id == storage_id) {
            tracing::error!(storage_id, project_id = self.project_id, "Storage is not listed");
            return Err(Error::NotFound(format!("storage {storage_id}")));
        }

        for dir in [&self.document_root, &self.data_dir] {
            log_directory(dir).await;
        }

        let request = self
            .session
            .request(Method::GET, &storage_path(storage_id))
            .query(&[("validate", "true")]);
        let result = ValidationResult(self.session.json("validate storage", request).await?);
        tracing::info!(storage_id, result = %result, "Storage validated");
        Ok(result)
    }

    /// Ask the service to scan the sync directory. The directory must exist;
    /// an empty one only produces a warning.
    pub async fn sync_storage(&self, storage_id: i64, scan_all: bool) -> Result<SyncResult> {
        let is_dir = fs::metadata(&self.data_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            tracing::error!(path = %self.data_dir.display(), "Sync directory does not exist");
            return Err(Error::NotFound(format!(
                "directory {} does not exist",
                self.data_dir.display()
            )));
        }

        let files = list_entries(&self.data_dir)
            .await
            .map_err(|err| Error::io(&self.data_dir, err))?;
        if files.is_empty() {
            tracing::warn!(path = %self.data_dir.display(), "Sync directory is empty");
        } else {
            tracing::info!(path = %self.data_dir.display(), count = files.len(), "Found files to sync");
        }

        let path = self.data_dir.to_string_lossy();
        let payload = SyncRequest {
            scan_all,
            project: self.project_id,
            params: SyncParams {
                path: &path,
                regex_filter: DEFAULT_REGEX_FILTER,
            },
        };
        let request = self
            .session
            .request(Method::POST, &format!("{}/sync", storage_path(storage_id)))
            .json(&payload);
        let result = SyncResult(self.session.json("sync storage", request).await?);
        tracing::info!(storage_id, result = %result, "Storage synchronized");
        Ok(result)
    }

    /// Import statistics the service keeps for the storage, passed through
    /// as received.
    pub async fn storage_stats(&self, storage_id: i64) -> Result<JsonValue> {
        let request = self
            .session
            .request(Method::GET, &format!("{}/stats", storage_path(storage_id)));
        let stats: JsonValue = self
            .session
            .json("storage stats", request)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, storage_id, "Failed to fetch storage stats");
                err
            })?;
        tracing::info!(storage_id, stats = %stats, "Fetched storage import stats");
        Ok(stats)
    }

    pub async fn update_storage(
        &self,
        storage_id: i64,
        update: &StorageUpdate,
    ) -> Result<LocalStorage> {
        tracing::info!(storage_id, update = ?update, "Updating storage");
        let request = self
            .session
            .request(Method::PATCH, &storage_path(storage_id))
            .json(update);
        self.session.json("update storage", request).await
    }

    /// `true` only when the service answers 204 No Content.
    pub async fn delete_storage(&self, storage_id: i64) -> Result<bool> {
        let response = self
            .session
            .request(Method::DELETE, &storage_path(storage_id))
            .send()
            .await
            .map_err(|err| Error::request("delete storage", err))?;

        let status = response.status();
        let deleted = status == StatusCode::NO_CONTENT;
        if deleted {
            tracing::info!(storage_id, "Deleted storage");
        } else {
            tracing::warn!(storage_id, status = %status, "Storage was not deleted");
        }
        Ok(deleted)
    }
}

fn storage_path(storage_id: i64) -> String {
    format!("{STORAGES_PATH}/{storage_id}")
}

/// Create `path` (and parents) if needed and set it to mode 0755.
pub(crate) async fn ensure_dir(path: &Path) -> Result<()> {
    if fs::metadata(path).await.is_err() {
        tracing::info!(path = %path.display(), "Creating directory");
    }
    fs::create_dir_all(path)
        .await
        .map_err(|err| Error::io(path, err))?;
    set_dir_mode(path).await
}

#[cfg(unix)]
async fn set_dir_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(DIR_MODE))
        .await
        .map_err(|err| Error::io(path, err))
}

#[cfg(not(unix))]
async fn set_dir_mode(_path: &Path) -> Result<()> {
    Ok(())
}

async fn list_entries(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut read_dir = fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

// Informational only: failures are logged, never returned.
async fn log_directory(dir: &Path) {
    match list_entries(dir).await {
        Ok(names) => {
            let preview = &names[..names.len().min(LISTING_PREVIEW)];
            let mode = dir_mode(dir).await.unwrap_or_else(|| "unknown".to_string());
            tracing::info!(
                path = %dir.display(),
                total = names.len(),
                preview = ?preview,
                mode = %mode,
                "Checked directory"
            );
        }
        Err(err) => {
            tracing::error!(path = %dir.display(), error = %err, "Failed to inspect directory");
        }
    }
}

#[cfg(unix)]
async fn dir_mode(dir: &Path) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(dir).await.ok()?;
    Some(format!("{:o}", metadata.permissions().mode() & 0o777))
}

#[cfg(not(unix))]
async fn dir_mode(_dir: &Path) -> Option<String> {
    None
}
