use std::path::Path;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::conf::{Conf, ServiceSettings};
use crate::error::{Error, Result};
use crate::project::{is_match, NewProject, Project, ProjectSlot, LABEL_CONFIG};
use crate::retry::RetryPolicy;
use crate::storage::{ensure_dir, ImportStorageOptions, LocalStorage, NewStorage, SYNC_DIR_NAME};

pub use labelsync_waiter::{HEALTH_PATH, PROBE_TIMEOUT};

const WHOAMI_PATH: &str = "/api/current-user/whoami";
const PROJECTS_PATH: &str = "/api/projects";
pub(crate) const STORAGES_PATH: &str = "/api/storages/localfiles";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PROJECT_PAGE_SIZE: u32 = 100;

/// Session establishment: 5 attempts, waits of 4, 4, 8 and 16 seconds.
pub const SESSION_RETRY: RetryPolicy = RetryPolicy::new(
    5,
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(30),
);

/// Authenticated access to the labeling service REST API.
#[derive(Debug, Clone)]
pub struct Session {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl Session {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| Error::request("build http client", err))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(method = %method, url = %url, "Sending request");
        self.client
            .request(method, url)
            .header(AUTHORIZATION, format!("Token {}", self.api_key))
    }

    /// Liveness request, bounded by the readiness check timeout rather than the
    /// session's request timeout.
    pub(crate) fn health_request(&self) -> RequestBuilder {
        self.request(Method::GET, HEALTH_PATH).timeout(PROBE_TIMEOUT)
    }

    /// Send `request`, turning any non-success status into [`Error::Remote`].
    pub(crate) async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|err| Error::request(operation, err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                operation,
                status = %status,
                body = %body,
                "Request failed"
            );
            return Err(Error::Remote {
                operation,
                status,
                body,
            });
        }
        Ok(response)
    }

    pub(crate) async fn json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T> {
        self.send(operation, request)
            .await?
            .json()
            .await
            .map_err(|err| Error::request(operation, err))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProjectListing {
    Page {
        results: Vec<Project>,
        #[serde(default)]
        next: Option<String>,
    },
    All(Vec<Project>),
}

/// Validated settings plus an established session.
pub struct ServiceConnection {
    settings: ServiceSettings,
    session: Session,
}

impl ServiceConnection {
    /// Validate configuration, establish a session and resolve the configured
    /// project into `slot`.
    pub async fn connect(conf: &Conf, slot: &mut ProjectSlot) -> Result<Self> {
        Self::connect_with_policy(conf, slot, SESSION_RETRY).await
    }

    pub async fn connect_with_policy(
        conf: &Conf,
        slot: &mut ProjectSlot,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let settings = conf.require_service()?;
        let session = Self::initialize(&settings, policy).await?;
        let connection = Self { settings, session };

        let project = connection
            .resolve_or_create_project(&connection.settings.project_name)
            .await?;
        slot.set(project);
        Ok(connection)
    }

    /// Establish a session from the URL and API key. Username and password are
    /// required by configuration but play no part here.
    pub async fn initialize(settings: &ServiceSettings, policy: RetryPolicy) -> Result<Session> {
        policy
            .run("initialize session", Error::is_retryable, || async move {
                let session = Session::new(&settings.url, &settings.api_key)?;
                session
                    .send(
                        "initialize session",
                        session.request(Method::GET, WHOAMI_PATH),
                    )
                    .await?;
                tracing::info!(url = %settings.url, "Connected to labeling service");
                Ok(session)
            })
            .await
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Lightweight liveness call. Failures are logged and reported as `false`.
    pub async fn check_health(&self) -> bool {
        let request = self.session.health_request();
        match self.session.send("health check", request).await {
            Ok(response) => {
                let body = response.text().await.unwrap_or_default();
                tracing::info!(body = %body, "Labeling service connection verified");
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "Labeling service health check failed");
                false
            }
        }
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let mut projects = Vec::new();
        let mut page = 1u32;
        loop {
            let request = self
                .session
                .request(Method::GET, PROJECTS_PATH)
                .query(&[("page", page), ("page_size", PROJECT_PAGE_SIZE)]);
            match self.session.json("list projects", request).await? {
                ProjectListing::All(items) => {
                    projects.extend(items);
                    break;
                }
                ProjectListing::Page { results, next } => {
                    projects.extend(results);
                    if next.is_none() {
                        break;
                    }
                    page += 1;
                }
            }
        }
        Ok(projects)
    }

    /// Return the first project whose normalized title matches `desired_name`,
    /// creating one with the image classification template otherwise.
    pub async fn resolve_or_create_project(&self, desired_name: &str) -> Result<Project> {
        let projects = self.list_projects().await.map_err(|err| {
            tracing::error!(error = %err, "Failed to list projects");
            err
        })?;

        if let Some(project) = projects
            .into_iter()
            .find(|p| is_match(p.title.as_deref(), Some(desired_name)))
        {
            tracing::info!(
                project_id = ?project.id,
                title = ?project.title,
                "Found existing project"
            );
            return Ok(project);
        }

        let payload = NewProject {
            title: desired_name,
            label_config: LABEL_CONFIG,
        };
        let request = self
            .session
            .request(Method::POST, PROJECTS_PATH)
            .json(&payload);
        let project: Project = self
            .session
            .json("create project", request)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, title = %desired_name, "Failed to create project");
                err
            })?;
        tracing::info!(project_id = ?project.id, title = %desired_name, "Created project");
        Ok(project)
    }

    /// Cached project id, re-resolving when the slot is empty or its record
    /// has no id.
    pub async fn get_project_id(&self, slot: &mut ProjectSlot) -> Result<i64> {
        if let Some(id) = slot.id() {
            return Ok(id);
        }

        tracing::info!("Project is not resolved yet, resolving");
        let project = self
            .resolve_or_create_project(&self.settings.project_name)
            .await?;
        slot.set(project);
        slot.id().ok_or_else(|| {
            Error::NotFound(format!(
                "project '{}' has no id in the service response",
                self.settings.project_name
            ))
        })
    }

    /// Title of `project_id`, or of the slot's project when none is given.
    pub async fn project_title(
        &self,
        slot: &mut ProjectSlot,
        project_id: Option<i64>,
    ) -> Option<String> {
        let project_id = match project_id {
            Some(id) => id,
            None => match self.get_project_id(slot).await {
                Ok(id) => id,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to resolve project");
                    return None;
                }
            },
        };

        let request = self
            .session
            .request(Method::GET, &format!("{PROJECTS_PATH}/{project_id}"));
        match self.session.json::<Project>("get project", request).await {
            Ok(project) => {
                let title = project.title.unwrap_or_default();
                tracing::info!(project_id, title = %title, "Fetched project title");
                Some(title)
            }
            Err(err) => {
                tracing::error!(error = %err, project_id, "Failed to fetch project title");
                None
            }
        }
    }

    /// Import storage registered with a path relative to the document root.
    ///
    /// This differs from [`crate::StorageCoordinator::create_storage`], which
    /// registers the absolute directory.
    pub async fn setup_import_storage(
        &self,
        project_id: i64,
        document_root: &Path,
        options: &ImportStorageOptions,
    ) -> Result<LocalStorage> {
        let full_path = document_root.join(SYNC_DIR_NAME);
        ensure_dir(&full_path).await?;
        tracing::info!(path = %full_path.display(), "Import directory is ready");

        let payload = NewStorage {
            kind: None,
            title: &options.title,
            path: SYNC_DIR_NAME,
            regex_filter: &options.regex_filter,
            use_blob_urls: options.use_blob_urls,
            presign: false,
            project: project_id,
        };
        let request = self
            .session
            .request(Method::POST, STORAGES_PATH)
            .json(&payload);
        let storage: LocalStorage = self.session.json("setup import storage", request).await?;
        tracing::info!(storage_id = storage.id, project_id, "Created import storage");
        Ok(storage)
    }

    /// Import `tasks` (each a task `data` object) into `project_id` in one
    /// request. The service's import summary is returned as received.
    pub async fn create_tasks(&self, project_id: i64, tasks: &[JsonValue]) -> Result<JsonValue> {
        tracing::info!(project_id, count = tasks.len(), "Importing tasks");
        let request = self
            .session
            .request(Method::POST, &format!("{PROJECTS_PATH}/{project_id}/import"))
            .json(tasks);
        let summary: JsonValue = self
            .session
            .json("import tasks", request)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, project_id, "Failed to import tasks");
                err
            })?;
        tracing::info!(project_id, summary = %summary, "Imported tasks");
        Ok(summary)
    }
}
