//! One end-to-end provisioning run.

use crate::conf::Conf;
use crate::connection::ServiceConnection;
use crate::error::Result;
use crate::project::ProjectSlot;
use crate::storage::{StorageCoordinator, SyncResult, ValidationResult};

#[derive(Debug, Clone)]
pub struct Provisioned {
    pub project_id: i64,
    pub storage_id: i64,
    pub created_storage: bool,
    pub validation: ValidationResult,
    pub sync: SyncResult,
}

/// Ensure the project and its local storage exist, then validate and sync.
///
/// Returns `Ok(None)` when local file serving is not configured or the
/// service fails its health check. Any other failure is logged and returned;
/// nothing created before the failure is rolled back.
pub async fn provision(conf: &Conf) -> Result<Option<Provisioned>> {
    match run(conf).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            tracing::error!(error = %err, "Local storage provisioning failed");
            Err(err)
        }
    }
}

async fn run(conf: &Conf) -> Result<Option<Provisioned>> {
    let local = match conf.local_files() {
        Ok(local) => local,
        Err(err) => {
            tracing::error!(error = %err, "Local file serving is not configured");
            return Ok(None);
        }
    };

    let mut slot = ProjectSlot::new();
    let connection = ServiceConnection::connect(conf, &mut slot).await?;

    if !connection.check_health().await {
        tracing::error!("Could not establish a connection to the labeling service");
        return Ok(None);
    }

    let project_id = connection.get_project_id(&mut slot).await?;
    tracing::info!(project_id, "Resolved project");

    let coordinator =
        StorageCoordinator::new(connection.session().clone(), project_id, &local.document_root)
            .await?
            .with_title(&connection.settings().project_name);

    let storages = coordinator.list_storages(project_id).await?;
    let (storage_id, created_storage) = match storages.first() {
        Some(existing) => {
            tracing::info!(storage_id = existing.id, "Using existing storage");
            (existing.id, false)
        }
        None => {
            let storage = coordinator.create_storage(project_id).await?;
            tracing::info!(storage_id = storage.id, "Created new storage");
            (storage.id, true)
        }
    };

    let validation = coordinator.validate_storage(storage_id).await?;

    tracing::info!(storage_id, "Starting storage sync");
    let sync = coordinator.sync_storage(storage_id, true).await?;

    tracing::info!(
        storage_id,
        validation = %validation,
        sync = %sync,
        "Local storage is configured"
    );

    Ok(Some(Provisioned {
        project_id,
        storage_id,
        created_storage,
        validation,
        sync,
    }))
}
