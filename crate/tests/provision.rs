use std::path::Path;

use labelsync::conf::{
    ENV_API_KEY, ENV_LOCAL_FILES_DOCUMENT_ROOT, ENV_LOCAL_FILES_SERVING_ENABLED, ENV_PASSWORD,
    ENV_PROJECT_NAME, ENV_URL, ENV_USERNAME,
};
use labelsync::{provision, Conf, LABEL_CONFIG, SYNC_DIR_NAME};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECTS: &str = "/api/projects";
const STORAGES: &str = "/api/storages/localfiles";

fn conf(url: &str, document_root: Option<&Path>) -> Conf {
    let mut env = vec![
        (ENV_URL, url.to_string()),
        (ENV_API_KEY, "secret".to_string()),
        (ENV_USERNAME, "admin".to_string()),
        (ENV_PASSWORD, "admin".to_string()),
        (ENV_PROJECT_NAME, "Drone Detection".to_string()),
    ];
    if let Some(root) = document_root {
        env.push((ENV_LOCAL_FILES_SERVING_ENABLED, "true".to_string()));
        env.push((ENV_LOCAL_FILES_DOCUMENT_ROOT, root.display().to_string()));
    }
    let env = env.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    Conf::from_sources(&[], Some(env)).unwrap()
}

async fn mount_service(server: &MockServer, health_status: u16) {
    Mock::given(method("GET"))
        .and(path("/api/current-user/whoami"))
        .and(header("authorization", "Token secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(health_status))
        .mount(server)
        .await;
}

async fn mount_validate_and_sync(server: &MockServer, storage_id: i64, project_id: i64) {
    Mock::given(method("GET"))
        .and(path(format!("{STORAGES}/{storage_id}")))
        .and(query_param("validate", "true"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": storage_id, "status": "ok"})),
        )
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{STORAGES}/{storage_id}/sync")))
        .and(body_partial_json(json!({"scan_all": true, "project": project_id})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": storage_id, "last_sync_count": 2})),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn first_run_creates_project_and_storage() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let data_dir = root.path().join(SYNC_DIR_NAME);
    mount_service(&server, 200).await;

    Mock::given(method("GET"))
        .and(path(PROJECTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(PROJECTS))
        .and(body_partial_json(json!({
            "title": "Drone Detection",
            "label_config": LABEL_CONFIG,
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({"id": 7, "title": "Drone Detection"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    // The first listing is empty, later ones include the created storage.
    Mock::given(method("GET"))
        .and(path(STORAGES))
        .and(query_param("project", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(STORAGES))
        .and(query_param("project", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 3, "project": 7}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(STORAGES))
        .and(body_partial_json(json!({
            "type": "localfiles",
            "title": "Drone Detection",
            "path": data_dir.display().to_string(),
            "project": 7,
            "use_blob_urls": true,
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 3, "project": 7})))
        .expect(1)
        .mount(&server)
        .await;
    mount_validate_and_sync(&server, 3, 7).await;

    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("frame_001.jpg"), b"jpg").unwrap();

    let outcome = provision(&conf(&server.uri(), Some(root.path())))
        .await
        .unwrap()
        .expect("provisioning should complete");

    assert_eq!(outcome.project_id, 7);
    assert_eq!(outcome.storage_id, 3);
    assert!(outcome.created_storage);
    assert_eq!(outcome.sync.0["last_sync_count"], 2);
    assert!(data_dir.is_dir());
}

#[tokio::test]
async fn second_run_reuses_project_and_storage() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    mount_service(&server, 200).await;

    Mock::given(method("GET"))
        .and(path(PROJECTS))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": 11, "title": "drone detection"}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(PROJECTS))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(STORAGES))
        .and(query_param("project", "11"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": 5, "project": 11}, {"id": 6, "project": 11}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(STORAGES))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;
    mount_validate_and_sync(&server, 5, 11).await;

    let outcome = provision(&conf(&server.uri(), Some(root.path())))
        .await
        .unwrap()
        .expect("provisioning should complete");

    assert_eq!(outcome.project_id, 11);
    assert_eq!(outcome.storage_id, 5);
    assert!(!outcome.created_storage);
    assert!(root.path().join(SYNC_DIR_NAME).is_dir());
}

#[tokio::test]
async fn missing_local_files_settings_stop_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = provision(&conf(&server.uri(), None)).await.unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn unhealthy_service_stops_before_storage_calls() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    mount_service(&server, 500).await;

    Mock::given(method("GET"))
        .and(path(PROJECTS))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": 11, "title": "Drone Detection"}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(STORAGES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = provision(&conf(&server.uri(), Some(root.path()))).await.unwrap();
    assert!(outcome.is_none());
}
