//! Project Store Integration Tests
//!
//! Every store property runs against the in-memory backend and a SQLite
//! database file in a temporary directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fc_project::repository::SqliteProjectLoader;
use fc_project::{
    parse_md5, ArtifactTransport, EventLog, EventType, FieldLimits, Flow, LocalArtifactTransport, Md5Digest,
    MemoryProjectLoader, Permission, PermissionEntry, PermissionRegistry, Project, ProjectError, ProjectLoader,
    ProjectSettings, ProjectStore, PropertyStore, Props, FlowStore, VersionStore,
};
use tempfile::TempDir;

const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

struct Backend {
    name: &'static str,
    loader: Arc<dyn ProjectLoader>,
    dir: TempDir,
}

fn artifacts(dir: &TempDir) -> Arc<dyn ArtifactTransport> {
    Arc::new(LocalArtifactTransport::new(dir.path().join("artifacts")))
}

async fn memory_backend() -> Backend {
    let dir = tempfile::tempdir().unwrap();
    let loader = MemoryProjectLoader::new(artifacts(&dir), FieldLimits::default());
    Backend {
        name: "memory",
        loader: Arc::new(loader),
        dir,
    }
}

async fn sqlite_loader(dir: &TempDir) -> SqliteProjectLoader {
    let url = format!("sqlite://{}", dir.path().join("projects.db").display());
    let loader = SqliteProjectLoader::connect(&url, 5, artifacts(dir), FieldLimits::default())
        .await
        .unwrap();
    loader.init_schema().await.unwrap();
    loader
}

async fn sqlite_backend() -> Backend {
    let dir = tempfile::tempdir().unwrap();
    let loader = sqlite_loader(&dir).await;
    Backend {
        name: "sqlite",
        loader: Arc::new(loader),
        dir,
    }
}

async fn backends() -> Vec<Backend> {
    vec![memory_backend().await, sqlite_backend().await]
}

fn empty_md5() -> Md5Digest {
    parse_md5(EMPTY_MD5).unwrap()
}

async fn add_version(loader: &dyn ProjectLoader, project_id: i32, version: i32) {
    loader
        .add_project_version(
            project_id,
            version,
            Path::new("flows.zip"),
            "alice",
            empty_md5(),
            &format!("{}/{}/flows.zip", project_id, version),
        )
        .await
        .unwrap();
}

async fn reload(loader: &dyn ProjectLoader, project: &Project) -> Project {
    loader.fetch_project_by_id(project.id).await.unwrap()
}

#[tokio::test]
async fn test_duplicate_active_name_and_reuse_after_removal() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let first = loader.create_new_project("etl", "first", "alice").await.unwrap();

        let err = loader.create_new_project("etl", "second", "bob").await.unwrap_err();
        assert!(matches!(err, ProjectError::DuplicateName { .. }), "{}: {:?}", backend.name, err);

        loader.remove_project(&first, "alice").await.unwrap();
        let second = loader.create_new_project("etl", "second", "bob").await.unwrap();
        assert_ne!(first.id, second.id, "{}", backend.name);

        let by_name = loader.fetch_project_by_name("etl").await.unwrap();
        assert_eq!(by_name.id, second.id, "{}", backend.name);
        assert!(by_name.active);

        let active: Vec<i32> = loader
            .fetch_all_active_projects()
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(active, vec![second.id], "{}", backend.name);
    }
}

#[tokio::test]
async fn test_creator_is_granted_admin() {
    for backend in backends().await {
        let project = backend
            .loader
            .create_new_project("etl", "", "alice")
            .await
            .unwrap();
        assert_eq!(project.permissions, vec![PermissionEntry::user("alice", Permission::ADMIN)]);
        assert!(project.has_permission("alice", &[], Permission::WRITE), "{}", backend.name);

        let events = backend.loader.get_project_events(&project, 10, 0).await.unwrap();
        assert_eq!(events.len(), 1, "{}", backend.name);
        assert_eq!(events[0].event_type, EventType::Created);
        assert_eq!(events[0].user, "alice");
    }
}

#[tokio::test]
async fn test_removal_keeps_history() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();
        add_version(loader, project.id, 1).await;

        loader.remove_project(&project, "bob").await.unwrap();
        // second removal is a no-op
        loader.remove_project(&project, "bob").await.unwrap();

        let removed = reload(loader, &project).await;
        assert!(!removed.active, "{}", backend.name);
        assert_eq!(removed.last_modified_by, "bob");
        assert_eq!(loader.fetch_project_versions(project.id).await.unwrap().len(), 1);

        let deletions = loader
            .get_project_events(&project, 10, 0)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == EventType::Deleted)
            .count();
        assert_eq!(deletions, 1, "{}", backend.name);

        let err = loader
            .remove_project(&Project::new(9999, "ghost", "", "alice"), "bob")
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{}", backend.name);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_add_version_exactly_one_wins() {
    for backend in backends().await {
        let project = backend
            .loader
            .create_new_project("race", "", "alice")
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let loader = backend.loader.clone();
            let project_id = project.id;
            handles.push(tokio::spawn(async move {
                loader
                    .add_project_version(
                        project_id,
                        1,
                        Path::new("flows.zip"),
                        &format!("uploader-{}", i),
                        empty_md5(),
                        &format!("race/{}", i),
                    )
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(ProjectError::DuplicateVersion { .. }) | Err(ProjectError::VersionOrdering { .. }) => {}
                Err(other) => panic!("{}: unexpected error {:?}", backend.name, other),
            }
        }
        assert_eq!(successes, 1, "{}", backend.name);
        assert_eq!(backend.loader.fetch_project_versions(project.id).await.unwrap().len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_same_name_exactly_one_wins() {
    for backend in backends().await {
        let mut handles = Vec::new();
        for i in 0..8 {
            let loader = backend.loader.clone();
            handles.push(tokio::spawn(async move {
                loader
                    .create_new_project("race", "", &format!("creator-{}", i))
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(ProjectError::DuplicateName { .. }) => {}
                Err(other) => panic!("{}: unexpected error {:?}", backend.name, other),
            }
        }
        assert_eq!(successes, 1, "{}", backend.name);
        assert_eq!(backend.loader.fetch_all_active_projects().await.unwrap().len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_permission_updates_leave_one_entry() {
    let rights = [
        Permission::READ,
        Permission::READ | Permission::WRITE,
        Permission::EXECUTE,
        Permission::SCHEDULE | Permission::METRICS,
    ];

    for backend in backends().await {
        let project = backend
            .loader
            .create_new_project("etl", "", "alice")
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let loader = backend.loader.clone();
            let project = project.clone();
            let permission = rights[i % rights.len()];
            handles.push(tokio::spawn(async move {
                loader.update_permission(&project, "bob", permission, false).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let bob: Vec<PermissionEntry> = backend
            .loader
            .get_project_permissions(project.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.principal == "bob" && !e.is_group)
            .collect();
        assert_eq!(bob.len(), 1, "{}", backend.name);
        assert!(rights.contains(&bob[0].permission), "{}", backend.name);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clean_racing_version_change_keeps_pointer_target() {
    for backend in backends().await {
        let project = backend
            .loader
            .create_new_project("etl", "", "alice")
            .await
            .unwrap();
        for v in 1..=6 {
            add_version(backend.loader.as_ref(), project.id, v).await;
        }
        backend
            .loader
            .change_project_version(&project, 6, "alice")
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..12 {
            let loader = backend.loader.clone();
            let project = project.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    loader.clean_older_project_version(project.id, 6).await.map(|_| ())
                } else {
                    let target = (i / 2) % 5 + 1;
                    match loader.change_project_version(&project, target, "bob").await {
                        Err(e) if e.is_not_found() => Ok(()),
                        other => other,
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let current = backend
            .loader
            .get_latest_project_version(&project)
            .await
            .unwrap()
            .unwrap();
        assert!(
            backend
                .loader
                .fetch_project_meta_data(project.id, current)
                .await
                .unwrap()
                .is_some(),
            "{}: current version {} was cleaned",
            backend.name,
            current
        );

        let remaining: Vec<i32> = backend
            .loader
            .fetch_project_versions(project.id)
            .await
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert!(remaining.contains(&current), "{}", backend.name);
        assert!(remaining.contains(&6), "{}", backend.name);
        assert!(remaining.iter().all(|&v| v == 6 || v == current), "{}: {:?}", backend.name, remaining);
    }
}

#[tokio::test]
async fn test_version_numbers_must_increase() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();

        let err = loader
            .add_project_version(project.id, 0, Path::new("flows.zip"), "alice", empty_md5(), "r0")
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectError::VersionOrdering { .. }), "{}", backend.name);

        add_version(loader, project.id, 3).await;
        let err = loader
            .add_project_version(project.id, 3, Path::new("flows.zip"), "alice", empty_md5(), "r3")
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectError::DuplicateVersion { version: 3, .. }), "{}", backend.name);

        let err = loader
            .add_project_version(project.id, 2, Path::new("flows.zip"), "alice", empty_md5(), "r2")
            .await
            .unwrap_err();
        assert!(
            matches!(err, ProjectError::VersionOrdering { version: 2, latest: 3, .. }),
            "{}: {:?}",
            backend.name,
            err
        );

        let err = loader
            .add_project_version(4242, 1, Path::new("flows.zip"), "alice", empty_md5(), "r1")
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{}", backend.name);
    }
}

#[tokio::test]
async fn test_change_then_get_latest_under_concurrent_reads() {
    for backend in backends().await {
        let loader = backend.loader.clone();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();
        for v in 1..=3 {
            add_version(loader.as_ref(), project.id, v).await;
        }

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let loader = loader.clone();
                let project = project.clone();
                tokio::spawn(async move {
                    for _ in 0..20 {
                        let latest = loader.get_latest_project_version(&project).await.unwrap();
                        assert!(matches!(latest, Some(1..=3)));
                    }
                })
            })
            .collect();

        for v in [3, 2, 3] {
            loader.change_project_version(&project, v, "alice").await.unwrap();
            assert_eq!(
                loader.get_latest_project_version(&project).await.unwrap(),
                Some(v),
                "{}",
                backend.name
            );
        }
        for reader in readers {
            reader.await.unwrap();
        }

        let err = loader
            .change_project_version(&project, 7, "alice")
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{}", backend.name);
        assert_eq!(loader.get_latest_project_version(&project).await.unwrap(), Some(3));
    }
}

#[tokio::test]
async fn test_latest_version_is_none_before_first_upload() {
    for backend in backends().await {
        let project = backend
            .loader
            .create_new_project("etl", "", "alice")
            .await
            .unwrap();
        assert_eq!(backend.loader.get_latest_project_version(&project).await.unwrap(), None);

        let err = backend.loader.fetch_flow(&project, "main").await.unwrap_err();
        assert!(err.is_not_found(), "{}", backend.name);
    }
}

#[tokio::test]
async fn test_clean_keeps_current_pointer() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();
        for v in 1..=4 {
            add_version(loader, project.id, v).await;
        }
        loader.change_project_version(&project, 2, "alice").await.unwrap();
        let current = reload(loader, &project).await;
        loader
            .upload_project_property(&current, &Props::new("common.properties").with("k", "v"))
            .await
            .unwrap();
        loader
            .upload_flows(&current, 1, &[Flow::empty("old")])
            .await
            .unwrap();

        let removed = loader.clean_older_project_version(project.id, 4).await.unwrap();
        let removed: Vec<i32> = removed.iter().map(|v| v.version).collect();
        assert_eq!(removed, vec![1, 3], "{}", backend.name);

        let remaining: Vec<i32> = loader
            .fetch_project_versions(project.id)
            .await
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(remaining, vec![2, 4], "{}", backend.name);

        assert_eq!(loader.get_latest_project_version(&project).await.unwrap(), Some(2));
        assert!(loader.fetch_project_properties(project.id, 1).await.unwrap().is_empty());
        assert_eq!(loader.fetch_project_properties(project.id, 2).await.unwrap().len(), 1);
        assert!(loader.fetch_project_meta_data(project.id, 1).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_update_permission_overwrites() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();

        loader
            .update_permission(&project, "bob", Permission::READ, false)
            .await
            .unwrap();
        loader
            .update_permission(&project, "bob", Permission::READ | Permission::WRITE, false)
            .await
            .unwrap();
        loader
            .update_permission(&project, "bob", Permission::EXECUTE, true)
            .await
            .unwrap();

        let permissions = loader.get_project_permissions(project.id).await.unwrap();
        assert_eq!(
            permissions,
            vec![
                PermissionEntry::user("alice", Permission::ADMIN),
                PermissionEntry::user("bob", Permission::READ | Permission::WRITE),
                PermissionEntry::group("bob", Permission::EXECUTE),
            ],
            "{}",
            backend.name
        );

        let reloaded = reload(loader, &project).await;
        assert!(reloaded.has_permission("carol", &["bob".to_string()], Permission::EXECUTE));
        assert!(!reloaded.has_permission("carol", &[], Permission::READ));

        // Permission changes carry no implicit event; callers record one.
        assert!(loader.post_event(&project, EventType::permission(true), "alice", "ops granted EXECUTE").await);
        assert!(loader.post_event(&project, EventType::permission(false), "alice", "bob granted WRITE").await);
        let types: Vec<EventType> = loader
            .get_project_events(&project, 2, 0)
            .await
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(types, vec![EventType::UserPermission, EventType::GroupPermission], "{}", backend.name);
    }
}

#[tokio::test]
async fn test_empty_permission_removes_entry() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();

        loader
            .update_permission(&project, "ops", Permission::SCHEDULE, true)
            .await
            .unwrap();
        loader
            .update_permission(&project, "ops", Permission::empty(), true)
            .await
            .unwrap();
        // absent entry is a no-op
        loader.remove_permission(&project, "ops", true).await.unwrap();
        loader.remove_permission(&project, "alice", false).await.unwrap();

        assert!(
            loader.get_project_permissions(project.id).await.unwrap().is_empty(),
            "{}",
            backend.name
        );
    }
}

#[tokio::test]
async fn test_props_round_trip() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();
        add_version(loader, project.id, 1).await;
        let project = reload(loader, &project).await;

        let props = Props::new("jobs/common.properties")
            .with("retries", "3")
            .with("alert.email", "ops@example.com")
            .with("empty", "");
        loader.upload_project_property(&project, &props).await.unwrap();

        let fetched = loader
            .fetch_project_property(&project, "jobs/common.properties")
            .await
            .unwrap();
        assert_eq!(fetched, props, "{}", backend.name);
        let keys: Vec<&str> = fetched.entries.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["retries", "alert.email", "empty"], "{}", backend.name);

        let updated = props.clone().with("retries", "5");
        loader.update_project_property(&project, &updated).await.unwrap();
        let at_version = loader
            .fetch_project_property_at(project.id, 1, "jobs/common.properties")
            .await
            .unwrap();
        assert_eq!(at_version.get("retries"), Some("5"));

        let missing = loader
            .fetch_project_property(&project, "nope.properties")
            .await
            .unwrap_err();
        assert!(missing.is_not_found(), "{}", backend.name);
    }
}

#[tokio::test]
async fn test_property_upload_requires_registered_version() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();

        let props = Props::new("a.properties").with("k", "v");
        let err = loader.upload_project_property(&project, &props).await.unwrap_err();
        assert!(err.is_not_found(), "{}", backend.name);

        let err = loader
            .upload_project_property(&project.clone().at_version(5), &props)
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{}", backend.name);
    }
}

#[tokio::test]
async fn test_flows_overwrite_per_id() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();
        add_version(loader, project.id, 1).await;

        loader
            .upload_flows(&project, 1, &[Flow::empty("b"), Flow::empty("a")])
            .await
            .unwrap();
        let graph = serde_json::json!({ "nodes": [{ "id": "extract" }], "edges": [] });
        loader
            .upload_flow(&project, 1, &Flow::new("a", graph.clone()))
            .await
            .unwrap();

        let flows = loader.fetch_all_project_flows(&project).await.unwrap();
        let ids: Vec<&str> = flows.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"], "{}", backend.name);
        assert_eq!(flows[0].graph, graph);

        let updated = Flow::new("b", serde_json::json!({ "nodes": [], "edges": [], "retries": 2 }));
        loader.update_flow(&project, 1, &updated).await.unwrap();
        assert_eq!(loader.fetch_flow(&project, "b").await.unwrap(), updated);

        let err = loader
            .update_flow(&project, 1, &Flow::empty("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{}", backend.name);
    }
}

#[tokio::test]
async fn test_etl_pipeline_scenario() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader
            .create_new_project("etl-pipeline", "Nightly ETL", "alice")
            .await
            .unwrap();

        add_version(loader, project.id, 1).await;
        let meta = loader
            .fetch_project_meta_data(project.id, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.version.md5_hex(), EMPTY_MD5);
        assert!(meta.local_file.is_none());

        loader.upload_flow(&project, 1, &Flow::empty("main")).await.unwrap();
        assert_eq!(loader.get_latest_project_version(&project).await.unwrap(), Some(1));

        add_version(loader, project.id, 2).await;
        loader.change_project_version(&project, 2, "alice").await.unwrap();
        loader.change_project_version(&project, 1, "alice").await.unwrap();
        assert_eq!(loader.get_latest_project_version(&project).await.unwrap(), Some(1));

        let removed = loader.clean_older_project_version(project.id, 2).await.unwrap();
        assert!(removed.is_empty(), "{}", backend.name);
        assert!(loader.fetch_project_meta_data(project.id, 1).await.unwrap().is_some());
        assert!(loader.fetch_project_meta_data(project.id, 2).await.unwrap().is_some());
        assert_eq!(loader.fetch_flow(&project, "main").await.unwrap(), Flow::empty("main"));
    }
}

#[tokio::test]
async fn test_events_most_recent_first_with_pagination() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();
        loader
            .update_description(&project, "Nightly ETL", "bob")
            .await
            .unwrap();
        assert!(loader.post_event(&project, EventType::Uploaded, "carol", "Uploaded flows.zip").await);

        let page = loader.get_project_events(&project, 2, 0).await.unwrap();
        let types: Vec<EventType> = page.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::Uploaded, EventType::Description], "{}", backend.name);

        let rest = loader.get_project_events(&project, 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].event_type, EventType::Created);

        assert!(loader.get_project_events(&project, 2, 3).await.unwrap().is_empty());
        assert_eq!(reload(loader, &project).await.description, "Nightly ETL");
    }
}

#[tokio::test]
async fn test_unbounded_event_page_returns_everything() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();
        loader
            .update_description(&project, "Nightly ETL", "bob")
            .await
            .unwrap();

        let all = loader.get_project_events(&project, usize::MAX, 0).await.unwrap();
        assert_eq!(all.len(), 2, "{}", backend.name);
        assert!(loader
            .get_project_events(&project, usize::MAX, usize::MAX)
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_post_event_soft_fails_when_store_is_down() {
    let dir = tempfile::tempdir().unwrap();
    let loader = sqlite_loader(&dir).await;
    let project = loader.create_new_project("etl", "", "alice").await.unwrap();

    loader.pool().close().await;

    assert!(!loader.post_event(&project, EventType::Error, "alice", "boom").await);
    let err = loader.get_project_events(&project, 10, 0).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_upload_and_fetch_file() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();

        let source: PathBuf = backend.dir.path().join("etl.zip");
        tokio::fs::write(&source, b"").await.unwrap();
        loader.upload_project_file(project.id, 1, &source, "alice").await.unwrap();

        let handler = loader.get_uploaded_file(project.id, 1).await.unwrap();
        assert_eq!(handler.version.md5_hex(), EMPTY_MD5, "{}", backend.name);
        assert_eq!(handler.version.file_name, "etl.zip");
        assert_eq!(handler.version.file_type, "zip");
        assert_eq!(handler.version.uploader, "alice");
        let local = handler.local_file.unwrap();
        assert!(tokio::fs::try_exists(&local).await.unwrap());

        // A rejected registration discards the stored blob.
        let err = loader
            .upload_project_file(project.id, 1, &source, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectError::DuplicateVersion { .. }), "{}", backend.name);

        let err = loader.get_uploaded_file(project.id, 2).await.unwrap_err();
        assert!(err.is_not_found(), "{}", backend.name);
    }
}

#[tokio::test]
async fn test_field_limits_are_enforced() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let long_name = "n".repeat(65);
        let err = loader
            .create_new_project(&long_name, "", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectError::ConstraintViolation { .. }), "{}", backend.name);

        let project = loader.create_new_project("etl", "", "alice").await.unwrap();
        let err = loader
            .update_description(&project, &"d".repeat(2049), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectError::ConstraintViolation { .. }), "{}", backend.name);
        assert!(!err.is_retryable());
    }
}

#[tokio::test]
async fn test_settings_round_trip() {
    for backend in backends().await {
        let loader = backend.loader.as_ref();
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();

        let updated = project.clone().with_settings(
            ProjectSettings::default()
                .with_proxy_user("etl-svc")
                .with_metadata("team", serde_json::json!("data")),
        );
        loader.update_project_settings(&updated).await.unwrap();

        let reloaded = reload(loader, &project).await;
        assert_eq!(reloaded.settings, updated.settings, "{}", backend.name);
    }
}

#[tokio::test]
async fn test_sqlite_creates_missing_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("data").join("projects.db");
    let url = format!("sqlite://{}", db_path.display());

    let loader = SqliteProjectLoader::connect(&url, 1, artifacts(&dir), FieldLimits::default())
        .await
        .unwrap();
    loader.init_schema().await.unwrap();
    loader.create_new_project("etl", "", "alice").await.unwrap();

    assert!(db_path.exists());
}

#[tokio::test]
async fn test_sqlite_state_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let project_id = {
        let loader = sqlite_loader(&dir).await;
        let project = loader.create_new_project("etl", "", "alice").await.unwrap();
        add_version(&loader, project.id, 1).await;
        loader.pool().close().await;
        project.id
    };

    let loader = sqlite_loader(&dir).await;
    let project = loader.fetch_project_by_id(project_id).await.unwrap();
    assert_eq!(project.version, Some(1));
    assert_eq!(project.permissions.len(), 1);
}
