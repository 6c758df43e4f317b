//! Garbage collection over temp storages.

use chrono::{Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use vermeer::{
    ContentFile, ContextConfig, Disk, FileSource, Manager, MemoryDisk, RunMode, VermeerConfig,
    unit_of_work,
};

fn manager(toml: &str, run_mode: RunMode) -> (Manager, Arc<MemoryDisk>) {
    let disk = Arc::new(MemoryDisk::new());
    let manager = Manager::builder()
        .config(VermeerConfig::from_toml(toml).unwrap())
        .shared_disk("local", disk.clone())
        .run_mode(run_mode)
        .build()
        .unwrap();
    (manager, disk)
}

async fn save_aged(manager: &Manager, disk: &MemoryDisk, name: &str, age: Duration) -> String {
    let temp = manager.context("uploads").unwrap().temp_storage().await;
    let stored = temp
        .save_new_file(&FileSource::Content(ContentFile::new(b"x".to_vec(), name)), false)
        .await
        .unwrap();
    let full = format!("{}/{}", temp.name_generator().root_directory(), stored.path());
    assert!(disk.touch(&full, Utc::now() - age));
    stored.path().to_string()
}

const NO_TRIGGER: &str = r#"
[contexts.uploads]
gc_probability = 0
"#;

#[tokio::test]
async fn test_collect_selects_expired_files() {
    let (manager, disk) = manager(NO_TRIGGER, RunMode::Interactive);
    let fresh = save_aged(&manager, &disk, "fresh.txt", Duration::seconds(10)).await;
    let stale = save_aged(&manager, &disk, "stale.txt", Duration::seconds(200)).await;

    let gc = manager.context("uploads").unwrap().garbage_collector();
    let collected = gc.collect(Some(StdDuration::from_secs(100))).await.unwrap();

    assert_eq!(collected, vec![stale.clone()]);
    assert!(!collected.contains(&fresh));
}

#[tokio::test]
async fn test_clean_deletes_files_formats_and_directories() {
    let (manager, disk) = manager(
        r#"
[contexts.uploads]
gc_probability = 0

[contexts.uploads.garbage_collector]
lifetime = 100
"#,
        RunMode::Interactive,
    );
    let fresh = save_aged(&manager, &disk, "fresh.txt", Duration::seconds(10)).await;
    let stale = save_aged(&manager, &disk, "stale.txt", Duration::seconds(200)).await;

    let context = manager.context("uploads").unwrap();
    let temp = context.temp_storage().await;
    disk.put(
        &temp.name_generator().path_for_new_formatted_file(&stale, "copy", Some("txt")),
        b"derived",
    )
    .await
    .unwrap();

    let deleted = context.garbage_collector().clean(None).await.unwrap();

    assert_eq!(deleted, vec![stale.clone()]);
    assert!(!temp.file_exists(&stale, None).await.unwrap());
    assert!(temp.file_formats(&stale).await.unwrap().is_empty());
    assert!(temp.file_exists(&fresh, None).await.unwrap());
    assert_eq!(temp.files().await.unwrap(), vec![fresh]);
}

#[tokio::test]
async fn test_clean_explicit_paths_is_best_effort() {
    let (manager, disk) = manager(NO_TRIGGER, RunMode::Interactive);
    let kept = save_aged(&manager, &disk, "kept.txt", Duration::seconds(0)).await;
    let gone = save_aged(&manager, &disk, "gone.txt", Duration::seconds(0)).await;

    let gc = manager.context("uploads").unwrap().garbage_collector();
    let deleted = gc
        .clean(Some(vec!["not a path".to_string(), gone.clone()]))
        .await
        .unwrap();

    assert_eq!(deleted.len(), 2);
    let temp = gc.storage();
    assert!(!temp.file_exists(&gone, None).await.unwrap());
    assert!(temp.file_exists(&kept, None).await.unwrap());
}

#[tokio::test]
async fn test_trigger_runs_on_first_temp_access_in_interactive_mode() {
    let disk = Arc::new(MemoryDisk::new());
    let stale_config = ContextConfig::default()
        .with_gc_probability(1)
        .with_gc_divisor(1);

    // Seed an expired file through a batch-mode manager
    let seeding = Manager::builder()
        .shared_disk("local", disk.clone())
        .context("uploads", stale_config.clone())
        .run_mode(RunMode::Batch)
        .build()
        .unwrap();
    let stale = save_aged(&seeding, &disk, "old.txt", Duration::days(2)).await;
    assert!(seeding.context("uploads").unwrap().temp_storage().await.file_exists(&stale, None).await.unwrap());

    let interactive = Manager::builder()
        .shared_disk("local", disk.clone())
        .context("uploads", stale_config)
        .build()
        .unwrap();
    let temp = interactive.context("uploads").unwrap().temp_storage().await;

    assert!(!temp.file_exists(&stale, None).await.unwrap());
    assert!(disk.is_empty());
}

#[tokio::test]
async fn test_each_unit_of_work_gets_its_own_trigger() {
    let disk = Arc::new(MemoryDisk::new());
    let manager = Manager::builder()
        .shared_disk("local", disk.clone())
        .context(
            "uploads",
            ContextConfig::default().with_gc_probability(1).with_gc_divisor(1),
        )
        .build()
        .unwrap();
    let context = manager.context("uploads").unwrap();

    let stale = unit_of_work(async {
        let temp = context.temp_storage().await;
        let stored = temp
            .save_new_file(&FileSource::Content(ContentFile::new(b"x".to_vec(), "a.txt")), false)
            .await
            .unwrap();
        let full = format!("{}/{}", temp.name_generator().root_directory(), stored.path());
        assert!(disk.touch(&full, Utc::now() - Duration::days(2)));

        // Later access in the same unit does not roll again
        let again = context.temp_storage().await;
        assert!(again.file_exists(stored.path(), None).await.unwrap());
        stored.path().to_string()
    })
    .await;

    unit_of_work(async {
        let temp = context.temp_storage().await;
        assert!(!temp.file_exists(&stale, None).await.unwrap());
    })
    .await;
    assert!(disk.is_empty());
}

#[tokio::test]
async fn test_batch_mode_never_triggers_but_operator_sweep_runs() {
    let config = r#"
[contexts.uploads]
gc_probability = 1
gc_divisor = 1
"#;
    let (manager, disk) = manager(config, RunMode::Batch);
    let stale = save_aged(&manager, &disk, "old.txt", Duration::days(2)).await;

    let temp = manager.context("uploads").unwrap().temp_storage().await;
    assert!(temp.file_exists(&stale, None).await.unwrap());

    let deleted = manager.collect_garbage("uploads").await.unwrap();
    assert_eq!(deleted, vec![stale]);
    assert!(disk.is_empty());
}
