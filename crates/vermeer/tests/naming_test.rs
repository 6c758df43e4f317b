//! Path allocation against real disks.

use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;
use vermeer::{
    ContentFile, Disk, FileSource, LocalDisk, MemoryDisk, NameGenerator, NameGeneratorConfig,
    NameGeneratorConfigBuilder, NameStrategy, StorageRole, validate_origin_path,
};

fn content(name: &str) -> FileSource {
    FileSource::Content(ContentFile::new(b"data".to_vec(), name))
}

#[tokio::test]
async fn test_paths_satisfy_invariants() {
    let disk = Arc::new(MemoryDisk::new());
    let naming = NameGenerator::new("Avatars", StorageRole::Main, NameGeneratorConfig::default(), disk.clone());

    let mut seen = HashSet::new();
    for i in 0..50 {
        let path = naming
            .path_for_new_file(&content(&format!("photo {}.JPG", i)))
            .await
            .unwrap();
        assert!(validate_origin_path(&path), "{}", path);
        assert_eq!(path.split('/').count(), 2);
        assert!(path.ends_with(".jpg"));
        assert!(seen.insert(path.clone()));
        disk.put(&format!("{}/{}", naming.root_directory(), path), b"x")
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_disallowed_extensions_are_dropped() {
    let naming = NameGenerator::new(
        "docs",
        StorageRole::Main,
        NameGeneratorConfig::default(),
        Arc::new(MemoryDisk::new()),
    );

    for name in ["shell.php", "page.PHTML", ".htaccess", "run.sh", "x.way-too-long-extension"] {
        let path = naming.path_for_new_file(&content(name)).await.unwrap();
        let filename = path.split('/').nth(1).unwrap();
        assert!(!filename.contains('.'), "{} kept an extension: {}", name, path);
    }
}

#[tokio::test]
async fn test_origin_name_strategy_slugifies() {
    let config = NameGeneratorConfigBuilder::default()
        .strategy(NameStrategy::OriginName)
        .build()
        .unwrap();
    let naming = NameGenerator::new("docs", StorageRole::Temp, config, Arc::new(MemoryDisk::new()));

    assert_eq!(naming.root_directory(), "temp/docs");
    let path = naming.path_for_new_file(&content("My Report (final).PDF")).await.unwrap();
    assert!(path.ends_with("/my-report-final.pdf"), "{}", path);

    // Nothing usable left after slugifying
    let path = naming.path_for_new_file(&content("!!!.txt")).await.unwrap();
    let filename = path.split('/').nth(1).unwrap();
    assert_eq!(filename.len(), 20 + ".txt".len());
}

#[tokio::test]
async fn test_same_name_moves_to_another_shard() {
    let disk = Arc::new(MemoryDisk::new());
    let config = NameGeneratorConfigBuilder::default()
        .strategy(NameStrategy::Fixed)
        .filename("avatar")
        .build()
        .unwrap();
    let naming = NameGenerator::new("users", StorageRole::Main, config, disk.clone());

    let first = naming.path_for_new_file(&content("a.png")).await.unwrap();
    disk.put(&format!("{}/{}", naming.root_directory(), first), b"1")
        .await
        .unwrap();
    let second = naming.path_for_new_file(&content("b.png")).await.unwrap();

    assert!(first.ends_with("/avatar.png"));
    assert!(second.ends_with("/avatar.png"));
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_full_shards_are_not_reused() {
    let temp_dir = TempDir::new().unwrap();
    let disk = Arc::new(LocalDisk::new(temp_dir.path()).unwrap());
    let config = NameGeneratorConfigBuilder::default()
        .max_subdir_files_count(2usize)
        .global_prefix(Some(String::new()))
        .build()
        .unwrap();
    let naming = NameGenerator::new("docs", StorageRole::Main, config, disk.clone());
    assert_eq!(naming.root_directory(), "docs");

    let mut shards = HashSet::new();
    for _ in 0..6 {
        let path = naming.path_for_new_file(&content("a.txt")).await.unwrap();
        disk.put(&format!("docs/{}", path), b"x").await.unwrap();
        shards.insert(path.split('/').next().unwrap().to_string());
    }

    for shard in &shards {
        let count = disk.files(&format!("docs/{}", shard), false).await.unwrap().len();
        assert!(count <= 2, "shard {} holds {} files", shard, count);
    }
    assert!(shards.len() >= 3);
}

#[tokio::test]
async fn test_formatted_lookup_is_extension_agnostic() {
    let disk = Arc::new(MemoryDisk::new());
    let naming = NameGenerator::new("docs", StorageRole::Main, NameGeneratorConfig::default(), disk.clone());

    let thumb = naming.path_for_new_formatted_file("ab12/report.pdf", "thumb", Some("PNG"));
    assert_eq!(thumb, "uploads/docs/ab12/formats/report.pdf/thumb.png");
    disk.put(&thumb, b"png").await.unwrap();

    assert_eq!(
        naming.full_path("ab12/report.pdf", Some("thumb")).await.unwrap(),
        Some(thumb.clone())
    );
    assert_eq!(naming.full_path("ab12/report.pdf", Some("large")).await.unwrap(), None);
    assert_eq!(
        naming.full_path("ab12/report.pdf", None).await.unwrap(),
        Some("uploads/docs/ab12/report.pdf".to_string())
    );
    let listed = naming.list_formatted_files("ab12/report.pdf").await.unwrap();
    assert_eq!(listed.get(&thumb).map(String::as_str), Some("thumb"));

    // Unsafe extensions are never used for formatted files either
    assert_eq!(
        naming.path_for_new_formatted_file("ab12/report.pdf", "script", Some("php")),
        "uploads/docs/ab12/formats/report.pdf/script"
    );
}

#[tokio::test]
async fn test_oversized_lengths_still_yield_valid_paths() {
    let config = NameGeneratorConfigBuilder::default()
        .length(300usize)
        .subdir_name_length(400usize)
        .build()
        .unwrap();
    assert!(config.validate().unwrap_err().is_configuration());

    let naming = NameGenerator::new("docs", StorageRole::Main, config, Arc::new(MemoryDisk::new()));
    let path = naming.path_for_new_file(&content("report.txt")).await.unwrap();
    assert!(validate_origin_path(&path), "{}", path);
    assert!(path.split('/').nth(1).unwrap().len() <= 255);
}
