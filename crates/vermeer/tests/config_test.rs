//! Configuration loading and manager wiring.

use std::io::Cursor;
use tempfile::TempDir;
use vermeer::{
    ContentFile, ContextConfigBuilder, DiskConfig, DiskDriver, FileSource, GenerateFormats,
    Manager, NameStrategy, RunMode, StorageConfigBuilder, VermeerConfig,
};

#[test]
fn test_bundled_defaults_parse() {
    let config =
        VermeerConfig::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/vermeer.toml")).unwrap();

    assert_eq!(config.run_mode, RunMode::Interactive);
    assert_eq!(*config.disks["local"].driver(), DiskDriver::Local);
    let avatars = &config.contexts["avatars"];
    assert!(avatars.formats().contains_key("thumb"));
    assert_eq!(
        avatars.main_storage().generate_formats_on_save(),
        &GenerateFormats::Formats(vec!["thumb".to_string()])
    );
    assert_eq!(*avatars.garbage_collector().lifetime(), 86_400);
}

#[test]
fn test_context_tables_only_list_changes() {
    let config = VermeerConfig::from_toml(
        r#"
run_mode = "batch"

[contexts.docs.main_storage]
generate_formats_on_save = true

[contexts.docs.main_storage.name_generator]
strategy = "origin_name"
"#,
    )
    .unwrap();

    assert_eq!(config.run_mode, RunMode::Batch);
    let docs = &config.contexts["docs"];
    assert_eq!(*docs.gc_divisor(), 100);
    assert_eq!(docs.main_storage().disk(), "local");
    assert_eq!(
        docs.main_storage().generate_formats_on_save(),
        &GenerateFormats::All(true)
    );
    assert_eq!(
        *docs.main_storage().name_generator().strategy(),
        NameStrategy::OriginName
    );
    assert_eq!(*docs.main_storage().name_generator().length(), 20);
}

#[test]
fn test_programmatic_config_written_to_file_loads_back() {
    let mut config = VermeerConfig {
        run_mode: RunMode::Batch,
        ..Default::default()
    };
    config.disks.insert(
        "scratch".to_string(),
        DiskConfig::default().with_driver(DiskDriver::Memory),
    );
    config.contexts.insert(
        "reports".to_string(),
        ContextConfigBuilder::default()
            .main_storage(
                StorageConfigBuilder::default()
                    .disk("scratch")
                    .generate_formats_on_save(GenerateFormats::All(true))
                    .build()
                    .unwrap(),
            )
            .gc_divisor(10u32)
            .build()
            .unwrap(),
    );

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("vermeer.toml");
    std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();
    let loaded = VermeerConfig::from_file(&path).unwrap();

    assert_eq!(loaded.run_mode, RunMode::Batch);
    assert_eq!(*loaded.disks["scratch"].driver(), DiskDriver::Memory);
    let reports = &loaded.contexts["reports"];
    assert_eq!(reports.main_storage().disk(), "scratch");
    assert_eq!(reports.temp_storage().disk(), "local");
    assert_eq!(*reports.gc_divisor(), 10);
    assert_eq!(
        reports.main_storage().generate_formats_on_save(),
        &GenerateFormats::All(true)
    );
}

#[test]
fn test_bad_configuration_is_reported() {
    assert!(VermeerConfig::from_toml("run_mode = 42").is_err());

    let config = VermeerConfig::from_toml(
        r#"
[contexts.docs.formats]
thumb = "sepia:tone=warm"
"#,
    )
    .unwrap();
    let manager = Manager::builder()
        .config(config)
        .disk("local", vermeer::MemoryDisk::new())
        .build()
        .unwrap();
    assert!(manager.context("docs").unwrap_err().is_configuration());
}

#[test]
fn test_unknown_disk_is_reported() {
    let config = VermeerConfig::from_toml(
        r#"
[contexts.docs.main_storage]
disk = "s3"
"#,
    )
    .unwrap();
    let manager = Manager::builder()
        .config(config)
        .disk("local", vermeer::MemoryDisk::new())
        .build()
        .unwrap();
    let err = manager.context("docs").unwrap_err();
    assert!(err.is_configuration());
    match err.kind() {
        vermeer::VermeerErrorKind::Config(config) => {
            assert_eq!(config.context.as_deref(), Some("docs"));
            assert!(config.message.contains("s3"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_local_disk_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("storage");
    let config = VermeerConfig::from_toml(&format!(
        r#"
[disks.local]
driver = "local"
root = "{}"
url = "/media"

[contexts.gallery]
file_not_found_handlers = ["generate"]

[contexts.gallery.formats]
small = "resize:width=12"
"#,
        root.display().to_string().replace('\\', "/")
    ))
    .unwrap();
    let manager = Manager::from_config(config).unwrap();
    let context = manager.context("gallery").unwrap();
    let storage = context.main_storage();

    let image = image::RgbaImage::from_pixel(48, 24, image::Rgba([1, 2, 3, 255]));
    let mut png = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut png, image::ImageFormat::Png)
        .unwrap();
    let stored = storage
        .save_new_file(&FileSource::Content(ContentFile::new(png.into_inner(), "pic.png")), true)
        .await
        .unwrap();

    let url = stored.url(Some("small")).await.unwrap();
    assert!(url.starts_with("/media/uploads/gallery/"), "{}", url);
    assert!(
        root.join("uploads/gallery")
            .join(stored.path())
            .exists()
    );

    let small = stored.contents(Some("small")).await.unwrap();
    let decoded = image::load_from_memory(&small).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (12, 6));

    stored.delete().await.unwrap();
    assert!(storage.files().await.unwrap().is_empty());
    assert_eq!(manager.context_names(), vec!["gallery".to_string()]);
}

#[tokio::test]
async fn test_register_context_at_runtime() {
    let manager = Manager::builder()
        .disk("local", vermeer::MemoryDisk::new())
        .context("avatars", vermeer::ContextConfig::default())
        .build()
        .unwrap();

    assert!(manager
        .register_context("avatars", vermeer::ContextConfig::default())
        .unwrap_err()
        .is_configuration());

    let scans = manager
        .register_context("scans", vermeer::ContextConfig::default())
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&scans, &manager.context("scans").unwrap()));
    assert!(manager
        .register_context("scans", vermeer::ContextConfig::default())
        .is_err());
    assert_eq!(
        manager.context_names(),
        vec!["avatars".to_string(), "scans".to_string()]
    );

    let stored = scans
        .main_storage()
        .save_new_file(&FileSource::Content(ContentFile::new(b"scan".to_vec(), "a.txt")), true)
        .await
        .unwrap();
    let reference = stored.reference();
    assert_eq!(reference.context, "scans");
    assert_eq!(reference.storage, "main");
}

#[test]
fn test_main_and_temp_roots_must_not_share_a_directory() {
    let shared = r#"
[contexts.docs.main_storage.name_generator]
global_prefix = ""

[contexts.docs.temp_storage.name_generator]
global_prefix = ""
"#;
    let err = Manager::builder()
        .config(VermeerConfig::from_toml(shared).unwrap())
        .disk("local", vermeer::MemoryDisk::new())
        .build()
        .unwrap_err();
    assert!(err.is_configuration());

    // Temp nested below main
    let nested = r#"
[contexts.docs.temp_storage.name_generator]
global_prefix = "uploads/docs"
"#;
    assert!(Manager::builder()
        .config(VermeerConfig::from_toml(nested).unwrap())
        .disk("local", vermeer::MemoryDisk::new())
        .build()
        .unwrap_err()
        .is_configuration());

    // Separate disks may reuse a directory name
    let separate = r#"
[contexts.docs.main_storage.name_generator]
global_prefix = ""

[contexts.docs.temp_storage]
disk = "scratch"

[contexts.docs.temp_storage.name_generator]
global_prefix = ""
"#;
    let manager = Manager::builder()
        .config(VermeerConfig::from_toml(separate).unwrap())
        .disk("local", vermeer::MemoryDisk::new())
        .disk("scratch", vermeer::MemoryDisk::new())
        .build()
        .unwrap();
    assert!(manager.context("docs").is_ok());
}

#[test]
fn test_one_disk_under_two_names_is_still_checked() {
    let disk = std::sync::Arc::new(vermeer::MemoryDisk::new());
    let manager = Manager::builder()
        .config(
            VermeerConfig::from_toml(
                r#"
[contexts.docs.main_storage.name_generator]
global_prefix = ""

[contexts.docs.temp_storage]
disk = "alias"

[contexts.docs.temp_storage.name_generator]
global_prefix = ""
"#,
            )
            .unwrap(),
        )
        .shared_disk("local", disk.clone())
        .shared_disk("alias", disk)
        .build()
        .unwrap();
    assert!(manager.context("docs").unwrap_err().is_configuration());
}

#[test]
fn test_context_roots_must_not_nest() {
    let err = Manager::builder()
        .disk("local", vermeer::MemoryDisk::new())
        .context("User", vermeer::ContextConfig::default())
        .context("UserAvatars", vermeer::ContextConfig::default())
        .build()
        .unwrap_err();
    assert!(err.is_configuration());

    let manager = Manager::builder()
        .disk("local", vermeer::MemoryDisk::new())
        .context("User", vermeer::ContextConfig::default())
        .build()
        .unwrap();
    assert!(manager
        .register_context("UserAvatars", vermeer::ContextConfig::default())
        .unwrap_err()
        .is_configuration());
    assert!(manager
        .register_context("Users", vermeer::ContextConfig::default())
        .is_ok());
}

#[test]
fn test_oversized_name_lengths_are_rejected() {
    let config = VermeerConfig::from_toml(
        r#"
[contexts.docs.main_storage.name_generator]
length = 300
"#,
    )
    .unwrap();
    let manager = Manager::builder()
        .config(config)
        .disk("local", vermeer::MemoryDisk::new())
        .build()
        .unwrap();
    assert!(manager.context("docs").unwrap_err().is_configuration());
}
