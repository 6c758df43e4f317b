//! Not-found handler chains.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use vermeer::{
    ContentFile, FileNotFoundHandler, FileSource, HandlerConfig, LogHandler, Manager, MemoryDisk,
    NotFoundError, Registry, Resolution, Storage, VermeerConfig, VermeerResult, handler_factory,
};

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 200, 10, 255]));
    let mut bytes = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

fn manager(toml: &str) -> Manager {
    Manager::builder()
        .config(VermeerConfig::from_toml(toml).unwrap())
        .disk("local", MemoryDisk::new().with_url("https://cdn.test"))
        .build()
        .unwrap()
}

async fn saved(manager: &Manager) -> (Arc<Storage>, String) {
    let storage = manager.context("avatars").unwrap().main_storage();
    let stored = storage
        .save_new_file(&FileSource::Content(ContentFile::new(png(30, 20), "me.png")), false)
        .await
        .unwrap();
    (storage, stored.path().to_string())
}

/// Counts invocations and continues.
struct Counting(Arc<AtomicUsize>);

#[async_trait::async_trait]
impl FileNotFoundHandler for Counting {
    async fn handle(&self, _error: &NotFoundError, _storage: &Arc<Storage>) -> VermeerResult<Resolution> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Resolution::Continue)
    }
}

#[tokio::test]
async fn test_url_handler_replaces_missing_files() {
    let manager = manager(
        r#"
[contexts.avatars]
file_not_found_handlers = ["log", "url:url=https://cdn.test/placeholder.png"]
"#,
    );
    let (storage, path) = saved(&manager).await;

    assert_eq!(
        storage.file_url(&path, Some("thumb")).await.unwrap(),
        "https://cdn.test/placeholder.png"
    );
    assert_eq!(
        storage.file_url("zz99/missing.png", None).await.unwrap(),
        "https://cdn.test/placeholder.png"
    );
    // The placeholder has no bytes
    assert!(storage.file_contents(&path, Some("thumb")).await.unwrap().is_empty());
    assert!(!storage.file_exists(&path, Some("thumb")).await.unwrap());
}

#[tokio::test]
async fn test_format_handler_falls_back_to_existing_format() {
    let manager = manager(
        r#"
[contexts.avatars]
file_not_found_handlers = ["format:format=thumb"]

[contexts.avatars.formats]
thumb = "thumbnail:width=8,height=8"
large = "resize:width=600,upsize=true"
"#,
    );
    let (storage, path) = saved(&manager).await;

    // Fallback format missing too: the miss surfaces
    assert!(storage.file_url(&path, Some("large")).await.unwrap_err().is_not_found());

    storage.generate_formatted_file(&path, "thumb").await.unwrap();
    let url = storage.file_url(&path, Some("large")).await.unwrap();
    assert!(url.ends_with("/thumb.png"));
    assert_eq!(
        storage.file_size(&path, Some("large")).await.unwrap(),
        storage.file_size(&path, Some("thumb")).await.unwrap()
    );
}

#[tokio::test]
async fn test_fail_handler_stops_the_chain() {
    let calls = Arc::new(AtomicUsize::new(0));
    let manager = Manager::builder()
        .config(
            VermeerConfig::from_toml(
                r#"
[contexts.avatars]
file_not_found_handlers = ["fail", "empty"]
"#,
            )
            .unwrap(),
        )
        .disk("local", MemoryDisk::new())
        .handler("avatars", HandlerConfig::Instance(Arc::new(Counting(calls.clone()))))
        .build()
        .unwrap();
    let (storage, path) = saved(&manager).await;

    assert!(storage.file_url(&path, Some("thumb")).await.unwrap_err().is_not_found());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_handler_filters() {
    let calls = Arc::new(AtomicUsize::new(0));
    let manager = Manager::builder()
        .config(
            VermeerConfig::from_toml(
                r#"
[contexts.avatars]
file_not_found_handlers = [
    "empty:url=https://cdn.test/thumb.png,formats=thumb",
    "empty:url=https://cdn.test/other.png,except_storages=temp",
]
"#,
            )
            .unwrap(),
        )
        .disk("local", MemoryDisk::new())
        .handler("avatars", HandlerConfig::Instance(Arc::new(Counting(calls.clone()))))
        .build()
        .unwrap();
    let (storage, path) = saved(&manager).await;

    assert_eq!(
        storage.file_url(&path, Some("thumb")).await.unwrap(),
        "https://cdn.test/thumb.png"
    );
    assert_eq!(
        storage.file_url(&path, Some("large")).await.unwrap(),
        "https://cdn.test/other.png"
    );

    let temp = manager.context("avatars").unwrap().temp_storage().await;
    assert!(temp.file_url("ab12/none.png", Some("large")).await.unwrap_err().is_not_found());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_generate_handler_passes_when_it_cannot_help() {
    let calls = Arc::new(AtomicUsize::new(0));
    let manager = Manager::builder()
        .config(
            VermeerConfig::from_toml(
                r#"
[contexts.avatars]
file_not_found_handlers = ["generate"]

[contexts.avatars.formats]
thumb = "thumbnail:width=8,height=8"
"#,
            )
            .unwrap(),
        )
        .disk("local", MemoryDisk::new())
        .handler("avatars", HandlerConfig::Instance(Arc::new(Counting(calls.clone()))))
        .build()
        .unwrap();
    let (storage, path) = saved(&manager).await;

    // No formatter for the name
    assert!(storage.file_url(&path, Some("sepia")).await.unwrap_err().is_not_found());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Origin itself missing: the formatter's read of the origin misses too
    assert!(storage.file_url("ab12/gone.png", Some("thumb")).await.unwrap_err().is_not_found());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Origin read
    assert!(storage.file_url("ab12/gone.png", None).await.unwrap_err().is_not_found());
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    // Generation succeeds and short-circuits the rest of the chain
    assert!(storage.file_exists(&path, Some("thumb")).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_generate_handler_ignores_oversized_format_names() {
    let manager = manager(
        r#"
[contexts.avatars]
file_not_found_handlers = ["generate"]
"#,
    );
    let (storage, path) = saved(&manager).await;

    let url = storage.file_url(&path, Some("16x16")).await.unwrap();
    assert!(url.contains("/formats/"), "{}", url);

    let err = storage.file_url(&path, Some("50000x50000")).await.unwrap_err();
    assert_eq!(err.not_found().unwrap().format.as_deref(), Some("50000x50000"));
    assert!(storage.file_url(&path, Some("70000")).await.unwrap_err().is_not_found());
    assert_eq!(storage.file_formats(&path).await.unwrap(), vec!["16x16".to_string()]);
}

#[tokio::test]
async fn test_handlers_are_resolved_on_first_miss_and_cached() {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    let mut registry = Registry::default();
    registry.register_handler(
        "counted",
        handler_factory(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(LogHandler) as Arc<dyn FileNotFoundHandler>)
        }),
    );
    let manager = Manager::builder()
        .config(
            VermeerConfig::from_toml(
                r#"
[contexts.avatars]
file_not_found_handlers = ["counted"]
"#,
            )
            .unwrap(),
        )
        .disk("local", MemoryDisk::new())
        .registry(registry)
        .build()
        .unwrap();
    let (storage, path) = saved(&manager).await;
    assert_eq!(builds.load(Ordering::SeqCst), 0);

    assert!(storage.file_url(&path, Some("thumb")).await.unwrap_err().is_not_found());
    assert!(storage.file_url(&path, Some("large")).await.unwrap_err().is_not_found());
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_handler_alias_surfaces_on_first_miss() {
    let manager = manager(
        r#"
[contexts.avatars]
file_not_found_handlers = ["teleport"]
"#,
    );
    let (storage, path) = saved(&manager).await;

    // Reads that hit stay unaffected
    assert!(storage.file_exists(&path, None).await.unwrap());
    assert!(storage.file_url(&path, Some("thumb")).await.unwrap_err().is_configuration());
}
