//! Validator chains run by contexts.

use std::sync::Arc;
use vermeer::{
    ContentFile, FileSource, Manager, MemoryDisk, SizeValidator, ValidatorConfig, VermeerConfig,
};

fn manager(toml: &str) -> (Manager, Arc<MemoryDisk>) {
    let disk = Arc::new(MemoryDisk::new());
    let manager = Manager::builder()
        .config(VermeerConfig::from_toml(toml).unwrap())
        .shared_disk("local", disk.clone())
        .build()
        .unwrap();
    (manager, disk)
}

#[tokio::test]
async fn test_oversized_file_skips_later_validators() {
    let (manager, disk) = manager(
        r#"
[contexts.docs]
validate = ["size:max=10M", "extensions:allowed=pdf,skip_on_error=true"]
"#,
    );
    let context = manager.context("docs").unwrap();
    let big = FileSource::Content(ContentFile::new(vec![0u8; 20 * 1024 * 1024], "big.bin"));

    let err = context.validate(&big).await.unwrap_err();
    let messages = &err.validation().expect("validation error").messages;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("10M"));

    // Saving runs the same chain and writes nothing
    let err = context.main_storage().save_new_file(&big, true).await.unwrap_err();
    assert!(err.is_validation());
    assert!(disk.is_empty());
}

#[tokio::test]
async fn test_all_failures_are_aggregated() {
    let (manager, _disk) = manager(
        r#"
[contexts.docs]
validate = ["size:min=1K", "extensions:allowed=pdf", "mime_types:allowed=application/*"]
"#,
    );
    let context = manager.context("docs").unwrap();
    let small = FileSource::Content(ContentFile::new(b"tiny".to_vec(), "tiny.txt"));

    let err = context.validate(&small).await.unwrap_err();
    let messages = &err.validation().unwrap().messages;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1], "The file must be a file of type: pdf.");

    // Skipping validation stores the file anyway
    let stored = context.main_storage().save_new_file(&small, false).await.unwrap();
    assert!(stored.exists(None).await.unwrap());
}

#[tokio::test]
async fn test_passing_file_and_programmatic_validators() {
    let (manager, _disk) = {
        let disk = Arc::new(MemoryDisk::new());
        let manager = Manager::builder()
            .config(
                VermeerConfig::from_toml(
                    r#"
[contexts.docs]
validate = [{ type = "extensions", allowed = ["txt", "md"] }]
"#,
                )
                .unwrap(),
            )
            .shared_disk("local", disk.clone())
            .validator(
                "docs",
                ValidatorConfig::Instance(Arc::new(SizeValidator::new(None, Some("1K")).unwrap())),
            )
            .build()
            .unwrap();
        (manager, disk)
    };
    let context = manager.context("docs").unwrap();

    let notes = FileSource::Content(ContentFile::new(b"# notes".to_vec(), "notes.md"));
    context.validate(&notes).await.unwrap();

    let long = FileSource::Content(ContentFile::new(vec![b'a'; 2048], "long.md"));
    let err = context.validate(&long).await.unwrap_err();
    assert_eq!(
        err.validation().unwrap().messages,
        vec!["The file may not be greater than 1K.".to_string()]
    );
}

#[tokio::test]
async fn test_unknown_validator_alias_fails_at_setup() {
    let (manager, _disk) = manager(
        r#"
[contexts.docs]
validate = ["virus_scan"]
"#,
    );
    assert!(manager.context("docs").unwrap_err().is_configuration());
}
