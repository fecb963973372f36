// tests/config_loading.rs

use std::io::Write;

use fsrefresh::config::{load_and_validate, load_from_path};
use fsrefresh::errors::RefreshError;
use fsrefresh::logging::LogLevel;
use fsrefresh::types::Modality;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn full_file_round_trips_through_validation() -> TestResult {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"
[queue]
scan_capacity = 8
preprocess_capacity = 4
async_preprocessing = false
single_event_modality = "any"

[scan]
exclude = ["**/.git/**", "target/**"]
content_hash = true

[logging]
level = "debug"
"#
    )?;

    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.queue().scan_capacity, 8);
    assert_eq!(cfg.queue().preprocess_capacity, 4);
    assert!(!cfg.queue().async_preprocessing);
    assert_eq!(cfg.queue().single_event_modality, Modality::Any);
    assert_eq!(cfg.scan().exclude.len(), 2);
    assert!(cfg.scan().content_hash);
    assert_eq!(cfg.logging().level, Some(LogLevel::Debug));
    Ok(())
}

#[test]
fn raw_load_does_not_validate() -> TestResult {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "[queue]\nscan_capacity = 0")?;

    let raw = load_from_path(file.path())?;
    assert_eq!(raw.queue.scan_capacity, 0);

    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, RefreshError::ConfigError(_)), "got {err:?}");
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_and_validate("/definitely/not/here/fsrefresh.toml").unwrap_err();
    assert!(matches!(err, RefreshError::IoError(_)), "got {err:?}");
}

#[test]
fn empty_exclude_entry_is_rejected() -> TestResult {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "[scan]\nexclude = [\"  \"]")?;
    let err = load_and_validate(file.path()).unwrap_err();
    match err {
        RefreshError::ConfigError(msg) => assert!(msg.contains("exclude")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
    Ok(())
}

#[test]
fn modality_accepts_level_and_underscore_forms() -> TestResult {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "[queue]\nsingle_event_modality = \"level:2\"")?;
    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.queue().single_event_modality, Modality::Level(2));

    let cfg = fsrefresh::config::parse_and_validate("[queue]\nsingle_event_modality = \"non_modal\"\n")?;
    assert_eq!(cfg.queue().single_event_modality, Modality::NonModal);
    Ok(())
}
