// src/config/validate.rs

use crate::config::model::{RawRefreshConfig, RefreshConfig};
use crate::errors::{RefreshError, Result};
use crate::snapshot::patterns::ExcludeSet;

impl TryFrom<RawRefreshConfig> for RefreshConfig {
    type Error = RefreshError;

    fn try_from(raw: RawRefreshConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(RefreshConfig::new_unchecked(raw.queue, raw.scan, raw.logging))
    }
}

fn validate_raw_config(cfg: &RawRefreshConfig) -> Result<()> {
    validate_capacity("scan_capacity", cfg.queue.scan_capacity)?;
    validate_capacity("preprocess_capacity", cfg.queue.preprocess_capacity)?;
    validate_excludes(&cfg.scan.exclude)?;
    Ok(())
}

fn validate_capacity(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(RefreshError::ConfigError(format!(
            "[queue].{name} must be >= 1 (got 0)"
        )));
    }
    Ok(())
}

fn validate_excludes(patterns: &[String]) -> Result<()> {
    if let Some(empty) = patterns.iter().position(|p| p.trim().is_empty()) {
        return Err(RefreshError::ConfigError(format!(
            "[scan].exclude entry {empty} is empty"
        )));
    }
    ExcludeSet::compile(patterns)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_and_validate;
    use crate::types::Modality;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = parse_and_validate("").unwrap();
        assert_eq!(cfg.queue().scan_capacity, 256);
        assert!(cfg.queue().async_preprocessing);
        assert_eq!(cfg.queue().single_event_modality, Modality::NonModal);
        assert!(!cfg.scan().content_hash);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = parse_and_validate("[queue]\npreprocess_capacity = 0\n").unwrap_err();
        match err {
            RefreshError::ConfigError(msg) => assert!(msg.contains("preprocess_capacity")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn bad_glob_is_rejected() {
        let err = parse_and_validate("[scan]\nexclude = [\"a/[b\"]\n").unwrap_err();
        assert!(matches!(err, RefreshError::Pattern(_)), "got {err:?}");
    }

    #[test]
    fn unknown_modality_is_a_toml_error() {
        let err = parse_and_validate("[queue]\nsingle_event_modality = \"never\"\n").unwrap_err();
        assert!(matches!(err, RefreshError::TomlError(_)), "got {err:?}");
    }
}
