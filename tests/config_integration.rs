mod common;

use common::{flat_space, program_space};
use vspace::{SpaceConfig, VspaceError};

#[test]
fn test_json_config_drives_space_behavior() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vspace.json");
    std::fs::write(
        &path,
        r#"{
            "analysis": {"auto_schedule": false, "min_string_length": 6},
            "entropy": {"default_block_size": 8},
            "logging": {"level": "vspace=debug", "json": true}
        }"#,
    )
    .unwrap();

    let config = SpaceConfig::from_json_file(&path).unwrap();
    vspace::logging::init_from_config(&config.logging);
    assert_eq!(config.search, Default::default());

    let space = program_space(config);
    assert_eq!(space.get_entropy(0x1000, 0x20, 0).len(), 4);
    assert!(!space.config().analysis.auto_schedule);
}

#[test]
fn test_invalid_config_rejected() {
    for text in [
        r#"{"linear": {"max_lines_per_step": 0}}"#,
        r#"{"analysis": {"min_string_length": 10, "max_string_length": 4}}"#,
        r#"{"logging": {"level": " "}}"#,
    ] {
        assert!(matches!(
            SpaceConfig::from_json_str(text),
            Err(VspaceError::InvalidArgument(_))
        ));
    }
    assert!(SpaceConfig::from_json_str("{not json").is_err());
}

#[test]
fn test_flat_space_uses_default_entropy_block() {
    let space = flat_space(vec![0u8; 0x2000], 0);
    let blocks = space.get_entropy(0, 0x2000, 0);
    assert_eq!(blocks.len(), 2);
    assert!(blocks.iter().all(|e| *e == 0.0));
}
