//! Integration tests for configuration parsing

mod common;

use common::create_test_config;
use stagehand::config::{
    parse_config, parse_config_file, project_dir, stage_commands, validate_config,
};
use stagehand::error::{ConfigError, StagehandError};
use std::time::Duration;

#[test]
fn test_parse_full_config() {
    let yaml = r#"
name: acme
interpreter: [bash, -c]
lock:
  timeout: 120
executor:
  poll-interval-ms: 20
  grace-period-ms: 1000
projects:
  demo_apps:
    dir: apps/demo
    environment:
      RAILS_ENV: production
    stages:
      production:
        usage: Ship it
        commands:
          - bundle install
        command: |
          echo hello
          test command
"#;
    let config = parse_config(yaml).unwrap();
    validate_config(&config).unwrap();

    assert_eq!(config.lock.timeout(), Duration::from_secs(120));
    assert_eq!(config.executor.options().grace_period, Duration::from_secs(1));
    assert_eq!(
        stage_commands(&config, "demo_apps", "production").unwrap(),
        vec!["bundle install", "echo hello", "test command"]
    );

    let project = &config.projects["demo_apps"];
    assert_eq!(project.environment["RAILS_ENV"], "production");
    assert_eq!(project.stages["production"].usage.as_deref(), Some("Ship it"));
}

#[test]
fn test_parse_config_file_from_disk() {
    let (dir, config_path) = create_test_config(
        r#"
projects:
  demo_apps:
    dir: checkout
    stages:
      staging:
        commands: [echo hi]
"#,
    );

    let config = parse_config_file(&config_path).unwrap();
    let project = &config.projects["demo_apps"];
    assert_eq!(project_dir(&config_path, project), dir.path().join("checkout"));
}

#[test]
fn test_invalid_yaml() {
    let result = parse_config("projects: [not, a, map");
    assert!(matches!(result, Err(StagehandError::Yaml(_))));
}

#[test]
fn test_stage_without_commands_is_rejected() {
    let yaml = r#"
projects:
  demo_apps:
    stages:
      production: {}
"#;
    let config = parse_config(yaml).unwrap();
    let err = validate_config(&config).unwrap_err();
    assert!(matches!(err, ConfigError::EmptyStage { .. }));
    assert_eq!(err.to_string(), "Stage 'demo_apps/production' has no commands");
}
