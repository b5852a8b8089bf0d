//! Configuration validation
//!
//! This module provides validation logic for configuration files.

use crate::config::types::{Config, Project, Stage};
use crate::error::{ConfigError, ConfigResult};

/// Validate a complete configuration
pub fn validate_config(config: &Config) -> ConfigResult<()> {
    if let Some(interpreter) = &config.interpreter {
        if interpreter.is_empty() || interpreter[0].trim().is_empty() {
            return Err(ConfigError::Invalid(
                "interpreter must name a program".to_string(),
            ));
        }
    }

    if config.lock.timeout == 0 {
        return Err(ConfigError::Invalid(
            "lock.timeout must be greater than zero".to_string(),
        ));
    }
    if config.lock.poll_interval_ms == 0 || config.executor.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid(
            "poll-interval-ms must be greater than zero".to_string(),
        ));
    }

    for (name, project) in &config.projects {
        validate_project(name, project)?;
    }

    Ok(())
}

/// Validate a single project and its stages
pub fn validate_project(name: &str, project: &Project) -> ConfigResult<()> {
    if name.trim().is_empty() {
        return Err(ConfigError::Invalid("project names cannot be empty".to_string()));
    }

    for (stage_name, stage) in &project.stages {
        validate_stage(name, stage_name, stage)?;
    }

    Ok(())
}

/// Validate a single stage
pub fn validate_stage(project: &str, name: &str, stage: &Stage) -> ConfigResult<()> {
    if name.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "project '{}' has a stage without a name",
            project
        )));
    }

    if stage.command_list().is_empty() {
        return Err(ConfigError::EmptyStage {
            project: project.to_string(),
            stage: name.to_string(),
        });
    }

    Ok(())
}

/// Look up the commands of `project`/`stage`
pub fn stage_commands(config: &Config, project: &str, stage: &str) -> ConfigResult<Vec<String>> {
    let found = config
        .projects
        .get(project)
        .ok_or_else(|| ConfigError::ProjectNotFound(project.to_string()))?;

    let stage_config = found
        .stages
        .get(stage)
        .ok_or_else(|| ConfigError::StageNotFound {
            project: project.to_string(),
            stage: stage.to_string(),
        })?;

    Ok(stage_config.command_list())
}
