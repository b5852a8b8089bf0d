//! Main CLI application

use crate::config::{
    parse_config_auto, parse_config_file, project_dir, project_environment, stage_commands,
    validate_config, Config,
};
use crate::cli::signals::stop_on_signals;
use crate::error::{ConfigError, StagehandError};
use crate::lock::LockRegistry;
use crate::process::PtyLauncher;
use crate::runner::{CommandExecutor, Coordinator, OutputSink};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use colored::Colorize;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent = 0,
    Quiet = 1,
    Normal = 2,
    Verbose = 3,
}

impl Verbosity {
    /// Default tracing filter for this verbosity
    fn filter(self) -> &'static str {
        match self {
            Verbosity::Silent => "off",
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "debug",
        }
    }
}

/// A single `deploy` invocation
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Project to lock and deploy
    pub project: String,
    /// Stages to run, each on its own thread
    pub stages: Vec<String>,
    /// Label recorded on the project lock
    pub holder: String,
    /// How long to wait for the project lock
    pub timeout: Option<Duration>,
}

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("stagehand")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run deployment command sequences under per-project locks")
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .help("Path to stagehand.yml config file")
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print command output and errors")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Print nothing but command output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("list").about("List projects and their stages"))
        .subcommand(
            Command::new("deploy")
                .about("Run stages of a project while holding the project lock")
                .arg(
                    Arg::new("project")
                        .value_name("PROJECT")
                        .help("Project to deploy")
                        .required(true),
                )
                .arg(
                    Arg::new("stages")
                        .value_name("STAGE")
                        .help("Stages to run")
                        .num_args(1..)
                        .required(true),
                )
                .arg(
                    Arg::new("holder")
                        .long("holder")
                        .value_name("NAME")
                        .help("Name recorded on the project lock"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_name("SECS")
                        .help("Seconds to wait for the project lock")
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(
                    Arg::new("shell")
                        .value_name("SHELL")
                        .required(true)
                        .value_parser(value_parser!(Shell)),
                ),
        )
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

/// Route library logs to stderr
fn init_tracing(verbosity: Verbosity) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Load the configuration named by `--file`, or discover one
fn load_config(matches: &ArgMatches) -> Result<(Config, PathBuf), StagehandError> {
    let (config, path) = match matches.get_one::<String>("file") {
        Some(file) => {
            let path = PathBuf::from(file);
            (parse_config_file(&path)?, path)
        }
        None => parse_config_auto()?,
    };
    validate_config(&config)?;
    Ok((config, path))
}

/// Parse a `deploy` subcommand
fn deploy_request(matches: &ArgMatches) -> DeployRequest {
    let holder = matches
        .get_one::<String>("holder")
        .cloned()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "stagehand".to_string());

    DeployRequest {
        project: matches
            .get_one::<String>("project")
            .cloned()
            .unwrap_or_default(),
        stages: matches
            .get_many::<String>("stages")
            .map(|stages| stages.cloned().collect())
            .unwrap_or_default(),
        holder,
        timeout: matches.get_one::<u64>("timeout").map(|s| Duration::from_secs(*s)),
    }
}

/// Run the CLI application with process arguments.
///
/// Returns whether every requested stage succeeded.
pub fn run() -> anyhow::Result<bool> {
    let matches = build_command().get_matches();
    let verbosity = get_verbosity(&matches);
    init_tracing(verbosity);

    match matches.subcommand() {
        Some(("list", _)) => {
            let (config, _) = load_config(&matches)?;
            print_projects(&config);
            Ok(true)
        }
        Some(("deploy", sub_matches)) => {
            let (config, config_path) = load_config(&matches)?;
            let request = deploy_request(sub_matches);
            Ok(deploy(&config, &config_path, &request, verbosity)?)
        }
        Some(("completions", sub_matches)) => {
            if let Some(shell) = sub_matches.get_one::<Shell>("shell") {
                let mut command = build_command();
                clap_complete::generate(*shell, &mut command, "stagehand", &mut io::stdout());
            }
            Ok(true)
        }
        _ => {
            build_command().print_help()?;
            println!();
            Ok(true)
        }
    }
}

fn print_projects(config: &Config) {
    for (name, project) in &config.projects {
        println!("{}", name.bold());
        for (stage_name, stage) in &project.stages {
            match &stage.usage {
                Some(usage) => println!("  {:<16} {}", stage_name, usage.dimmed()),
                None => println!("  {}", stage_name),
            }
        }
    }
}

/// Run every stage of `request`, returning whether all of them succeeded.
///
/// Stages run on separate threads but share one lock registry, so stages
/// of the same project take turns. SIGINT or SIGTERM stops every stage.
pub fn deploy(
    config: &Config,
    config_path: &Path,
    request: &DeployRequest,
    verbosity: Verbosity,
) -> Result<bool, StagehandError> {
    let project = config
        .projects
        .get(&request.project)
        .ok_or_else(|| ConfigError::ProjectNotFound(request.project.clone()))?;

    let plans = request
        .stages
        .iter()
        .map(|stage| {
            stage_commands(config, &request.project, stage).map(|commands| (stage.clone(), commands))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    let launcher = Arc::new(
        PtyLauncher::new()
            .with_interpreter(config.interpreter.clone().unwrap_or_default())
            .with_working_dir(project_dir(config_path, project))
            .with_env(project_environment(config_path, project)?),
    );
    let registry = Arc::new(LockRegistry::new().with_poll_interval(config.lock.poll_interval()));
    let coordinator = Coordinator::new(registry);
    let timeout = request.timeout.unwrap_or_else(|| config.lock.timeout());

    let stage_runs: Vec<_> = plans
        .iter()
        .map(|(stage, commands)| {
            let stage_run = StageRun {
                coordinator: &coordinator,
                executor: CommandExecutor::new(launcher.clone())
                    .with_options(config.executor.options()),
                project: &request.project,
                stage,
                holder: format!("{} ({})", request.holder, stage),
                verbosity,
            };
            (stage_run, commands)
        })
        .collect();

    let stop_handles = stage_runs
        .iter()
        .map(|(stage_run, _)| stage_run.executor.stop_handle())
        .collect();
    if let Err(e) = stop_on_signals(stop_handles) {
        tracing::warn!(error = %e, "could not install signal handlers");
    }

    let results: Vec<bool> = thread::scope(|scope| {
        let handles: Vec<_> = stage_runs
            .into_iter()
            .map(|(stage_run, commands)| scope.spawn(move || stage_run.run(commands, timeout)))
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(false))
            .collect()
    });

    Ok(results.iter().all(|ok| *ok))
}

struct StageRun<'a> {
    coordinator: &'a Coordinator<String>,
    executor: CommandExecutor,
    project: &'a String,
    stage: &'a str,
    holder: String,
    verbosity: Verbosity,
}

impl StageRun<'_> {
    fn run(&self, commands: &[String], timeout: Duration) -> bool {
        let label = format!("{}/{}", self.project, self.stage);
        self.print_status(&"[DEPLOY]".cyan().bold().to_string(), &label);

        let registry = self.coordinator.registry();
        let mut stdout = io::stdout();
        let ok = self.coordinator.run(
            self.project,
            &self.holder,
            timeout,
            &self.executor,
            commands,
            &mut stdout,
            Some(|sink: &mut Stdout| {
                let holder = registry
                    .holder(self.project)
                    .map(|entry| entry.holder)
                    .unwrap_or_else(|| "nobody".to_string());
                let message = format!(
                    "Could not get exclusive lock on {}, held by {}\r\n",
                    self.project, holder
                );
                sink.append(message.as_bytes());
            }),
        );

        if ok {
            self.print_status(&"[OK]".green().bold().to_string(), &label);
        } else {
            self.print_status(&"[FAILED]".red().bold().to_string(), &label);
        }
        ok
    }

    fn print_status(&self, tag: &str, label: &str) {
        if self.verbosity >= Verbosity::Normal {
            eprintln!("{} {}", tag, label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_verbosity_normal() {
        let matches = build_command().get_matches_from(vec!["stagehand", "list"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Normal);
    }

    #[test]
    fn test_get_verbosity_flags() {
        let matches = build_command().get_matches_from(vec!["stagehand", "-v", "list"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Verbose);

        let matches = build_command().get_matches_from(vec!["stagehand", "list", "-q"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Quiet);

        let matches = build_command().get_matches_from(vec!["stagehand", "-s", "-v", "list"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Silent);
    }

    #[test]
    fn test_verbosity_levels() {
        assert!(Verbosity::Verbose > Verbosity::Normal);
        assert!(Verbosity::Normal > Verbosity::Quiet);
        assert!(Verbosity::Quiet > Verbosity::Silent);
        assert_eq!(Verbosity::Verbose.filter(), "debug");
    }

    #[test]
    fn test_deploy_request() {
        let matches = build_command().get_matches_from(vec![
            "stagehand",
            "deploy",
            "demo_apps",
            "staging",
            "production",
            "--holder",
            "deployer",
            "--timeout",
            "30",
        ]);
        let (_, sub_matches) = matches.subcommand().unwrap();
        let request = deploy_request(sub_matches);

        assert_eq!(request.project, "demo_apps");
        assert_eq!(request.stages, vec!["staging", "production"]);
        assert_eq!(request.holder, "deployer");
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_deploy_requires_a_stage() {
        let result = build_command().try_get_matches_from(vec!["stagehand", "deploy", "demo_apps"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_completions_shell_parses() {
        let matches =
            build_command().get_matches_from(vec!["stagehand", "completions", "bash"]);
        let (_, sub_matches) = matches.subcommand().unwrap();
        assert_eq!(sub_matches.get_one::<Shell>("shell"), Some(&Shell::Bash));
    }
}
