//! `atomize` command line.
//!
//! Prints exactly one JSON document (or its human rendering) on stdout: the
//! plan, the apply report, or an error envelope. Diagnostics go to stderr.

use std::fs;
use std::io::{IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use atomize::apply::{ApplyMode, ApplyOptions};
use atomize::cancel::CancelToken;
use atomize::core::types::DiffMode;
use atomize::error::Error;
use atomize::io::config::{AtomizeConfig, ConfigOverrides, resolve_config};
use atomize::io::generator::CommandPlanGenerator;
use atomize::io::lock::RepoLocks;
use atomize::logging::{self, LogFormat};
use atomize::pipeline::{self, DiffInput, PlanSource};
use atomize::report::{self, OutputFormat};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "atomize",
    version,
    about = "Split a diff into atomic commits and apply them safely"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a validated commit plan for a diff.
    Plan(PlanArgs),
    /// Plan (or load a plan) and apply it to a repository. Dry run unless `--execute`.
    Apply(ApplyArgs),
}

#[derive(Args)]
struct PlanArgs {
    /// Repository to read the diff from when no explicit diff is given.
    #[arg(long)]
    repo: Option<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct ApplyArgs {
    #[arg(long)]
    repo: PathBuf,

    /// Create commits. Without it the run is simulated.
    #[arg(long)]
    execute: bool,

    /// Reset the failing unit's staged files before exiting.
    #[arg(long)]
    cleanup_on_error: bool,

    /// Model name for an `Assisted by:` trailer.
    #[arg(long, value_name = "MODEL")]
    assisted_by: Option<String>,

    /// Apply a previously produced plan instead of calling the generator.
    #[arg(long, value_name = "PATH")]
    plan_file: Option<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// Read the diff from a file, or `-` for stdin.
    #[arg(long, value_name = "PATH")]
    diff_file: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// worktree, staged or all.
    #[arg(long)]
    diff_mode: Option<DiffMode>,

    #[arg(long, overrides_with = "no_include_untracked")]
    include_untracked: bool,
    #[arg(long)]
    no_include_untracked: bool,

    #[arg(long, overrides_with = "no_log_diff")]
    log_diff: bool,
    #[arg(long)]
    no_log_diff: bool,

    /// Generator timeout in seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long, default_value = "json")]
    format: OutputFormat,

    #[arg(long, default_value = "warn")]
    log_level: String,

    #[arg(long, default_value = "compact")]
    log_format: LogFormat,
}

impl CommonArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            model: self.model.clone(),
            generator_timeout_secs: self.timeout,
            diff_mode: self.diff_mode,
            include_untracked: flag_pair(self.include_untracked, self.no_include_untracked),
            log_diff: flag_pair(self.log_diff, self.no_log_diff),
        }
    }
}

fn flag_pair(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let common = match &cli.command {
        Command::Plan(args) => &args.common,
        Command::Apply(args) => &args.common,
    };
    logging::init(&common.log_level, common.log_format);

    let cancel = CancelToken::new();
    signal_hook::flag::register(signal_hook::consts::SIGINT, cancel.flag())
        .context("install SIGINT handler")?;

    let request_id = pipeline::new_request_id();
    let format = common.format;
    let (output, code) = match cli.command {
        Command::Plan(args) => match cmd_plan(&args, &request_id, &cancel) {
            Ok(plan) => (report::render_plan(&plan, format), 0),
            Err(err) => envelope(&request_id, &err, format),
        },
        Command::Apply(args) => match cmd_apply(&args, &request_id, &cancel) {
            Ok(outcome) => (
                report::render_apply(&outcome.response, format),
                outcome.exit_code,
            ),
            Err(err) => envelope(&request_id, &err, format),
        },
    };

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(output.as_bytes())
        .and_then(|()| stdout.flush())
        .context("write output")?;
    Ok(code)
}

fn envelope(request_id: &str, err: &Error, format: OutputFormat) -> (String, i32) {
    let response = report::error_response(Some(request_id.to_string()), err);
    (report::render_error(&response, format), err.exit_code())
}

fn config(common: &CommonArgs) -> Result<AtomizeConfig, Error> {
    let cfg = resolve_config(common.config.as_deref(), &common.overrides())?;
    debug!(?cfg, "config resolved");
    Ok(cfg)
}

fn cmd_plan(
    args: &PlanArgs,
    request_id: &str,
    cancel: &CancelToken,
) -> Result<atomize::core::types::CommitPlan, Error> {
    let cfg = config(&args.common)?;
    let diff = read_diff(args.common.diff_file.as_deref(), args.repo.is_some())?;
    let generator = CommandPlanGenerator::from_config(&cfg, args.repo.clone());
    let input = DiffInput {
        diff,
        repo: args.repo.clone(),
    };
    pipeline::run_plan(&input, &generator, &cfg, request_id, cancel)
}

fn cmd_apply(
    args: &ApplyArgs,
    request_id: &str,
    cancel: &CancelToken,
) -> Result<pipeline::ApplyOutcome, Error> {
    let cfg = config(&args.common)?;
    let diff = read_diff(args.common.diff_file.as_deref(), true)?;
    let options = ApplyOptions {
        mode: if args.execute {
            ApplyMode::Execute
        } else {
            ApplyMode::Simulate
        },
        cleanup_on_error: args.cleanup_on_error,
        assisted_by: args.assisted_by.clone(),
        limits: pipeline::limits(&cfg),
    };
    let locks = RepoLocks::new();

    match &args.plan_file {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|err| {
                Error::InputInvalid(format!("read plan file {}: {err}", path.display()))
            })?;
            pipeline::run_apply(
                &locks,
                &args.repo,
                diff,
                PlanSource::Supplied(raw),
                &cfg,
                &options,
                request_id,
                cancel,
            )
        }
        None => {
            let generator = CommandPlanGenerator::from_config(&cfg, Some(args.repo.clone()));
            pipeline::run_apply(
                &locks,
                &args.repo,
                diff,
                PlanSource::Generate(&generator),
                &cfg,
                &options,
                request_id,
                cancel,
            )
        }
    }
}

/// Explicit diff text from `--diff-file` or piped stdin, if any.
///
/// Piped stdin that turns out empty counts as "no diff" only when a
/// repository can supply one instead.
fn read_diff(diff_file: Option<&Path>, has_repo: bool) -> Result<Option<String>, Error> {
    let piped = !std::io::stdin().is_terminal();
    match diff_file {
        Some(path) if path == Path::new("-") => read_stdin().map(Some),
        Some(path) => {
            if piped && !read_stdin()?.is_empty() {
                return Err(Error::Usage(
                    "diff given on both stdin and --diff-file".to_string(),
                ));
            }
            fs::read_to_string(path)
                .map(Some)
                .map_err(|err| Error::InputInvalid(format!("read {}: {err}", path.display())))
        }
        None if piped => {
            let text = read_stdin()?;
            Ok((!text.is_empty() || !has_repo).then_some(text))
        }
        None if has_repo => Ok(None),
        None => Err(Error::InputInvalid(
            "no diff provided and no repo path supplied".to_string(),
        )),
    }
}

fn read_stdin() -> Result<String, Error> {
    let mut buf = Vec::new();
    std::io::stdin()
        .read_to_end(&mut buf)
        .map_err(|err| Error::InputInvalid(format!("read stdin: {err}")))?;
    String::from_utf8(buf).map_err(|_| Error::InputInvalid("diff on stdin is not UTF-8".to_string()))
}
