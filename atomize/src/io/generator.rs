//! Plan generator abstraction.
//!
//! The [`PlanGenerator`] trait decouples planning from the model backend.
//! [`CommandPlanGenerator`] pipes the prompt into a configured command and
//! returns whatever it prints; tests use scripted generators instead.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::error::{ConfigError, Error};
use crate::io::config::AtomizeConfig;
use crate::io::process::run_command_with_timeout;

/// Parameters for one generator call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub cancel: CancelToken,
}

impl GenerateRequest {
    pub fn from_config(prompt: String, cfg: &AtomizeConfig, cancel: &CancelToken) -> Self {
        Self {
            prompt,
            model: cfg.model.clone(),
            timeout: Duration::from_secs(cfg.generator_timeout_secs),
            output_limit_bytes: cfg.generator_output_limit_bytes,
            cancel: cancel.clone(),
        }
    }
}

/// Untrusted source of raw plan text.
pub trait PlanGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<String, Error>;
}

/// Generator that runs an external command with the prompt on stdin.
///
/// The model name, when known, is exported as `ATOMIZE_MODEL`.
#[derive(Debug, Clone)]
pub struct CommandPlanGenerator {
    command: Vec<String>,
    workdir: Option<PathBuf>,
}

impl CommandPlanGenerator {
    pub fn new(command: Vec<String>, workdir: Option<PathBuf>) -> Self {
        Self { command, workdir }
    }

    pub fn from_config(cfg: &AtomizeConfig, workdir: Option<PathBuf>) -> Self {
        Self::new(cfg.generator.command.clone(), workdir)
    }
}

impl PlanGenerator for CommandPlanGenerator {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn generate(&self, request: &GenerateRequest) -> Result<String, Error> {
        let Some((program, args)) = self
            .command
            .split_first()
            .filter(|(program, _)| !program.trim().is_empty())
        else {
            return Err(ConfigError::Invalid("generator.command is not configured".to_string()).into());
        };
        info!(%program, prompt_bytes = request.prompt.len(), "invoking plan generator");
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        if let Some(model) = &request.model {
            cmd.env("ATOMIZE_MODEL", model);
        }

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            &request.cancel,
        )
        .map_err(|err| Error::LlmRuntime(format!("{err:#}")))?;

        if output.cancelled {
            return Err(Error::Interrupted);
        }
        if output.timed_out {
            return Err(Error::Timeout {
                secs: request.timeout.as_secs(),
            });
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(exit_code = ?output.status.code(), "plan generator failed");
            return Err(Error::LlmRuntime(format!(
                "generator exited with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }
        if output.stdout_truncated > 0 {
            return Err(Error::LlmRuntime(format!(
                "generator output exceeded {} bytes",
                request.output_limit_bytes
            )));
        }
        let text = String::from_utf8(output.stdout)
            .map_err(|_| Error::LlmRuntime("generator output is not UTF-8".to_string()))?;
        debug!(bytes = text.len(), "plan generator finished");
        Ok(text)
    }
}
