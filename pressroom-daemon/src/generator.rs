//! Site generator invocation.
//!
//! Builds run as child processes in the site root. Output is collected line
//! by line from both pipes. Each generator leads its own process group;
//! cancelling the build's token kills the whole group and reaps the child
//! before [`ProcessError::Cancelled`] is returned.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pressroom_core::{Environment, Generator, Site};

use crate::error::ProcessError;

pub const ENV_DRAFT: &str = "PRESSROOM_DRAFT";
pub const ENV_USE_CACHE: &str = "PRESSROOM_USE_CACHE";
pub const ENV_BASE_URL: &str = "PRESSROOM_BASE_URL";

/// Per-build generator switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub use_cache: bool,
    pub is_draft: bool,
    pub draft_base_url: Option<String>,
}

impl BuildOptions {
    pub fn for_environment(site: &Site, environment: Environment, use_cache: bool) -> Self {
        let is_draft = environment == Environment::Draft;
        Self {
            use_cache,
            is_draft,
            draft_base_url: if is_draft {
                site.drafts_url.clone().filter(|url| !url.is_empty())
            } else {
                None
            },
        }
    }

    fn environment(&self) -> Environment {
        if self.is_draft {
            Environment::Draft
        } else {
            Environment::Production
        }
    }
}

/// A fully resolved generator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: PathBuf,
}

impl GeneratorCommand {
    pub fn for_site(site: &Site, options: &BuildOptions) -> Self {
        let (program, args) = match &site.generator {
            Generator::Hugo => ("hugo".to_string(), hugo_args(site, options)),
            Generator::Astro => ("astro".to_string(), vec!["build".to_string()]),
            Generator::Command { program, args } => (program.clone(), args.clone()),
        };
        let mut env = vec![
            (ENV_DRAFT.to_string(), options.is_draft.to_string()),
            (ENV_USE_CACHE.to_string(), options.use_cache.to_string()),
        ];
        if let Some(url) = &options.draft_base_url {
            env.push((ENV_BASE_URL.to_string(), url.clone()));
        }
        Self {
            program,
            args,
            env,
            current_dir: site.root_dir.clone(),
        }
    }
}

/// Hugo command line for one build.
///
/// Drafts always bypass the cache and render drafts, expired and future
/// content into the draft output directory.
pub fn hugo_args(site: &Site, options: &BuildOptions) -> Vec<String> {
    let mut args = Vec::new();
    if !options.use_cache || options.is_draft {
        args.push("--ignoreCache".to_string());
    }
    if options.is_draft {
        args.push("-d".to_string());
        args.push(site.output_dir(Environment::Draft).display().to_string());
        args.extend(["-D", "-E", "-F"].map(String::from));
        if let Some(url) = &options.draft_base_url {
            args.push("-b".to_string());
            args.push(url.clone());
        }
    } else if site.output.build.is_some() {
        args.push("-d".to_string());
        args.push(site.output_dir(Environment::Production).display().to_string());
    }
    args
}

/// Successful generator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub environment: Environment,
    /// Combined stdout and stderr.
    pub output: String,
}

/// Build `site` once with `options`, observing `cancel`.
pub async fn build_site(
    site: &Site,
    options: &BuildOptions,
    cancel: &CancellationToken,
) -> Result<BuildOutput, ProcessError> {
    let command = GeneratorCommand::for_site(site, options);
    let environment = options.environment();
    info!(
        site = %site.name,
        %environment,
        program = %command.program,
        "starting build"
    );
    let output = run_command(&command, cancel).await?;
    info!(site = %site.name, %environment, "build finished");
    Ok(BuildOutput {
        environment,
        output,
    })
}

/// Run `command` to completion and return its combined output.
pub async fn run_command(
    command: &GeneratorCommand,
    cancel: &CancellationToken,
) -> Result<String, ProcessError> {
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled);
    }

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&command.current_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: command.program.clone(),
            source,
        })?;

    let stdout_task = collect_lines(child.stdout.take(), "stdout");
    let stderr_task = collect_lines(child.stderr.take(), "stderr");

    let waited = tokio::select! {
        _ = cancel.cancelled() => {
            warn!(program = %command.program, "build cancelled, killing generator");
            kill_process_group(&mut child, &command.program).await;
            None
        }
        status = child.wait() => Some(status),
    };

    let Some(status) = waited else {
        // Grandchildren may still hold the pipes open.
        stdout_task.abort();
        stderr_task.abort();
        return Err(ProcessError::Cancelled);
    };

    let mut output = stdout_task.await.unwrap_or_default();
    output.extend(stderr_task.await.unwrap_or_default());
    let output = output.join("\n");

    let status = status.map_err(|source| ProcessError::Wait {
        program: command.program.clone(),
        source,
    })?;
    if status.success() {
        Ok(output)
    } else {
        Err(ProcessError::Failed {
            program: command.program.clone(),
            status: status.to_string(),
            output,
        })
    }
}

/// SIGKILL the group led by `child`, then reap `child` itself. Falls back to
/// killing only the child when the group cannot be signalled.
async fn kill_process_group(child: &mut Child, program: &str) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let group = child.id().and_then(|pid| i32::try_from(pid).ok());
    let signalled = match group {
        Some(pgid) => match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) => true,
            Err(err) => {
                warn!(program, pgid, error = %err, "failed to signal generator process group");
                false
            }
        },
        None => false,
    };

    let reaped = if signalled {
        child.wait().await.map(drop)
    } else {
        child.kill().await
    };
    if let Err(err) = reaped {
        warn!(program, error = %err, "failed to kill generator");
    }
}

fn collect_lines<R>(pipe: Option<R>, stream: &'static str) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut collected = Vec::new();
        if let Some(pipe) = pipe {
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(stream, "{line}");
                collected.push(line);
            }
        }
        collected
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
