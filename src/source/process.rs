//! The external-process source.
//!
//! Spawns a command with captured output and settles with a
//! [`ProcessOutput`] once it exits. The wait itself runs on a watcher
//! thread behind the loop's wait table; abort is soft (the settlement is
//! suppressed, the child runs to completion).
//!
//! A non-zero exit still fulfils — callers inspect
//! [`ProcessOutput::status`]. Only spawn or wait failures reject.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::barrier::with_engine;
use crate::deferred::Deferred;
pub use crate::driver::wait::ProcessOutput;
use crate::error::{Error, Result};
use crate::source::{SourceAdapter, SourceContext};

/// Declarative description of a command to run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Starts a spec for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets one environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Sets the child's working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    fn build(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }
}

struct ProcessSource {
    spec: Option<CommandSpec>,
}

impl SourceAdapter for ProcessSource {
    fn start(&mut self, cx: &mut SourceContext<'_>) {
        let Some(spec) = self.spec.take() else { return };
        match spec.build().spawn() {
            Ok(child) => {
                cx.register_wait(child);
            }
            Err(err) => {
                cx.reject(
                    Error::user(format!("failed to spawn {}", spec.program)).with_source(err),
                );
            }
        }
    }

    fn abort(&mut self) {
        // Soft abort: suppression happens through the wait registration
        // the engine already released.
        self.spec = None;
    }
}

/// A deferred that fulfils with the [`ProcessOutput`] of `spec`.
pub fn run_command(spec: CommandSpec) -> Result<Deferred> {
    with_engine(|state| {
        let node = state.insert_source(Box::new(ProcessSource { spec: Some(spec) }));
        Ok(Deferred::new(state.barrier, node))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builds_incrementally() {
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("true")
            .env("K", "V")
            .current_dir("/tmp");
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args, vec!["-c".to_string(), "true".to_string()]);
        assert_eq!(spec.envs, vec![("K".to_string(), "V".to_string())]);
        assert_eq!(spec.cwd, Some(PathBuf::from("/tmp")));
    }
}
