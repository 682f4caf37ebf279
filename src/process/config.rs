//! Process launch configuration.
//!
//! Builder pattern for configuring the command, arguments, working
//! directory, environment overlay, and execution options of a managed
//! process.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Configuration for one managed process.
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
    run_timeout: Option<Duration>,
    use_shell: bool,
}

impl ProcessConfig {
    /// Create a new configuration for the given command.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Append an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the full argument vector.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Overlay an environment variable. Caller overrides win on conflict
    /// with the inherited environment.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Overlay a whole environment map.
    #[must_use]
    pub fn envs(mut self, envs: HashMap<String, String>) -> Self {
        self.env.extend(envs);
        self
    }

    /// Set a run timeout after which the process is gracefully killed.
    #[must_use]
    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Opt in to execution through `sh -c`.
    ///
    /// Shell execution enables alias/extension resolution but widens the
    /// trust boundary: arguments are quoted with `shell-escape`, and the
    /// default remains direct execution with an explicit argument vector.
    #[must_use]
    pub fn use_shell(mut self, use_shell: bool) -> Self {
        self.use_shell = use_shell;
        self
    }

    /// Get the command name.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Get the argument vector.
    #[must_use]
    pub fn arg_vec(&self) -> &[String] {
        &self.args
    }

    /// Get the configured run timeout, if any.
    #[must_use]
    pub fn get_run_timeout(&self) -> Option<Duration> {
        self.run_timeout
    }

    /// Get the environment overlay.
    #[must_use]
    pub fn env_overlay(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Build the tokio command: piped stdio, inherited environment overlaid
    /// with the caller's variables, and UTF-8 locale guaranteed.
    #[must_use]
    pub fn build_command(&self) -> Command {
        let mut cmd = if self.use_shell {
            let mut line = shell_escape::escape(Cow::from(self.command.as_str())).into_owned();
            for arg in &self.args {
                line.push(' ');
                line.push_str(&shell_escape::escape(Cow::from(arg.as_str())));
            }
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(line);
            cmd
        } else {
            let mut cmd = Command::new(&self.command);
            cmd.args(&self.args);
            cmd
        };

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        for key in ["LANG", "LC_ALL"] {
            if !self.env.contains_key(key) && !is_utf8_locale(std::env::var(key).ok().as_deref()) {
                cmd.env(key, "C.UTF-8");
            }
        }

        cmd
    }
}

fn is_utf8_locale(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        let lower = v.to_ascii_lowercase();
        lower.contains("utf-8") || lower.contains("utf8")
    })
}
