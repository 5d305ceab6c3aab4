//! Request file format and validation.
//!
//! A request file is YAML:
//!
//! ```yaml
//! args: [ls, -l]
//! cwd: /tmp
//! env:
//!   LANG: C
//! clear_env: false
//! close_fds: true
//! death_signal: 9
//! umask: "027"
//! restore_sigpipe: true
//! stdin: "null"
//! stdout: inherit
//! stderr: pipe
//! ```

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use spawnkit_process::{validate_death_signal, SpawnRequest, StreamSpec, MAX_UMASK};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// What to connect a child stream to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StreamChoice {
    #[default]
    Inherit,
    Null,
    Pipe,
}

impl StreamChoice {
    pub fn to_spec(self) -> StreamSpec<'static> {
        match self {
            StreamChoice::Inherit => StreamSpec::Inherit,
            StreamChoice::Null => StreamSpec::Null,
            StreamChoice::Pipe => StreamSpec::Pipe,
        }
    }
}

/// One spawn, as read from a file and then overridden by flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestFile {
    #[serde(default)]
    pub args: Vec<String>,
    pub program: Option<String>,
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Start from an empty environment instead of the parent's.
    #[serde(default)]
    pub clear_env: bool,
    #[serde(default)]
    pub close_fds: bool,
    #[serde(default)]
    pub death_signal: i32,
    /// Octal, as a string: `"022"`.
    pub umask: Option<String>,
    #[serde(default)]
    pub restore_sigpipe: bool,
    #[serde(default)]
    pub stdin: StreamChoice,
    #[serde(default)]
    pub stdout: StreamChoice,
    #[serde(default)]
    pub stderr: StreamChoice,
}

impl RequestFile {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read request file: {}", path.as_ref().display()))?;
        Self::load_from_string(&content)
    }

    pub fn load_from_string(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse YAML request file")
    }

    /// Whether any stream is piped back to us. Only then is there output
    /// to capture for a JSON report.
    pub fn has_pipes(&self) -> bool {
        [self.stdin, self.stdout, self.stderr].contains(&StreamChoice::Pipe)
    }

    /// Check everything that can be checked before spawning.
    pub fn validate(&self) -> Result<()> {
        if self.args.is_empty() {
            bail!("No command given");
        }
        validate_death_signal(self.death_signal)
            .with_context(|| format!("Invalid death signal: {}", self.death_signal))?;
        self.umask_bits()?;
        Ok(())
    }

    pub fn umask_bits(&self) -> Result<Option<u32>> {
        self.umask.as_deref().map(parse_umask).transpose()
    }

    /// Build the library request. Call [`validate`](Self::validate) first
    /// for friendlier errors; the library re-checks anyway.
    pub fn to_request(&self) -> Result<SpawnRequest<'static>> {
        let mut request = SpawnRequest::new(&self.args)
            .close_fds(self.close_fds)
            .death_signal(self.death_signal)
            .restore_sigpipe(self.restore_sigpipe)
            .stdin(self.stdin.to_spec())
            .stdout(self.stdout.to_spec())
            .stderr(self.stderr.to_spec());

        if let Some(program) = &self.program {
            request = request.program(program);
        }
        if let Some(cwd) = &self.cwd {
            request = request.cwd(cwd);
        }
        if let Some(mask) = self.umask_bits()? {
            request = request.umask(mask);
        }

        if self.clear_env {
            request = request.envs(&self.env);
        } else if !self.env.is_empty() {
            let mut vars: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
            vars.extend(self.env.iter().map(|(k, v)| (k.into(), v.into())));
            request = request.envs(vars);
        }

        Ok(request)
    }
}

/// Parse an octal permission mask such as `022` or `0o022`.
pub fn parse_umask(value: &str) -> Result<u32> {
    let digits = value.strip_prefix("0o").unwrap_or(value);
    let mask = u32::from_str_radix(digits, 8).with_context(|| format!("Invalid octal umask: {}", value))?;
    if mask > MAX_UMASK {
        bail!("umask {:#o} is out of range 0..={:#o}", mask, MAX_UMASK);
    }
    Ok(mask)
}

/// Parse `KEY=VALUE`.
pub fn parse_env_pair(value: &str) -> Result<(String, String)> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => bail!("Expected KEY=VALUE, got {:?}", value),
    }
}
