#![forbid(unsafe_code)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use bmp_types::{AddressFamily, EventRecord};
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("could not spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command `{command}` failed: status={status}, stderr={stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("fixture file not found: {}", path.display())]
    FixtureMissing { path: PathBuf },
    #[error("fixture {} is not valid json: {source}", path.display())]
    FixtureFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Runs a shell command on some host and hands back its stdout.
///
/// Timeouts and host selection belong to the implementation; callers only
/// see the text or an error.
pub trait CommandRunner {
    fn run(&self, command: &str) -> Result<String, IoError>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, command: &str) -> Result<String, IoError> {
        (**self).run(command)
    }
}

/// Local `sh -c` runner, optionally wrapped in an exec prefix such as
/// `ip netns exec collector`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellRunner {
    prefix: Vec<String>,
}

impl ShellRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_prefix<I, S>(prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: prefix.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &[String] {
        &self.prefix
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<String, IoError> {
        let mut cmd = match self.prefix.split_first() {
            Some((program, args)) => {
                let mut cmd = Command::new(program);
                cmd.args(args).arg("sh");
                cmd
            }
            None => Command::new("sh"),
        };
        let output = cmd
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|source| IoError::Spawn {
                command: command.to_owned(),
                source,
            })?;

        if !output.status.success() {
            return Err(IoError::CommandFailed {
                command: command.to_owned(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Decodes collector output one line at a time, in file order.
///
/// Lines that fail to decode are reported and skipped; shell noise mixed
/// into the log must not abort a check.
pub fn decode_log_lines(text: &str) -> impl Iterator<Item = EventRecord> + '_ {
    text.lines().enumerate().filter_map(|(idx, line)| {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match EventRecord::from_json_str(line) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(line = idx + 1, error = %err, text = line, "skipping undecodable bmp log line");
                None
            }
        }
    })
}

/// Single-quotes `word` for `sh -c`; embedded quotes become `'\''`.
#[must_use]
pub fn shell_quote(word: &str) -> String {
    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('\'');
    for ch in word.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Fetches the collector log through `runner` and decodes every record.
///
/// An empty result is logged but still returned: the caller's comparison
/// decides whether that is a failure.
pub fn read_log_records<R: CommandRunner + ?Sized>(
    runner: &R,
    log_path: &Path,
) -> Result<Vec<EventRecord>, IoError> {
    let text = runner.run(&format!("cat {}", shell_quote(&log_path.to_string_lossy())))?;
    let records = decode_log_lines(&text).collect::<Vec<_>>();
    if records.is_empty() {
        error!(path = %log_path.display(), "bad BMP log format, check your BMP server");
    }
    Ok(records)
}

/// Control-plane view of the routing table, one address family at a time.
pub trait RouteQuery {
    /// JSON document with a `routes` object keyed by prefix.
    fn show_routes(&self, family: AddressFamily) -> Result<Value, IoError>;
}

impl<T: RouteQuery + ?Sized> RouteQuery for &T {
    fn show_routes(&self, family: AddressFamily) -> Result<Value, IoError> {
        (**self).show_routes(family)
    }
}

#[derive(Debug, Clone)]
pub struct VtyshRouteQuery<R> {
    runner: R,
    vrf: Option<String>,
}

impl<R: CommandRunner> VtyshRouteQuery<R> {
    pub fn new(runner: R, vrf: Option<String>) -> Self {
        Self { runner, vrf }
    }

    #[must_use]
    pub fn command(&self, family: AddressFamily) -> String {
        let show = match &self.vrf {
            Some(vrf) => format!("show bgp vrf {vrf} {family} json"),
            None => format!("show bgp {family} json"),
        };
        format!("vtysh -c {}", shell_quote(&show))
    }
}

impl<R: CommandRunner> RouteQuery for VtyshRouteQuery<R> {
    fn show_routes(&self, family: AddressFamily) -> Result<Value, IoError> {
        let stdout = self.runner.run(&self.command(family))?;
        Ok(serde_json::from_str(&stdout)?)
    }
}

pub fn read_json_fixture(path: &Path) -> Result<Value, IoError> {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(IoError::FixtureMissing {
                path: path.to_path_buf(),
            });
        }
        Err(err) => return Err(err.into()),
    };
    serde_json::from_str(&body).map_err(|source| IoError::FixtureFormat {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `value` indented by four spaces, creating parent directories.
pub fn write_json_pretty(path: &Path, value: &Value) -> Result<(), IoError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    out.push(b'\n');
    fs::write(path, out)?;
    Ok(())
}
