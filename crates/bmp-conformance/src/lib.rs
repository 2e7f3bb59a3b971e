#![forbid(unsafe_code)]

//! Correlates the events a BMP collector appended to its JSON-lines log
//! against golden fixtures and expected peers, one cursor per test run.

pub mod compare;
pub mod cursor;
pub mod golden;
pub mod peer;
pub mod prefix;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;

use bmp_io::{CommandRunner, IoError, RouteQuery, ShellRunner, VtyshRouteQuery, read_log_records};
use bmp_types::EventRecord;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use compare::{DiffEntry, DiffKind, JsonDiff, json_cmp_exact};
pub use cursor::SeqCursor;
pub use golden::{GoldenPaths, filter_routes, seed_placeholder_fixtures, write_golden_files};
pub use peer::{PeerConstraints, PeerMatch, PeerRequest, match_peers};
pub use prefix::{PrefixEvents, PrefixOutcome, PrefixRequest, StepOutcome, fixture_name};

/// Set to `1`, `true` or `yes` to refresh golden files on every covering check.
pub const UPDATE_EXPECTED_ENV: &str = "BMP_UPDATE_EXPECTED";

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Fs(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("config error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// Directory the collector writes its log into.
    pub log_folder: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    pub fixture_root: PathBuf,
    /// Parent of the `tmp/` snapshot directory; defaults to `log_folder`.
    #[serde(default)]
    pub snapshot_root: Option<PathBuf>,
    #[serde(default)]
    pub update_expected: bool,
    #[serde(default)]
    pub vrf: Option<String>,
    /// Exec prefix for commands on the collector host.
    #[serde(default)]
    pub collector_prefix: Vec<String>,
    /// Exec prefix for vtysh on the router under test.
    #[serde(default)]
    pub client_prefix: Vec<String>,
}

fn default_log_file() -> String {
    "bmp.log".to_owned()
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures");
        Self {
            log_folder: fixtures.join("collector"),
            log_file: default_log_file(),
            fixture_root: fixtures.join("expected"),
            snapshot_root: None,
            update_expected: false,
            vrf: None,
            collector_prefix: Vec::new(),
            client_prefix: Vec::new(),
        }
    }

    pub fn from_yaml_str(body: &str) -> Result<Self, HarnessError> {
        let config: Self = serde_yaml::from_str(body)?;
        if config.log_file.trim().is_empty() {
            return Err(HarnessError::Config("log_file must not be empty".to_owned()));
        }
        Ok(config)
    }

    pub fn from_yaml_path(path: &Path) -> Result<Self, HarnessError> {
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }

    /// Applies [`UPDATE_EXPECTED_ENV`] from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        let value = std::env::var(UPDATE_EXPECTED_ENV).ok();
        self.with_update_flag(value.as_deref())
    }

    fn with_update_flag(mut self, value: Option<&str>) -> Self {
        if let Some(value) = value {
            let value = value.trim();
            if ["1", "true", "yes"]
                .iter()
                .any(|truthy| value.eq_ignore_ascii_case(truthy))
            {
                self.update_expected = true;
            }
        }
        self
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.log_folder.join(&self.log_file)
    }

    #[must_use]
    pub fn fixture_path(&self, request: &PrefixRequest) -> PathBuf {
        self.fixture_root.join(request.fixture_name())
    }

    #[must_use]
    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_root
            .as_ref()
            .unwrap_or(&self.log_folder)
            .join("tmp")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

/// Log access, routing-table access and fixture locations for one suite.
///
/// The harness holds no correlation state; the [`SeqCursor`] passed into
/// each check is the only thing that remembers progress.
#[derive(Debug, Clone)]
pub struct BmpHarness<C, Q> {
    config: HarnessConfig,
    collector: C,
    routes: Q,
}

pub type ShellHarness = BmpHarness<ShellRunner, VtyshRouteQuery<ShellRunner>>;

impl ShellHarness {
    #[must_use]
    pub fn from_config(config: HarnessConfig) -> Self {
        let collector = ShellRunner::with_prefix(config.collector_prefix.clone());
        let client = ShellRunner::with_prefix(config.client_prefix.clone());
        let routes = VtyshRouteQuery::new(client, config.vrf.clone());
        Self::new(config, collector, routes)
    }
}

impl<C: CommandRunner, Q: RouteQuery> BmpHarness<C, Q> {
    pub fn new(config: HarnessConfig, collector: C, routes: Q) -> Self {
        Self {
            config,
            collector,
            routes,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    #[must_use]
    pub fn collector(&self) -> &C {
        &self.collector
    }

    #[must_use]
    pub fn routes(&self) -> &Q {
        &self.routes
    }

    /// Every record currently in the collector log, in file order.
    pub fn read_records(&self) -> Result<Vec<EventRecord>, HarnessError> {
        Ok(read_log_records(&self.collector, &self.config.log_path())?)
    }

    /// Records past `cursor`, in `seq` order. Does not move the cursor.
    pub fn unread_records(&self, cursor: &SeqCursor) -> Result<Vec<EventRecord>, HarnessError> {
        Ok(cursor.unread(self.read_records()?))
    }

    /// Moves `cursor` past everything already logged, e.g. the events
    /// emitted while the topology came up. Returns the new watermark.
    pub fn sync_to_log_tail(&self, cursor: &mut SeqCursor) -> Result<u64, HarnessError> {
        let newest = self.read_records()?.iter().map(|record| record.seq).max();
        if let Some(seq) = newest {
            cursor.advance_to(seq);
        }
        info!(cursor = cursor.get(), "bmp cursor synced to log tail");
        Ok(cursor.get())
    }
}

static TRACING: Once = Once::new();

/// Installs a compact stderr subscriber honouring `RUST_LOG` (default
/// `info`). Safe to call repeatedly; only the first call installs anything.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init();
    });
}
