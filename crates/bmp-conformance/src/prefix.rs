use std::collections::{BTreeMap, BTreeSet};

use bmp_io::{CommandRunner, RouteQuery, read_json_fixture};
use bmp_types::{EventRecord, MessageType, Policy};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::compare::{JsonDiff, json_cmp_exact};
use crate::cursor::SeqCursor;
use crate::golden::{GoldenPaths, write_golden_files};
use crate::{BmpHarness, HarnessError};

/// Which route events one step of a test expects to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixRequest {
    pub prefixes: BTreeSet<String>,
    pub log_type: MessageType,
    pub policy: Policy,
    pub step: u32,
    pub update_expected: bool,
}

impl PrefixRequest {
    pub fn new<I, S>(prefixes: I, log_type: MessageType, policy: Policy, step: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            log_type,
            policy,
            step,
            update_expected: false,
        }
    }

    #[must_use]
    pub fn with_update_expected(mut self, update_expected: bool) -> Self {
        self.update_expected = update_expected;
        self
    }

    /// `bmp-<type>-<policy>-step<step>.json`, shared by fixtures and snapshots.
    #[must_use]
    pub fn fixture_name(&self) -> String {
        fixture_name(&self.log_type, &self.policy, self.step)
    }

    fn matches(&self, record: &EventRecord) -> bool {
        record.is_policy(&self.policy)
            && record.is_type(&self.log_type)
            && record
                .ip_prefix
                .as_ref()
                .is_some_and(|prefix| self.prefixes.contains(prefix))
    }
}

#[must_use]
pub fn fixture_name(log_type: &MessageType, policy: &Policy, step: u32) -> String {
    format!("bmp-{log_type}-{policy}-step{step}.json")
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrefixOutcome {
    pub actual: Value,
    pub diff: Option<JsonDiff>,
    pub matched: usize,
    pub cursor_before: u64,
    pub cursor_after: u64,
    pub golden: Option<GoldenPaths>,
}

impl PrefixOutcome {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.diff.is_none()
    }
}

/// Matching events of one check, keyed by prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrefixEvents {
    entries: BTreeMap<String, Map<String, Value>>,
    matched: usize,
    max_seq: Option<u64>,
}

impl PrefixEvents {
    /// Folds `records` (already past the cursor, in `seq` order). A later
    /// event for the same prefix replaces the earlier one.
    #[must_use]
    pub fn collect(records: &[EventRecord], request: &PrefixRequest) -> Self {
        let mut events = Self::default();
        for record in records.iter().filter(|record| request.matches(record)) {
            if let Some(prefix) = &record.ip_prefix {
                events
                    .entries
                    .insert(prefix.clone(), record.comparable_fields());
                events.matched += 1;
                events.max_seq = events.max_seq.max(Some(record.seq));
            }
        }
        events
    }

    #[must_use]
    pub fn matched(&self) -> usize {
        self.matched
    }

    #[must_use]
    pub fn max_seq(&self) -> Option<u64> {
        self.max_seq
    }

    /// True when the observed prefixes are exactly the requested set.
    #[must_use]
    pub fn covers(&self, prefixes: &BTreeSet<String>) -> bool {
        !self.entries.is_empty() && self.entries.keys().eq(prefixes.iter())
    }

    /// `{policy: {type: {prefix: fields}}}`, or `{}` when nothing matched.
    #[must_use]
    pub fn to_document(&self, request: &PrefixRequest) -> Value {
        let mut document = Map::new();
        if self.entries.is_empty() {
            return Value::Object(document);
        }
        let by_prefix = self
            .entries
            .iter()
            .map(|(prefix, fields)| (prefix.clone(), Value::Object(fields.clone())))
            .collect::<Map<_, _>>();
        let mut by_type = Map::new();
        by_type.insert(request.log_type.to_string(), Value::Object(by_prefix));
        document.insert(request.policy.to_string(), Value::Object(by_type));
        Value::Object(document)
    }
}

/// Every policy view of one test step, checked against a single window.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub views: Vec<PrefixOutcome>,
    pub cursor_before: u64,
    pub cursor_after: u64,
}

impl StepOutcome {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.views.iter().all(PrefixOutcome::passed)
    }

    /// Views whose comparison produced a diff.
    pub fn failures(&self) -> impl Iterator<Item = &PrefixOutcome> + '_ {
        self.views.iter().filter(|view| !view.passed())
    }
}

impl<C: CommandRunner, Q: RouteQuery> BmpHarness<C, Q> {
    /// Compares the route events logged since `cursor` with the step's
    /// fixture.
    ///
    /// A clean comparison advances the cursor to the newest matched event;
    /// a diff leaves it where it was so a retry sees the same window. The
    /// exporter interleaves pre-policy, post-policy and loc-rib events, so
    /// several views of the same step go through [`Self::check_step`].
    pub fn check_prefixes(
        &self,
        request: &PrefixRequest,
        cursor: &mut SeqCursor,
    ) -> Result<PrefixOutcome, HarnessError> {
        let records = cursor.unread(self.read_records()?);
        let (mut outcome, max_seq) = self.compare_view(&records, request, cursor.get())?;
        if outcome.passed()
            && let Some(seq) = max_seq
        {
            cursor.advance_to(seq);
        }
        outcome.cursor_after = cursor.get();
        Ok(outcome)
    }

    /// Checks each request against the same unread window.
    ///
    /// The cursor moves once, to the newest event matched by any view, and
    /// only when every view compares clean.
    pub fn check_step(
        &self,
        requests: &[PrefixRequest],
        cursor: &mut SeqCursor,
    ) -> Result<StepOutcome, HarnessError> {
        let cursor_before = cursor.get();
        let records = cursor.unread(self.read_records()?);

        let mut views = Vec::with_capacity(requests.len());
        let mut newest = None;
        for request in requests {
            let (outcome, max_seq) = self.compare_view(&records, request, cursor_before)?;
            newest = newest.max(max_seq);
            views.push(outcome);
        }

        let mut step = StepOutcome {
            views,
            cursor_before,
            cursor_after: cursor_before,
        };
        if step.passed()
            && let Some(seq) = newest
        {
            step.cursor_after = cursor.advance_to(seq);
        }
        for view in &mut step.views {
            view.cursor_after = step.cursor_after;
        }
        info!(
            views = step.views.len(),
            failed = step.failures().count(),
            cursor = step.cursor_after,
            "bmp step checked"
        );
        Ok(step)
    }

    fn compare_view(
        &self,
        records: &[EventRecord],
        request: &PrefixRequest,
        cursor_before: u64,
    ) -> Result<(PrefixOutcome, Option<u64>), HarnessError> {
        info!(
            cursor = cursor_before,
            log_type = %request.log_type,
            policy = %request.policy,
            step = request.step,
            "checking bmp prefixes"
        );

        let expected = read_json_fixture(&self.config().fixture_path(request))?;
        let events = PrefixEvents::collect(records, request);
        let actual = events.to_document(request);

        let update_expected = request.update_expected || self.config().update_expected;
        let golden = if update_expected && events.covers(&request.prefixes) {
            Some(write_golden_files(
                &self.config().snapshot_dir(),
                &actual,
                request,
                self.routes(),
            )?)
        } else {
            None
        };

        let diff = json_cmp_exact(&actual, &expected);
        if let Some(diff) = &diff {
            warn!(entries = diff.len(), fixture = %request.fixture_name(), "bmp prefix check mismatch");
        }

        let outcome = PrefixOutcome {
            actual,
            diff,
            matched: events.matched(),
            cursor_before,
            cursor_after: cursor_before,
            golden,
        };
        Ok((outcome, events.max_seq()))
    }
}
