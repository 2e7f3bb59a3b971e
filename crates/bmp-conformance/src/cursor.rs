use std::fmt;

use bmp_types::EventRecord;
use tracing::info;

/// Watermark over collector `seq` numbers for one test run.
///
/// A cursor belongs to exactly one test sequence and is handed to every
/// check by `&mut`. Nothing else tracks which records were already seen:
/// re-polling the log is idempotent only because checks look past the
/// watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqCursor {
    seq: u64,
}

impl SeqCursor {
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self { seq }
    }

    #[must_use]
    pub const fn get(&self) -> u64 {
        self.seq
    }

    /// Unchecked assignment. Correlators go through [`Self::advance_to`].
    pub fn set(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub fn reset(&mut self, seq: u64) {
        info!(seq, "bmp cursor reset");
        self.seq = seq;
    }

    pub fn display(&self) {
        info!("SEQ is {}", self.seq);
    }

    /// Moves the watermark forward to `seq`; never moves it back.
    pub fn advance_to(&mut self, seq: u64) -> u64 {
        if seq > self.seq {
            info!(from = self.seq, to = seq, "bmp cursor advanced");
            self.seq = seq;
        }
        self.seq
    }

    #[must_use]
    pub fn is_unread(&self, record: &EventRecord) -> bool {
        record.seq > self.seq
    }

    /// Records past the watermark, ordered by `seq`.
    #[must_use]
    pub fn unread(&self, mut records: Vec<EventRecord>) -> Vec<EventRecord> {
        records.retain(|record| self.is_unread(record));
        records.sort_by_key(|record| record.seq);
        records
    }
}

impl fmt::Display for SeqCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.seq)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bmp_types::{EventRecord, VOLATILE_FIELDS};
    use proptest::prelude::*;
    use serde_json::{Map, Value, json};

    use super::SeqCursor;

    fn records(seqs: &[u64]) -> Vec<EventRecord> {
        seqs.iter()
            .map(|seq| EventRecord::from_value(json!({ "seq": seq })).expect("record"))
            .collect()
    }

    #[test]
    fn unread_sorts_and_filters_past_watermark() {
        let cursor = SeqCursor::new(4);
        let seqs = cursor
            .unread(records(&[9, 2, 4, 5, 7]))
            .iter()
            .map(|record| record.seq)
            .collect::<Vec<_>>();
        assert_eq!(seqs, [5, 7, 9]);
    }

    #[test]
    fn advance_never_moves_backwards() {
        let mut cursor = SeqCursor::default();
        assert_eq!(cursor.advance_to(12), 12);
        assert_eq!(cursor.advance_to(3), 12);
        assert_eq!(cursor.get(), 12);
    }

    #[test]
    fn set_and_reset_are_unchecked() {
        let mut cursor = SeqCursor::new(10);
        cursor.set(2);
        assert_eq!(cursor.get(), 2);
        cursor.reset(0);
        assert_eq!(cursor, SeqCursor::default());
        assert_eq!(cursor.to_string(), "0");
    }

    proptest! {
        #[test]
        fn repolling_after_advance_sees_nothing_new(
            seqs in proptest::collection::vec(0_u64..1_000, 0..40),
            start in 0_u64..1_000,
        ) {
            let mut cursor = SeqCursor::new(start);
            let unread = cursor.unread(records(&seqs));
            if let Some(last) = unread.last() {
                cursor.advance_to(last.seq);
            }
            prop_assert!(cursor.unread(records(&seqs)).is_empty());
        }

        #[test]
        fn unread_records_never_compare_on_volatile_fields(
            body in proptest::collection::btree_map("[a-z_-]{1,12}", "[ -~]{0,16}", 0..12),
            seq in 1_u64..1_000,
            timestamp in proptest::option::of("[0-9: .-]{0,26}"),
            link_local in proptest::option::of("fe80::[0-9a-f]{1,4}"),
        ) {
            let mut object = body
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect::<Map<_, _>>();
            object.insert("seq".to_owned(), json!(seq));
            if let Some(timestamp) = timestamp {
                object.insert("timestamp".to_owned(), Value::String(timestamp));
            }
            if let Some(link_local) = link_local {
                object.insert("nxhp_link-local".to_owned(), Value::String(link_local));
            }
            let record = EventRecord::from_value(Value::Object(object)).expect("record");

            for record in SeqCursor::new(seq - 1).unread(vec![record]) {
                let comparable = record.comparable_fields();
                prop_assert!(VOLATILE_FIELDS.iter().all(|field| !comparable.contains_key(*field)));

                let kept = body
                    .iter()
                    .filter(|(key, _)| !VOLATILE_FIELDS.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                    .collect::<BTreeMap<_, _>>();
                prop_assert_eq!(
                    comparable.into_iter().collect::<Vec<_>>(),
                    kept.into_iter().collect::<Vec<_>>()
                );
            }
        }

        #[test]
        fn advance_is_monotonic(targets in proptest::collection::vec(0_u64..10_000, 1..30)) {
            let mut cursor = SeqCursor::default();
            let mut previous = cursor.get();
            for target in targets {
                let now = cursor.advance_to(target);
                prop_assert!(now >= previous);
                previous = now;
            }
        }
    }
}
