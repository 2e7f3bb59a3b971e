#![no_main]

use bmp_conformance::SeqCursor;
use bmp_io::decode_log_lines;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let records = decode_log_lines(text).collect::<Vec<_>>();
    for record in &records {
        let _ = record.comparable_fields();
        let _ = record.peer_address();
    }

    let cursor = SeqCursor::new(records.first().map_or(0, |record| record.seq));
    let unread = cursor.unread(records);
    assert!(unread.iter().all(|record| cursor.is_unread(record)));
    assert!(unread.windows(2).all(|pair| pair[0].seq <= pair[1].seq));
});
