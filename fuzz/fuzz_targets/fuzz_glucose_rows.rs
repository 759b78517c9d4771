#![no_main]
use aps_config::{GlucoseRow, order_newest_first};
use chrono::DateTime;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: Vec<(i32, u16, bool)>| {
    let rows: Vec<GlucoseRow> = data
        .iter()
        .filter_map(|&(secs, mg, gap)| {
            DateTime::from_timestamp(i64::from(secs), 0).map(|timestamp| GlucoseRow {
                timestamp,
                mg_dl: f64::from(mg),
                gap_filled: gap,
            })
        })
        .collect();
    if let Ok(ordered) = order_newest_first(rows) {
        assert!(ordered.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
    }
});
