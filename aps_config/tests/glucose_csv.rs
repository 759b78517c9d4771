use aps_config::load_glucose_csv;
use rstest::rstest;
use std::io::Write;

fn write_csv(body: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("tmp file");
    f.write_all(body.as_bytes()).expect("write csv");
    f
}

#[test]
fn ascending_rows_come_back_newest_first() {
    let f = write_csv(
        "timestamp,mg_dl,gap_filled\n\
         2026-03-01T06:50:00Z,140,false\n\
         2026-03-01T06:55:00Z,142,false\n\
         2026-03-01T07:00:00Z,146,true\n",
    );
    let rows = load_glucose_csv(f.path()).expect("valid csv");
    assert_eq!(rows.len(), 3);
    assert!((rows[0].mg_dl - 146.0).abs() < 1e-9);
    assert!(rows[0].gap_filled);
    assert!((rows[2].mg_dl - 140.0).abs() < 1e-9);
}

#[test]
fn descending_rows_are_kept_as_is() {
    let f = write_csv(
        "timestamp,mg_dl,gap_filled\n\
         2026-03-01T07:00:00Z,146,false\n\
         2026-03-01T06:55:00Z,142,false\n",
    );
    let rows = load_glucose_csv(f.path()).expect("valid csv");
    assert!(rows[0].timestamp > rows[1].timestamp);
}

#[rstest]
#[case("time,mg_dl,gap_filled\n2026-03-01T07:00:00Z,146,false\n", "headers")]
#[case("timestamp,mg_dl\n2026-03-01T07:00:00Z,146\n", "headers")]
#[case(
    "timestamp,mg_dl,gap_filled\n2026-03-01T07:00:00Z,146,false\n2026-03-01T07:00:00Z,147,false\n",
    "duplicate"
)]
#[case(
    "timestamp,mg_dl,gap_filled\n2026-03-01T06:50:00Z,146,false\n2026-03-01T07:00:00Z,147,false\n2026-03-01T06:55:00Z,150,false\n",
    "strictly ordered"
)]
#[case("timestamp,mg_dl,gap_filled\nnot-a-date,146,false\n", "invalid CSV row 2")]
fn rejects_malformed_files(#[case] body: &str, #[case] expected: &str) {
    let f = write_csv(body);
    let err = load_glucose_csv(f.path()).expect_err("should reject");
    assert!(format!("{err}").contains(expected), "got: {err}");
}

#[test]
fn missing_file_reports_path() {
    let err = load_glucose_csv(std::path::Path::new("/nonexistent/cgm.csv"))
        .expect_err("should fail");
    assert!(format!("{err}").contains("open glucose CSV"));
}
