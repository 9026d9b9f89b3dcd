use std::path::Path;

pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(
        haystack.contains(needle),
        "Expected to find '{needle}' in output, got: {haystack}"
    );
}

/// Read `<output_dir>/soak/report.json` and check its verdict.
pub fn assert_report_verdict(output_dir: &Path, verdict: &str) -> serde_json::Value {
    let path = output_dir.join("soak").join("report.json");
    assert!(path.is_file(), "Expected report at {}", path.display());
    let contents = std::fs::read_to_string(&path).expect("Failed to read report");
    let report: serde_json::Value = serde_json::from_str(&contents).expect("Report is not JSON");
    assert_eq!(report["verdict"], verdict, "unexpected verdict in {contents}");
    report
}
