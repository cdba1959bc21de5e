#![no_main]

use da_agile::{Agile, FilterSpec};
use da_io::read_json_records;
use libfuzzer_sys::fuzz_target;

const MAX_INPUT_BYTES: usize = 4_096;

const RECORDS: &str = r#"[
    {"Id": 1, "State": "Done", "Effort": 3, "ClosedDate": "2024-01-10"},
    {"Id": 2, "State": "Removed", "Effort": null, "ClosedDate": null},
    {"Id": 3, "State": "Active", "Effort": 2.5, "ClosedDate": "2024-03-01"}
]"#;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT_BYTES {
        return;
    }
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(spec) = FilterSpec::from_json(&value) else {
        return;
    };
    let Ok(frame) = read_json_records(RECORDS) else {
        return;
    };

    let engine = Agile::new();
    if let Ok(once) = engine.filter(&frame, &spec, &[]) {
        assert!(once.len() <= frame.len());
        let twice = engine.filter(&once, &spec, &[]);
        assert!(matches!(twice, Ok(ref again) if again.semantic_eq(&once)));
    }
});
