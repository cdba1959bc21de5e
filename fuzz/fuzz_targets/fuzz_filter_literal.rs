#![no_main]

use chrono::NaiveDate;
use da_agile::{Agile, FilterSpec, parse_relative_literal};
use da_io::read_csv_str;
use libfuzzer_sys::fuzz_target;

const MAX_INPUT_BYTES: usize = 512;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT_BYTES {
        return;
    }
    let Ok(literal) = std::str::from_utf8(data) else {
        return;
    };
    let Ok((column, value)) = parse_relative_literal(literal) else {
        return;
    };
    assert!(!column.is_empty());

    // Any accepted literal must evaluate against a date column without panicking.
    let Ok(frame) = read_csv_str(&format!("{column}\n2024-01-01\n\n2023-06-30\n")) else {
        return;
    };
    let Some(today) = NaiveDate::from_ymd_opt(2024, 3, 31) else {
        return;
    };
    let spec = FilterSpec::new().with(column, value);
    if let Ok(out) = Agile::with_reference_date(today).filter(&frame, &spec, &[]) {
        assert!(out.len() <= frame.len());
    }
});
