#![no_main]

use da_io::{read_csv_str, write_csv_string};
use libfuzzer_sys::fuzz_target;

const MAX_INPUT_BYTES: usize = 16_384;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT_BYTES {
        return;
    }
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(frame) = read_csv_str(input) else {
        return;
    };

    let Ok(written) = write_csv_string(&frame) else {
        return;
    };
    // Writing and re-reading keeps the shape.
    if let Ok(reread) = read_csv_str(&written) {
        assert_eq!(reread.len(), frame.len());
        assert_eq!(reread.column_names(), frame.column_names());
    }
});
