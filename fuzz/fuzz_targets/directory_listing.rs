#![no_main]

use libfuzzer_sys::fuzz_target;
use trio_link::checksum::{checksum, checksum_bytes, split_program_lines};
use trio_link::program::{parse_directory, parse_directory_row, AutorunSpec};

const MAX_LISTING_BYTES: usize = 8192;

fuzz_target!(|data: &[u8]| {
    let capped = &data[..data.len().min(MAX_LISTING_BYTES)];
    let listing = String::from_utf8_lossy(capped);

    if let Ok(table) = parse_directory(&listing) {
        for (name, entry) in &table {
            assert_eq!(name, &entry.name);
            let file_name = entry.file_name();
            assert!(file_name.starts_with(name.as_str()));
        }
    }
    for line in listing.lines() {
        let _ = parse_directory_row(line);
        if let Some(autorun) = AutorunSpec::parse(line) {
            assert_eq!(AutorunSpec::parse(&autorun.to_string()), Some(autorun));
        }
    }

    let lines = split_program_lines(capped);
    assert_eq!(checksum_bytes(capped), checksum(&lines));
});
