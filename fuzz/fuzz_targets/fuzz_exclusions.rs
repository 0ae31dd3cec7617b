#![no_main]
use arbitrary::Arbitrary;
use codex_cartridge::validation::{merge_exclusions, validate_exclusions};
use codex_cartridge::{ExclusionRange, Strictness};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    ranges: Vec<(Option<u64>, Option<u64>)>,
}

fuzz_target!(|input: Input| {
    let ranges: Vec<ExclusionRange> = input
        .ranges
        .into_iter()
        .map(|(start, end)| ExclusionRange {
            start,
            end,
            ..Default::default()
        })
        .collect();

    let strict = validate_exclusions("fuzz", &ranges, Strictness::Strict);
    let permissive = validate_exclusions("fuzz", &ranges, Strictness::Permissive);
    // Strict passes exactly when permissive finds nothing
    match permissive {
        Ok(violations) => assert_eq!(strict.is_ok(), violations.is_empty()),
        Err(_) => unreachable!("permissive validation reports, never fails"),
    }

    let merged = merge_exclusions(&ranges);
    for pair in merged.windows(2) {
        assert!(pair[0].end < pair[1].start);
    }
});
