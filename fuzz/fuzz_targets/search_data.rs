#![no_main]
use libfuzzer_sys::fuzz_target;
use vspace::core::SegmentFlags;
use vspace::search::FindFlags;
use vspace::storage::BufferAccessor;
use vspace::{AddressSpace, SpaceConfig};

// First byte picks the pattern length, the rest is the haystack.
fuzz_target!(|data: &[u8]| {
    let Some((&n, rest)) = data.split_first() else {
        return;
    };
    let n = (n as usize % 8) + 1;
    if rest.len() < n {
        return;
    }
    let (pattern, haystack) = rest.split_at(n);
    let mut config = SpaceConfig::default();
    config.analysis.auto_schedule = false;
    config.search.chunk_size = 16;
    let Ok(space) = AddressSpace::builder()
        .storage(BufferAccessor::new(haystack.to_vec()))
        .config(config)
        .build()
    else {
        return;
    };
    let len = haystack.len() as u64;
    if len == 0 || space.add_auto_segment(0x1000, len, 0, len, SegmentFlags::READABLE).is_err() {
        return;
    }
    let mut found = Vec::new();
    space.find_all_data(
        0x1000,
        0x1000 + len,
        pattern,
        FindFlags::default(),
        |_, _| true,
        |m| {
            found.push(m.address);
            true
        },
    );
    let expected: Vec<u64> = haystack
        .windows(n)
        .enumerate()
        .filter(|(_, w)| *w == pattern)
        .map(|(i, _)| 0x1000 + i as u64)
        .collect();
    assert_eq!(found, expected);
});
