mod common;

use std::sync::Arc;

use common::{program_space, quiet_config, CODE_BASE, DATA_BASE};
use vspace::linear::DisassemblySettings;
use vspace::search::{FindFlags, MatchValue};
use vspace::AddressSpace;

fn analyzed() -> Arc<AddressSpace> {
    let space = program_space(quiet_config());
    space.add_entry_point(CODE_BASE);
    space.update_analysis_and_wait();
    space
}

#[test]
fn test_data_search_skips_unmapped_gap() {
    let space = analyzed();
    assert_eq!(
        space.find_next_data(CODE_BASE, b"hello", FindFlags::default()),
        Some(DATA_BASE + 2)
    );
    assert_eq!(
        space.find_next_data(CODE_BASE, b"HELLO", FindFlags::ignore_case()),
        Some(DATA_BASE + 2)
    );
    assert_eq!(space.find_next_data(CODE_BASE, b"HELLO", FindFlags::default()), None);
}

#[test]
fn test_text_search_over_rendered_code() {
    let space = analyzed();
    let settings = DisassemblySettings::default();

    let mut hits = Vec::new();
    let found = space.find_all_text(
        CODE_BASE,
        CODE_BASE + 0x20,
        "RET",
        &settings,
        FindFlags::ignore_case(),
        |_, _| true,
        |m| {
            assert!(matches!(m.value, MatchValue::Text(_)));
            hits.push(m.address);
            true
        },
    );
    assert!(found);
    assert_eq!(hits, vec![CODE_BASE + 9, CODE_BASE + 0x15]);
    assert_eq!(
        space.find_next_text(CODE_BASE, "call", &settings, FindFlags::default()),
        Some(CODE_BASE + 4)
    );
}

#[test]
fn test_constant_search_matches_operands() {
    let space = analyzed();
    let settings = DisassemblySettings::default();
    assert_eq!(
        space.find_next_constant(CODE_BASE, DATA_BASE, &settings),
        Some(CODE_BASE + 0x10)
    );
    let calls: Vec<u64> = space
        .find_all_constant_stream(CODE_BASE, CODE_BASE + 0x20, CODE_BASE + 0x10, &settings)
        .map(|m| m.address)
        .collect();
    assert_eq!(calls, vec![CODE_BASE + 4]);
}

#[test]
fn test_match_callback_stops_after_first_hit() {
    let space = common::flat_space(b"abcXabcXabcX".to_vec(), 0x100);
    let mut hits = Vec::new();
    let found = space.find_all_data(space.start(), space.end(), b"abc", FindFlags::default(), |_, _| true, |m| {
        hits.push(m.address);
        false
    });
    assert!(found);
    assert_eq!(hits, vec![0x100]);
}
