//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use vspace::core::SegmentFlags;
use vspace::disasm::IcedArchitecture;
use vspace::notify::observer_fn;
use vspace::storage::BufferAccessor;
use vspace::{AddressSpace, ChangeEvent, SpaceConfig};

pub const CODE_BASE: u64 = 0x1000;
pub const DATA_BASE: u64 = 0x2000;

/// Config with analysis left to the test
pub fn quiet_config() -> SpaceConfig {
    let mut config = SpaceConfig::default();
    config.analysis.auto_schedule = false;
    config
}

/// x86_64 code at `CODE_BASE`, read-only data at `DATA_BASE`.
///
/// ```text
/// 0x1000: test eax,eax ; je 0x1009 ; call 0x1010 ; ret
/// 0x1010: mov eax, 0x2000 ; ret
/// 0x2002: "hello analysis"
/// ```
pub fn program_bytes() -> Vec<u8> {
    let mut bytes = vec![0x90u8; 0x20];
    bytes[..10].copy_from_slice(&[0x85, 0xc0, 0x74, 0x05, 0xe8, 0x07, 0x00, 0x00, 0x00, 0xc3]);
    bytes[0x10..0x16].copy_from_slice(&[0xb8, 0x00, 0x20, 0x00, 0x00, 0xc3]);
    bytes.extend_from_slice(b"\0\0hello analysis\0");
    bytes
}

pub fn program_space(config: SpaceConfig) -> Arc<AddressSpace> {
    let space = AddressSpace::builder()
        .storage(BufferAccessor::new(program_bytes()))
        .architecture(Arc::new(IcedArchitecture::x86_64()))
        .config(config)
        .build()
        .expect("program space");
    space
        .add_auto_segment(CODE_BASE, 0x20, 0, 0x20, SegmentFlags::rwx(true, false, true))
        .expect("code segment");
    space
        .add_auto_segment(DATA_BASE, 0x11, 0x20, 0x11, SegmentFlags::READABLE)
        .expect("data segment");
    space
}

/// One read/write auto segment over `bytes` at `base`.
pub fn flat_space(bytes: Vec<u8>, base: u64) -> Arc<AddressSpace> {
    let len = bytes.len() as u64;
    let space = AddressSpace::builder()
        .storage(BufferAccessor::new(bytes))
        .config(quiet_config())
        .build()
        .expect("flat space");
    space
        .add_auto_segment(base, len, 0, len, SegmentFlags::rwx(true, true, false))
        .expect("flat segment");
    space
}

/// Event names seen by an observer, in delivery order.
pub fn record_events(space: &AddressSpace) -> Arc<Mutex<Vec<&'static str>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    space.register_observer(observer_fn(move |_, event: &ChangeEvent| {
        sink.lock().unwrap().push(event.name());
        Ok(())
    }));
    seen
}
