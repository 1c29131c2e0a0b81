mod common;

use common::{flat_space, record_events};
use vspace::core::{SegmentFlags, Symbol, SymbolKind};
use vspace::storage::{BufferAccessor, ModificationStatus};
use vspace::{AddressSpace, ViewTypeRegistry};

#[test]
fn test_write_tracks_modifications_and_notifies() {
    let space = flat_space((0u8..0x40).collect(), 0x4000);
    let events = record_events(&space);

    // byte 2 is rewritten with its own value, byte 3 changes
    assert_eq!(space.write(0x4002, &[2, 0xff]), 2);
    assert_eq!(space.get_modification(0x4002), Some(ModificationStatus::Original));
    assert_eq!(space.get_modification(0x4003), Some(ModificationStatus::Changed));
    assert!(space.is_modified());
    assert_eq!(*events.lock().unwrap(), vec!["data_written"]);

    // stops at the segment end
    assert_eq!(space.write(0x403f, &[1, 2, 3]), 1);
    assert!(space.read(0x4040, 1).is_empty());
    assert_eq!(space.get_modification(0x4040), None);
}

#[test]
fn test_user_segment_shadows_auto_mapping() {
    let mut bytes = vec![0u8; 0x300];
    bytes[0x200..0x210].copy_from_slice(&[0xab; 0x10]);
    let space = flat_space(bytes, 0x1000);
    let events = record_events(&space);

    space
        .add_user_segment(0x1080, 0x10, 0x200, 0x10, SegmentFlags::READABLE)
        .unwrap();
    assert_eq!(space.read(0x1080, 2), vec![0xab, 0xab]);
    assert_eq!(space.read(0x107f, 1), vec![0]);
    assert!(!space.is_offset_writable(0x1080));
    assert!(space.is_offset_writable(0x1090));
    assert_eq!(space.write(0x1080, &[1]), 0);

    assert!(space.remove_user_segment(0x1080));
    assert_eq!(space.read(0x1080, 1), vec![0]);
    assert_eq!(
        *events.lock().unwrap(),
        vec!["segment_added", "segment_removed"]
    );
}

#[test]
fn test_grouped_undo_reverts_every_action() {
    let space = flat_space(vec![0; 0x40], 0x4000);
    space.begin_undo_actions();
    space.define_user_symbol(Symbol::new(SymbolKind::Data, 0x4010, "table"));
    space.set_comment_at(0x4010, "lookup table");
    space.write(0x4010, &[7]);
    assert!(space.commit_undo_actions().is_some());
    assert_eq!(space.get_undo_entries().len(), 1);

    assert!(space.undo());
    assert!(space.get_symbol_at(0x4010, None).is_none());
    assert!(space.get_comment_at(0x4010).is_none());
    assert_eq!(space.read(0x4010, 1), vec![0]);
    assert!(space.can_redo());

    assert!(space.redo());
    assert_eq!(space.get_symbol_at(0x4010, None).unwrap().full_name, "table");
    assert_eq!(space.read(0x4010, 1), vec![7]);
}

#[test]
fn test_observer_can_mutate_from_callback() {
    use vspace::notify::observer_fn;

    let space = flat_space(vec![0; 0x40], 0x4000);
    space.register_observer(observer_fn(|space, event| {
        if let vspace::ChangeEvent::DataWritten { offset, .. } = event {
            space.set_comment_at(*offset, "touched");
        }
        Ok(())
    }));
    space.register_observer(observer_fn(|_, _| anyhow::bail!("broken observer")));

    space.write(0x4004, &[1]);
    assert_eq!(space.get_comment_at(0x4004).as_deref(), Some("touched"));
    assert!(space.notifier().failure_count() >= 1);
}

#[test]
fn test_raw_parent_sees_view_writes() {
    let data = AddressSpace::builder()
        .storage(BufferAccessor::new(vec![0u8; 0x20]))
        .backend(vspace::space::RawBackend)
        .build()
        .unwrap();
    let view = ViewTypeRegistry::init().create("Mapped", &data).unwrap();
    assert_eq!(view.insert(0, &[1]), 0);
    assert_eq!(data.insert(0, &[9, 9]), 2);
    assert_eq!(data.get_modification(0), Some(ModificationStatus::Inserted));
    assert_eq!(data.len(), 0x22);
    assert_eq!(view.read(0, 2), vec![9, 9]);
}

#[test]
fn test_data_var_events_follow_mutation_order() {
    use vspace::core::DataType;

    let space = flat_space(vec![0; 0x40], 0x4000);
    let events = record_events(&space);
    space.define_user_data_var(0x4000, DataType::int(4, false));
    space.define_user_data_var(0x4008, DataType::int(8, true));
    assert!(space.undefine_user_data_var(0x4000));
    assert!(!space.undefine_user_data_var(0x4000));
    assert_eq!(
        *events.lock().unwrap(),
        vec!["data_var_added", "data_var_added", "data_var_removed"]
    );
}
