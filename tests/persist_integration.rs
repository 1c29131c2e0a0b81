mod common;

use common::{program_space, quiet_config, CODE_BASE, DATA_BASE};
use tempfile::tempdir;
use vspace::core::{Symbol, SymbolKind};
use vspace::space::RawBackend;
use vspace::storage::{FileAccessor, ModificationStatus};
use vspace::{open_database, AddressSpace, ViewTypeRegistry};

#[test]
fn test_file_backed_space_saves_only_on_request() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.bin");
    std::fs::write(&input, [0u8, 1, 2, 3, 4, 5, 6, 7]).unwrap();

    let space = AddressSpace::builder()
        .storage(FileAccessor::open(&input).unwrap())
        .backend(RawBackend)
        .config(quiet_config())
        .build()
        .unwrap();
    assert_eq!(space.write(2, &[0xaa, 0xbb]), 2);
    assert_eq!(space.read(0, 4), vec![0, 1, 0xaa, 0xbb]);
    assert_eq!(std::fs::read(&input).unwrap()[2], 2);

    let output = dir.path().join("output.bin");
    assert!(space.save(&output));
    assert_eq!(std::fs::read(&output).unwrap(), vec![0, 1, 0xaa, 0xbb, 4, 5, 6, 7]);
    assert!(!space.save(dir.path().join("missing").join("out.bin")));
}

#[test]
fn test_database_keeps_analysis_inputs() {
    let space = program_space(quiet_config());
    space.add_entry_point(CODE_BASE);
    space.update_analysis_and_wait();
    space.define_user_symbol(Symbol::new(SymbolKind::Data, DATA_BASE + 2, "greeting"));

    let dir = tempdir().unwrap();
    let path = dir.path().join("program.vdb");
    assert!(space.create_database(&path));

    let reopened = open_database(&path, &ViewTypeRegistry::init()).unwrap();
    assert_eq!(reopened.entry_points(), vec![CODE_BASE]);
    assert_eq!(
        reopened.get_symbol_at(DATA_BASE + 2, None).unwrap().full_name,
        "greeting"
    );
    assert_eq!(reopened.read(DATA_BASE + 2, 5), b"hello".to_vec());
    assert_eq!(
        reopened.get_modification(DATA_BASE + 2),
        Some(ModificationStatus::Original)
    );

    reopened.update_analysis_and_wait();
    assert_eq!(reopened.functions().len(), 2);
    assert_eq!(reopened.get_callers(CODE_BASE + 0x10), vec![CODE_BASE + 4]);
}
