//! Database snapshots of an address space.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::disasm::ArchitectureRegistry;
use crate::error::Result;
use crate::space::{AddressSpace, RawBackend, SegmentBackend, SegmentMap, ViewTypeRegistry};
use crate::storage::{BufferAccessor, PatchLog};

use super::{read_snapshot, write_atomic, write_atomic_new, Snapshot};

impl AddressSpace {
    /// Capture the current state as a `Snapshot`.
    pub fn snapshot(&self) -> Snapshot {
        let _guard = self.mutation.lock();
        let (segments, sections) = {
            let map = self.map.read();
            (map.segments(), map.all_sections())
        };
        let metadata = self.metadata.read().user_records();
        let (user_functions, entry_points) = {
            let store = self.functions.read();
            let user: Vec<u64> = store
                .functions
                .values()
                .filter(|f| !f.auto_defined)
                .map(|f| f.start)
                .collect();
            (user, store.entry_points.clone())
        };
        let contents = self.read_storage_contents();
        Snapshot {
            saved_at: Utc::now(),
            view_type: self.view_type().to_string(),
            architecture: self.architecture().map(|a| a.name().to_string()),
            config: self.config().clone(),
            segments,
            sections,
            metadata,
            user_functions,
            entry_points,
            contents,
            modifications: self.modification_runs(),
        }
    }

    fn read_storage_contents(&self) -> Vec<u8> {
        let storage = self.storage.read();
        storage.read(0, storage.len() as usize)
    }

    /// Write a new database at `path`; fails if the file exists.
    pub fn create_database(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let result = self
            .snapshot()
            .encode()
            .and_then(|bytes| write_atomic_new(path, &bytes));
        report(path, "database created", result)
    }

    /// Write the current state to `path`, replacing any previous snapshot.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let result = self
            .snapshot()
            .encode()
            .and_then(|bytes| write_atomic(path, &bytes));
        report(path, "snapshot saved", result)
    }
}

fn report(path: &Path, what: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => {
            info!(path = %path.display(), "{}", what);
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "database write failed");
            false
        }
    }
}

/// Open a database written by `create_database` or `save_snapshot`.
pub fn open_database(
    path: impl AsRef<Path>,
    registry: &ViewTypeRegistry,
) -> Result<Arc<AddressSpace>> {
    let path = path.as_ref();
    let snapshot = read_snapshot(path)
        .map_err(|e| crate::log_error!(e, "failed to open database"))?;
    let space = restore_snapshot(snapshot, registry)?;
    info!(path = %path.display(), view = space.view_type(), "database opened");
    Ok(space)
}

/// Rebuild an address space from a decoded snapshot.
///
/// The bytes go into a raw parent space; the view named in the snapshot is
/// created over it through `registry`. An unknown view name falls back to a
/// plain segment-mapped view carrying that name.
pub fn restore_snapshot(
    snapshot: Snapshot,
    registry: &ViewTypeRegistry,
) -> Result<Arc<AddressSpace>> {
    let Snapshot {
        view_type,
        architecture,
        config,
        segments,
        sections,
        metadata,
        user_functions,
        entry_points,
        contents,
        modifications,
        ..
    } = snapshot;

    let architecture = architecture.and_then(|name| {
        let found = ArchitectureRegistry::init().get(&name);
        if found.is_none() {
            warn!(architecture = %name, "saved architecture is not available");
        }
        found
    });

    let mut builder = AddressSpace::builder()
        .storage(BufferAccessor::new(contents))
        .modifications(PatchLog::from_runs(modifications))
        .backend(RawBackend)
        .config(config);
    if let Some(arch) = architecture {
        builder = builder.architecture(arch);
    }
    let data = builder.build()?;

    let view = if view_type == data.view_type() {
        data
    } else if registry.get(&view_type).is_some() {
        registry.create(&view_type, &data)?
    } else {
        warn!(view = %view_type, "view type not registered, using a mapped view");
        AddressSpace::derive(&data, SegmentBackend::named(view_type))?
    };

    let mut map = SegmentMap::new();
    for segment in segments {
        map.restore_segment(segment)?;
    }
    for section in sections {
        map.add_section(section);
    }
    *view.map.write() = map;
    *view.metadata.write() = metadata;

    let has_functions = {
        let mut store = view.functions.write();
        for start in user_functions {
            store.insert(start, false);
        }
        for entry in &entry_points {
            store.insert(*entry, true);
        }
        store.entry_points = entry_points;
        !store.functions.is_empty()
    };
    if has_functions && view.config().analysis.auto_schedule {
        view.update_analysis();
    }
    Ok(view)
}
