//! The address space root.
//!
//! An `AddressSpace` owns the segment map, the metadata store, the function
//! store, the change notifier, the undo log and the analysis scheduler for
//! one view over a storage accessor. It is always held in an `Arc`.
//!
//! Locking: every mutation holds the reentrant `mutation` lock from the
//! moment it touches state until its events have been delivered, so one
//! mutation's storage update never interleaves with another's
//! notification. Data locks (`map`, `metadata`, `functions`, `storage`)
//! are only held for the state change itself and always released before
//! observers run. Observers may therefore call back into the space,
//! including mutators, on the notifying thread.

pub mod backend;
pub mod map;
pub mod registry;
pub mod undo;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::path::Path;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisPass, AnalysisScheduler, FunctionStore, SpaceAnalysisPass};
use crate::config::SpaceConfig;
use crate::core::{
    AddressRange, Endianness, Section, SectionSemantics, Segment, SegmentFlags, SegmentId,
};
use crate::disasm::Architecture;
use crate::entropy::normalized_entropy;
use crate::error::{Result, VspaceError};
use crate::metadata::MetadataStore;
use crate::notify::{ChangeEvent, ChangeNotifier, Observer, ObserverId};
use crate::storage::{ModificationStatus, PatchLog, StorageAccessor, TrackedStorage};

pub use backend::{
    AddressSpaceBackend, BackendContext, BackendContextMut, RawBackend, SegmentBackend,
};
pub use map::SegmentMap;
pub use registry::{MappedViewType, RawViewType, ViewType, ViewTypeRegistry};
pub use undo::{UndoAction, UndoEntry, UndoLog};

#[derive(Default)]
struct SymbolBulk {
    depth: usize,
    deferred: Vec<ChangeEvent>,
}

pub struct AddressSpace {
    parent: Option<Arc<AddressSpace>>,
    pub(crate) storage: Arc<RwLock<TrackedStorage>>,
    pub(crate) backend: Box<dyn AddressSpaceBackend>,
    pub(crate) map: RwLock<SegmentMap>,
    pub(crate) metadata: RwLock<MetadataStore>,
    pub(crate) functions: RwLock<FunctionStore>,
    notifier: ChangeNotifier,
    pub(crate) mutation: ReentrantMutex<()>,
    pub(crate) undo: Mutex<UndoLog>,
    pub(crate) scheduler: AnalysisScheduler,
    architecture: RwLock<Option<Arc<dyn Architecture>>>,
    config: SpaceConfig,
    symbol_bulk: Mutex<SymbolBulk>,
}

/// Builder for `AddressSpace`
#[derive(Default)]
pub struct AddressSpaceBuilder {
    storage: Option<Box<dyn StorageAccessor>>,
    modifications: Option<PatchLog>,
    backend: Option<Box<dyn AddressSpaceBackend>>,
    architecture: Option<Arc<dyn Architecture>>,
    config: Option<SpaceConfig>,
    parent: Option<Arc<AddressSpace>>,
}

impl AddressSpaceBuilder {
    pub fn storage<S: StorageAccessor + 'static>(mut self, storage: S) -> Self {
        self.storage = Some(Box::new(storage));
        self
    }

    pub fn storage_boxed(mut self, storage: Box<dyn StorageAccessor>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Start from an existing modification log (snapshot restore).
    pub fn modifications(mut self, log: PatchLog) -> Self {
        self.modifications = Some(log);
        self
    }

    pub fn backend<B: AddressSpaceBackend + 'static>(mut self, backend: B) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn backend_boxed(mut self, backend: Box<dyn AddressSpaceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn architecture(mut self, architecture: Arc<dyn Architecture>) -> Self {
        self.architecture = Some(architecture);
        self
    }

    pub fn config(mut self, config: SpaceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Derive from `parent`; without explicit storage the parent's bytes are shared.
    pub fn parent(mut self, parent: Arc<AddressSpace>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn build(self) -> Result<Arc<AddressSpace>> {
        let config = match (self.config, &self.parent) {
            (Some(config), _) => config,
            (None, Some(parent)) => parent.config.clone(),
            (None, None) => SpaceConfig::default(),
        };
        config.validate()?;

        let storage = match (self.storage, &self.parent) {
            (Some(accessor), _) => {
                let tracked = match self.modifications {
                    Some(log) => TrackedStorage::with_log(accessor, log),
                    None => TrackedStorage::new(accessor),
                };
                Arc::new(RwLock::new(tracked))
            }
            (None, Some(parent)) => parent.storage.clone(),
            (None, None) => {
                return Err(VspaceError::InvalidArgument(
                    "address space needs storage or a parent".into(),
                ))
            }
        };

        let architecture = self
            .architecture
            .or_else(|| self.parent.as_ref().and_then(|p| p.architecture()));
        let backend = self
            .backend
            .unwrap_or_else(|| Box::new(SegmentBackend::new()));
        let workers = config.analysis.worker_threads;
        let parent = self.parent;

        let space = Arc::new_cyclic(|weak: &Weak<AddressSpace>| {
            let pass: Arc<dyn AnalysisPass> = Arc::new(SpaceAnalysisPass::new(weak.clone()));
            AddressSpace {
                parent,
                storage,
                backend,
                map: RwLock::new(SegmentMap::new()),
                metadata: RwLock::new(MetadataStore::new()),
                functions: RwLock::new(FunctionStore::new()),
                notifier: ChangeNotifier::new(),
                mutation: ReentrantMutex::new(()),
                undo: Mutex::new(UndoLog::new()),
                scheduler: AnalysisScheduler::new(pass, workers),
                architecture: RwLock::new(architecture),
                config,
                symbol_bulk: Mutex::new(SymbolBulk::default()),
            }
        });
        debug!(view = space.view_type(), "address space created");
        Ok(space)
    }
}

impl AddressSpace {
    pub fn builder() -> AddressSpaceBuilder {
        AddressSpaceBuilder::default()
    }

    /// New space over `parent`'s storage with a different backend.
    pub fn derive<B: AddressSpaceBackend + 'static>(
        parent: &Arc<AddressSpace>,
        backend: B,
    ) -> Result<Arc<AddressSpace>> {
        AddressSpace::builder()
            .parent(parent.clone())
            .backend(backend)
            .build()
    }

    pub fn view_type(&self) -> &str {
        self.backend.name()
    }

    pub fn parent(&self) -> Option<&Arc<AddressSpace>> {
        self.parent.as_ref()
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    pub fn architecture(&self) -> Option<Arc<dyn Architecture>> {
        self.architecture.read().clone()
    }

    pub fn set_architecture(&self, architecture: Option<Arc<dyn Architecture>>) {
        *self.architecture.write() = architecture;
    }

    /// The default architecture, or `MissingArchitecture`.
    pub fn require_architecture(&self) -> Result<Arc<dyn Architecture>> {
        self.architecture().ok_or(VspaceError::MissingArchitecture)
    }

    pub(crate) fn with_ctx<R>(&self, f: impl FnOnce(&BackendContext<'_>) -> R) -> R {
        let map = self.map.read();
        let storage = self.storage.read();
        f(&BackendContext {
            map: &map,
            storage: &storage,
        })
    }

    fn with_ctx_mut<R>(&self, f: impl FnOnce(&mut BackendContextMut<'_>) -> R) -> R {
        let map = self.map.read();
        let mut storage = self.storage.write();
        f(&mut BackendContextMut {
            map: &map,
            storage: &mut storage,
        })
    }

    // notification

    pub fn register_observer(&self, observer: Arc<dyn Observer>) -> ObserverId {
        self.notifier.register(observer)
    }

    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.notifier.unregister(id)
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Deliver events from a user or API mutation; structural events arm the scheduler.
    pub(crate) fn emit(&self, events: Vec<ChangeEvent>) {
        self.deliver(events, true);
    }

    /// Deliver events produced by the analysis pass itself.
    pub(crate) fn emit_analysis(&self, events: Vec<ChangeEvent>) {
        self.deliver(events, false);
    }

    fn deliver(&self, events: Vec<ChangeEvent>, schedule: bool) {
        let mut wake = false;
        for event in events {
            wake |= schedule && event.is_structural();
            if self.defer_symbol_event(&event) {
                continue;
            }
            self.notifier.notify(self, &event);
        }
        if wake && self.config.analysis.auto_schedule {
            self.scheduler.schedule();
        }
    }

    fn defer_symbol_event(&self, event: &ChangeEvent) -> bool {
        if !matches!(
            event,
            ChangeEvent::SymbolAdded(_) | ChangeEvent::SymbolUpdated(_) | ChangeEvent::SymbolRemoved(_)
        ) {
            return false;
        }
        let mut bulk = self.symbol_bulk.lock();
        if bulk.depth == 0 {
            return false;
        }
        bulk.deferred.push(event.clone());
        true
    }

    /// Hold symbol events until the matching `end_bulk_modify_symbols`.
    pub fn begin_bulk_modify_symbols(&self) {
        self.symbol_bulk.lock().depth += 1;
    }

    /// Deliver the held symbol events in order once the outermost bulk block ends.
    pub fn end_bulk_modify_symbols(&self) {
        let _guard = self.mutation.lock();
        let deferred = {
            let mut bulk = self.symbol_bulk.lock();
            if bulk.depth == 0 {
                return;
            }
            bulk.depth -= 1;
            if bulk.depth > 0 {
                return;
            }
            std::mem::take(&mut bulk.deferred)
        };
        debug!(events = deferred.len(), "flushing bulk symbol events");
        for event in deferred {
            self.notifier.notify(self, &event);
        }
    }

    pub(crate) fn record_undo(&self, action: UndoAction) {
        self.undo.lock().record(action);
    }

    // bytes

    /// Contiguous mapped prefix of `[addr, addr + len)`; empty when unmapped.
    pub fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        self.with_ctx(|ctx| self.backend.perform_read(ctx, addr, len))
    }

    /// Write `data`; a short count means a boundary or permission stop.
    pub fn write(&self, addr: u64, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let _guard = self.mutation.lock();
        let before = self.read(addr, data.len());
        let written = self.with_ctx_mut(|ctx| self.backend.perform_write(ctx, addr, data));
        if written == 0 {
            return 0;
        }
        self.record_undo(UndoAction::WriteBytes {
            address: addr,
            before: before[..written.min(before.len())].to_vec(),
            after: data[..written].to_vec(),
        });
        self.emit(vec![ChangeEvent::DataWritten {
            offset: addr,
            len: written as u64,
        }]);
        written
    }

    /// Insert bytes, shifting later addresses. 0 when the backend has a fixed layout.
    pub fn insert(&self, addr: u64, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let _guard = self.mutation.lock();
        let inserted = self.with_ctx_mut(|ctx| self.backend.perform_insert(ctx, addr, data));
        if inserted == 0 {
            return 0;
        }
        self.record_undo(UndoAction::InsertBytes {
            address: addr,
            data: data[..inserted].to_vec(),
        });
        self.emit(vec![ChangeEvent::DataInserted {
            offset: addr,
            len: inserted as u64,
        }]);
        inserted
    }

    /// Remove bytes, shifting later addresses. 0 when the backend has a fixed layout.
    pub fn remove(&self, addr: u64, len: u64) -> u64 {
        if len == 0 {
            return 0;
        }
        let _guard = self.mutation.lock();
        let old = self.read(addr, len as usize);
        let removed = self.with_ctx_mut(|ctx| self.backend.perform_remove(ctx, addr, len));
        if removed == 0 {
            return 0;
        }
        self.record_undo(UndoAction::RemoveBytes {
            address: addr,
            data: old[..(removed as usize).min(old.len())].to_vec(),
        });
        self.emit(vec![ChangeEvent::DataRemoved {
            offset: addr,
            len: removed,
        }]);
        removed
    }

    /// `None` outside every segment and in zero-filled tails.
    pub fn get_modification(&self, addr: u64) -> Option<ModificationStatus> {
        self.with_ctx(|ctx| self.backend.perform_get_modification(ctx, addr))
    }

    /// Statuses for the contiguous tracked prefix of `[addr, addr + len)`.
    pub fn get_modification_range(&self, addr: u64, len: usize) -> Vec<ModificationStatus> {
        self.with_ctx(|ctx| {
            let mut out = Vec::with_capacity(len.min(1 << 16));
            for i in 0..len as u64 {
                match addr
                    .checked_add(i)
                    .and_then(|a| self.backend.perform_get_modification(ctx, a))
                {
                    Some(status) => out.push(status),
                    None => break,
                }
            }
            out
        })
    }

    /// True once any byte of the shared storage has been changed or inserted.
    pub fn is_modified(&self) -> bool {
        self.storage.read().log().is_modified()
    }

    pub(crate) fn storage_len(&self) -> u64 {
        self.storage.read().len()
    }

    pub(crate) fn modification_runs(&self) -> Vec<(u64, u64, ModificationStatus)> {
        self.storage.read().log().runs()
    }

    // validity

    pub fn is_valid_offset(&self, addr: u64) -> bool {
        self.with_ctx(|ctx| self.backend.perform_is_valid_offset(ctx, addr))
    }

    pub fn is_offset_readable(&self, addr: u64) -> bool {
        self.with_ctx(|ctx| self.backend.perform_is_offset_readable(ctx, addr))
    }

    pub fn is_offset_writable(&self, addr: u64) -> bool {
        self.with_ctx(|ctx| self.backend.perform_is_offset_writable(ctx, addr))
    }

    pub fn is_offset_executable(&self, addr: u64) -> bool {
        self.with_ctx(|ctx| self.backend.perform_is_offset_executable(ctx, addr))
    }

    pub fn is_offset_backed_by_file(&self, addr: u64) -> bool {
        self.with_ctx(|ctx| self.backend.perform_is_offset_backed_by_file(ctx, addr))
    }

    /// Code by section semantics; falls back to segment permissions outside sections.
    pub fn is_offset_code_semantics(&self, addr: u64) -> bool {
        let sections = self.get_sections_at(addr);
        if sections.is_empty() {
            return self.is_offset_executable(addr);
        }
        sections
            .iter()
            .any(|s| s.semantics == SectionSemantics::ReadOnlyCode)
    }

    pub fn is_offset_extern_semantics(&self, addr: u64) -> bool {
        self.get_sections_at(addr)
            .iter()
            .any(|s| s.semantics == SectionSemantics::External)
    }

    /// Writable segment not covered by a read-only section.
    pub fn is_offset_writable_semantics(&self, addr: u64) -> bool {
        if !self.is_offset_writable(addr) {
            return false;
        }
        !self.get_sections_at(addr).iter().any(|s| {
            matches!(
                s.semantics,
                SectionSemantics::ReadOnlyCode | SectionSemantics::ReadOnlyData
            )
        })
    }

    /// Smallest valid address `>= addr`, or `end()` if there is none.
    pub fn get_next_valid_offset(&self, addr: u64) -> u64 {
        self.with_ctx(|ctx| self.backend.perform_get_next_valid_offset(ctx, addr))
    }

    pub fn start(&self) -> u64 {
        self.with_ctx(|ctx| self.backend.perform_get_start(ctx))
    }

    pub fn end(&self) -> u64 {
        self.with_ctx(|ctx| {
            self.backend.perform_get_start(ctx) + self.backend.perform_get_length(ctx)
        })
    }

    pub fn len(&self) -> u64 {
        self.with_ctx(|ctx| self.backend.perform_get_length(ctx))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_executable(&self) -> bool {
        self.backend.perform_is_executable()
    }

    pub fn is_relocatable(&self) -> bool {
        self.backend.perform_is_relocatable()
    }

    /// Architecture pointer size, else the backend's.
    pub fn address_size(&self) -> usize {
        self.architecture()
            .map(|a| a.address_size())
            .unwrap_or_else(|| self.backend.perform_get_address_size())
    }

    pub fn default_endianness(&self) -> Endianness {
        self.architecture()
            .map(|a| a.endianness())
            .unwrap_or_else(|| self.backend.perform_get_default_endianness())
    }

    // typed reads

    /// Read a 1..=8 byte integer. `None` when any byte is unmapped.
    pub fn read_int(&self, addr: u64, size: usize, signed: bool, endian: Endianness) -> Option<i128> {
        if size == 0 || size > 8 {
            return None;
        }
        let bytes = self.read(addr, size);
        if bytes.len() < size {
            return None;
        }
        let raw = endian.read_uint(&bytes);
        if signed {
            let shift = 64 - (size as u32) * 8;
            Some((((raw << shift) as i64) >> shift) as i128)
        } else {
            Some(raw as i128)
        }
    }

    /// Pointer-sized read in the default byte order.
    pub fn read_pointer(&self, addr: u64) -> Option<u64> {
        let size = self.address_size();
        self.read_int(addr, size, false, self.default_endianness())
            .map(|v| v as u64)
    }

    /// Normalized Shannon entropy per block; stops at the first unreadable block.
    pub fn get_entropy(&self, addr: u64, len: u64, block_size: usize) -> Vec<f32> {
        let block = if block_size == 0 {
            self.config.entropy.default_block_size
        } else {
            block_size
        } as u64;
        let end = addr.saturating_add(len);
        let mut out = Vec::new();
        let mut cur = addr;
        while cur < end {
            let n = block.min(end - cur);
            let data = self.read(cur, n as usize);
            if data.is_empty() {
                break;
            }
            out.push(normalized_entropy(&data));
            cur += n;
        }
        out
    }

    // segments

    pub fn add_auto_segment(
        &self,
        start: u64,
        length: u64,
        data_offset: u64,
        data_length: u64,
        flags: SegmentFlags,
    ) -> Result<SegmentId> {
        self.add_segment(Segment::new(start, length, data_offset, data_length, flags, true)?)
    }

    pub fn add_user_segment(
        &self,
        start: u64,
        length: u64,
        data_offset: u64,
        data_length: u64,
        flags: SegmentFlags,
    ) -> Result<SegmentId> {
        self.add_segment(Segment::new(start, length, data_offset, data_length, flags, false)?)
    }

    /// Insert a prepared segment; overlap with the same provenance fails.
    pub fn add_segment(&self, segment: Segment) -> Result<SegmentId> {
        let _guard = self.mutation.lock();
        let (id, stored) = {
            let mut map = self.map.write();
            let id = map.add_segment(segment)?;
            (id, map.segment_by_id(id).cloned())
        };
        if let Some(seg) = stored {
            debug!(segment = %seg, auto = seg.auto_defined, "segment added");
            if !seg.auto_defined {
                self.record_undo(UndoAction::Segment {
                    start: seg.start(),
                    before: None,
                    after: Some(seg.clone()),
                });
            }
            self.emit(vec![ChangeEvent::SegmentAdded(seg)]);
        }
        Ok(id)
    }

    pub fn remove_auto_segment(&self, start: u64) -> bool {
        self.remove_segment(start, true)
    }

    pub fn remove_user_segment(&self, start: u64) -> bool {
        self.remove_segment(start, false)
    }

    fn remove_segment(&self, start: u64, auto: bool) -> bool {
        let _guard = self.mutation.lock();
        let removed = self.map.write().remove_segment(start, auto);
        match removed {
            Some(seg) => {
                if !auto {
                    self.record_undo(UndoAction::Segment {
                        start,
                        before: Some(seg.clone()),
                        after: None,
                    });
                }
                self.emit(vec![ChangeEvent::SegmentRemoved(seg)]);
                true
            }
            None => false,
        }
    }

    fn restore_user_segment(&self, start: u64, state: Option<Segment>) {
        let _guard = self.mutation.lock();
        let mut events = Vec::new();
        {
            let mut map = self.map.write();
            if let Some(old) = map.remove_segment(start, false) {
                events.push(ChangeEvent::SegmentRemoved(old));
            }
            if let Some(seg) = state {
                match map.restore_segment(seg.clone()) {
                    Ok(()) => events.push(ChangeEvent::SegmentAdded(seg)),
                    Err(e) => warn!(error = %e, "segment restore failed"),
                }
            }
        }
        self.emit(events);
    }

    /// Effective segment at `addr` (user before auto).
    pub fn get_segment_at(&self, addr: u64) -> Option<Segment> {
        self.map.read().segment_at(addr).cloned()
    }

    pub fn get_segment_by_id(&self, id: SegmentId) -> Option<Segment> {
        self.map.read().segment_by_id(id).cloned()
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.map.read().segments()
    }

    pub fn get_address_for_data_offset(&self, offset: u64) -> Option<u64> {
        self.map.read().address_for_data_offset(offset)
    }

    /// Start of the next non-empty segment strictly after `addr`.
    pub fn get_next_segment_start_after(&self, addr: u64) -> Option<u64> {
        self.map.read().next_segment_start_after(addr)
    }

    // sections

    pub fn add_auto_section(&self, mut section: Section) {
        section.auto_defined = true;
        self.add_section(section);
    }

    pub fn add_user_section(&self, mut section: Section) {
        section.auto_defined = false;
        self.add_section(section);
    }

    fn add_section(&self, section: Section) {
        let _guard = self.mutation.lock();
        let replaced = self.map.write().add_section(section.clone());
        if !section.auto_defined {
            self.record_undo(UndoAction::Section {
                name: section.name.clone(),
                before: replaced.clone(),
                after: Some(section.clone()),
            });
        }
        let mut events = Vec::with_capacity(2);
        if let Some(old) = replaced {
            events.push(ChangeEvent::SectionRemoved(old));
        }
        events.push(ChangeEvent::SectionAdded(section));
        self.emit(events);
    }

    pub fn remove_auto_section(&self, name: &str) -> bool {
        self.remove_section(name, true)
    }

    pub fn remove_user_section(&self, name: &str) -> bool {
        self.remove_section(name, false)
    }

    fn remove_section(&self, name: &str, auto: bool) -> bool {
        let _guard = self.mutation.lock();
        let removed = self.map.write().remove_section(name, auto);
        match removed {
            Some(section) => {
                if !auto {
                    self.record_undo(UndoAction::Section {
                        name: name.to_string(),
                        before: Some(section.clone()),
                        after: None,
                    });
                }
                self.emit(vec![ChangeEvent::SectionRemoved(section)]);
                true
            }
            None => false,
        }
    }

    fn restore_user_section(&self, name: &str, state: Option<Section>) {
        let _guard = self.mutation.lock();
        let mut events = Vec::new();
        {
            let mut map = self.map.write();
            if let Some(old) = map.remove_section(name, false) {
                events.push(ChangeEvent::SectionRemoved(old));
            }
            if let Some(section) = state {
                map.add_section(section.clone());
                events.push(ChangeEvent::SectionAdded(section));
            }
        }
        self.emit(events);
    }

    pub fn get_section_by_name(&self, name: &str) -> Option<Section> {
        self.map.read().section_by_name(name).cloned()
    }

    pub fn get_sections_at(&self, addr: u64) -> Vec<Section> {
        self.map.read().sections_at(addr)
    }

    pub fn sections(&self) -> Vec<Section> {
        self.map.read().sections()
    }

    pub fn get_unique_section_names(&self) -> Vec<String> {
        self.map.read().unique_section_names()
    }

    // relocations

    /// Record a relocated range inside the segment that contains its start.
    pub fn define_relocation(&self, range: AddressRange) -> bool {
        let _guard = self.mutation.lock();
        self.map.write().add_relocation(range)
    }

    pub fn get_relocation_ranges(&self) -> Vec<AddressRange> {
        self.map.read().relocation_ranges()
    }

    pub fn get_relocation_ranges_at(&self, addr: u64) -> Vec<AddressRange> {
        self.get_relocation_ranges()
            .into_iter()
            .filter(|r| r.contains(addr))
            .collect()
    }

    pub fn range_contains_relocation(&self, addr: u64, len: u64) -> bool {
        let query = AddressRange::from_len(addr, len.max(1));
        self.get_relocation_ranges().iter().any(|r| r.overlaps(&query))
    }

    // comments

    /// Set the comment at `addr`; an empty comment removes it.
    pub fn set_comment_at(&self, addr: u64, comment: &str) {
        let _guard = self.mutation.lock();
        let before = {
            let mut md = self.metadata.write();
            if comment.is_empty() {
                md.comments.remove(&addr)
            } else {
                md.comments.insert(addr, comment.to_string())
            }
        };
        let after = (!comment.is_empty()).then(|| comment.to_string());
        if before == after {
            return;
        }
        self.record_undo(UndoAction::Comment {
            address: addr,
            before,
            after,
        });
        self.emit(vec![ChangeEvent::DataMetadataUpdated { offset: addr }]);
    }

    pub fn get_comment_at(&self, addr: u64) -> Option<String> {
        self.metadata.read().comments.get(&addr).cloned()
    }

    pub fn address_comments(&self) -> Vec<(u64, String)> {
        self.metadata
            .read()
            .comments
            .iter()
            .map(|(a, c)| (*a, c.clone()))
            .collect()
    }

    // key/value metadata

    /// Store a JSON value under `key`; user values are undoable.
    pub fn store_metadata(&self, key: &str, value: serde_json::Value, auto: bool) {
        let _guard = self.mutation.lock();
        let before = self
            .metadata
            .write()
            .kv
            .insert(key.to_string(), (value.clone(), auto));
        if before.as_ref().map(|(v, _)| v) == Some(&value) && before.as_ref().map(|(_, a)| *a) == Some(auto) {
            return;
        }
        if !auto {
            self.record_undo(UndoAction::Metadata {
                key: key.to_string(),
                before: before.map(|(v, _)| v),
                after: Some(value),
            });
        }
        self.emit(vec![ChangeEvent::MetadataUpdated {
            key: key.to_string(),
        }]);
    }

    pub fn query_metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.metadata.read().kv.get(key).map(|(v, _)| v.clone())
    }

    pub fn metadata_keys(&self) -> Vec<String> {
        self.metadata.read().kv.keys().cloned().collect()
    }

    pub fn remove_metadata(&self, key: &str) -> bool {
        let _guard = self.mutation.lock();
        let removed = self.metadata.write().kv.remove(key);
        match removed {
            Some((value, auto)) => {
                if !auto {
                    self.record_undo(UndoAction::Metadata {
                        key: key.to_string(),
                        before: Some(value),
                        after: None,
                    });
                }
                self.emit(vec![ChangeEvent::MetadataUpdated {
                    key: key.to_string(),
                }]);
                true
            }
            None => false,
        }
    }

    fn restore_metadata(&self, key: &str, state: Option<serde_json::Value>) {
        match state {
            Some(value) => self.store_metadata(key, value, false),
            None => {
                self.remove_metadata(key);
            }
        }
    }

    // undo

    pub fn begin_undo_actions(&self) {
        self.undo.lock().begin();
    }

    /// Close the current group; returns the new entry id when one was committed.
    pub fn commit_undo_actions(&self) -> Option<Uuid> {
        self.undo.lock().commit()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.lock().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.lock().can_redo()
    }

    pub fn get_undo_entries(&self) -> Vec<UndoEntry> {
        self.undo.lock().entries()
    }

    pub fn clear_undo_entries(&self) {
        self.undo.lock().clear();
    }

    /// Revert the most recent committed entry.
    pub fn undo(&self) -> bool {
        let _guard = self.mutation.lock();
        let entry = {
            let mut log = self.undo.lock();
            if log.in_group() {
                warn!("undo requested while an undo group is open");
                return false;
            }
            let Some(entry) = log.pop_undo() else {
                return false;
            };
            log.set_replaying(true);
            entry
        };
        for action in entry.actions.iter().rev() {
            self.apply_undo_action(action, false);
        }
        info!(entry = %entry.id, actions = entry.actions.len(), "undo");
        let mut log = self.undo.lock();
        log.set_replaying(false);
        log.push_redo(entry);
        true
    }

    /// Re-apply the most recently undone entry.
    pub fn redo(&self) -> bool {
        let _guard = self.mutation.lock();
        let entry = {
            let mut log = self.undo.lock();
            if log.in_group() {
                warn!("redo requested while an undo group is open");
                return false;
            }
            let Some(entry) = log.pop_redo() else {
                return false;
            };
            log.set_replaying(true);
            entry
        };
        for action in &entry.actions {
            self.apply_undo_action(action, true);
        }
        info!(entry = %entry.id, actions = entry.actions.len(), "redo");
        let mut log = self.undo.lock();
        log.set_replaying(false);
        log.push_undo(entry);
        true
    }

    fn apply_undo_action(&self, action: &UndoAction, forward: bool) {
        fn pick<T: Clone>(forward: bool, before: &T, after: &T) -> T {
            if forward {
                after.clone()
            } else {
                before.clone()
            }
        }
        match action {
            UndoAction::WriteBytes {
                address,
                before,
                after,
            } => {
                self.write(*address, &pick(forward, before, after));
            }
            UndoAction::InsertBytes { address, data } => {
                if forward {
                    self.insert(*address, data);
                } else {
                    self.remove(*address, data.len() as u64);
                }
            }
            UndoAction::RemoveBytes { address, data } => {
                if forward {
                    self.remove(*address, data.len() as u64);
                } else {
                    self.insert(*address, data);
                }
            }
            UndoAction::Segment {
                start,
                before,
                after,
            } => self.restore_user_segment(*start, pick(forward, before, after)),
            UndoAction::Section {
                name,
                before,
                after,
            } => self.restore_user_section(name, pick(forward, before, after)),
            UndoAction::DataVar {
                address,
                before,
                after,
            } => self.restore_data_var(*address, pick(forward, before, after)),
            UndoAction::Symbol {
                address,
                namespace,
                before,
                after,
            } => self.restore_symbol(*address, namespace, pick(forward, before, after)),
            UndoAction::Type {
                name,
                before,
                after,
            } => self.restore_type(name, pick(forward, before, after)),
            UndoAction::Comment {
                address,
                before,
                after,
            } => {
                let state = pick(forward, before, after);
                self.set_comment_at(*address, state.as_deref().unwrap_or(""));
            }
            UndoAction::Metadata { key, before, after } => {
                self.restore_metadata(key, pick(forward, before, after))
            }
            UndoAction::UserFunction {
                address,
                before,
                after,
            } => {
                if pick(forward, before, after) {
                    self.create_user_function(*address);
                } else {
                    self.remove_user_function(*address);
                }
            }
            UndoAction::TagRef {
                address,
                tag,
                before,
                after,
            } => self.restore_tag_ref(*address, *tag, pick(forward, before, after)),
            UndoAction::DataRef {
                from,
                to,
                before,
                after,
            } => {
                if pick(forward, before, after) {
                    self.add_user_data_ref(*from, *to);
                } else {
                    self.remove_user_data_ref(*from, *to);
                }
            }
        }
    }

    // persistence of raw contents

    /// Write the current storage contents to `path` through the backend.
    pub fn save(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match self.with_ctx(|ctx| self.backend.perform_save(ctx, path)) {
            Ok(()) => {
                info!(path = %path.display(), "saved contents");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "save failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("view_type", &self.view_type())
            .field("segments", &self.map.read().segment_count())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
