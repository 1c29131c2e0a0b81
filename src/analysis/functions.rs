//! Function store and the function-level API of `AddressSpace`.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::core::{AddressRange, BasicBlock, Function, SymbolKind};
use crate::notify::ChangeEvent;
use crate::space::{AddressSpace, UndoAction};

/// Functions keyed by start address plus the analysis work queue.
#[derive(Debug, Default)]
pub struct FunctionStore {
    pub(crate) functions: BTreeMap<u64, Function>,
    /// Functions waiting for (re)disassembly
    pub(crate) queue: BTreeSet<u64>,
    pub(crate) entry_points: Vec<u64>,
}

impl FunctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn take_queue(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.queue).into_iter().collect()
    }

    pub(crate) fn insert(&mut self, start: u64, auto: bool) -> bool {
        if self.functions.contains_key(&start) {
            return false;
        }
        self.functions.insert(start, Function::new(start, auto));
        self.queue.insert(start);
        true
    }
}

impl AddressSpace {
    /// Add an auto function at `addr`; false when one exists or `addr` is unmapped.
    pub fn add_function(&self, addr: u64) -> bool {
        let _guard = self.mutation.lock();
        if !self.is_valid_offset(addr) {
            debug!(addr = format_args!("{:#x}", addr), "function start not mapped");
            return false;
        }
        if !self.functions.write().insert(addr, true) {
            return false;
        }
        self.scheduler.note_submit(addr);
        self.emit(vec![ChangeEvent::FunctionAdded { start: addr }]);
        true
    }

    /// Callee discovered by analysis; never schedules a new run by itself.
    pub(crate) fn add_analysis_function(&self, addr: u64) -> bool {
        let _guard = self.mutation.lock();
        if !self.is_valid_offset(addr) || !self.functions.write().insert(addr, true) {
            return false;
        }
        self.scheduler.note_submit(addr);
        self.emit_analysis(vec![ChangeEvent::FunctionAdded { start: addr }]);
        true
    }

    /// Add a user function, or promote an existing auto function to user.
    pub fn create_user_function(&self, addr: u64) -> bool {
        let _guard = self.mutation.lock();
        if !self.is_valid_offset(addr) {
            return false;
        }
        let event = {
            let mut store = self.functions.write();
            match store.functions.get_mut(&addr) {
                Some(f) if !f.auto_defined => return false,
                Some(f) => {
                    f.auto_defined = false;
                    ChangeEvent::FunctionUpdated { start: addr }
                }
                None => {
                    store.insert(addr, false);
                    ChangeEvent::FunctionAdded { start: addr }
                }
            }
        };
        self.record_undo(UndoAction::UserFunction {
            address: addr,
            before: false,
            after: true,
        });
        self.scheduler.note_submit(addr);
        self.emit(vec![event]);
        true
    }

    /// Remove an auto function; user functions are left alone.
    pub fn remove_function(&self, addr: u64) -> bool {
        self.remove_function_with(addr, true)
    }

    pub fn remove_user_function(&self, addr: u64) -> bool {
        self.remove_function_with(addr, false)
    }

    fn remove_function_with(&self, addr: u64, auto: bool) -> bool {
        let _guard = self.mutation.lock();
        let removed = {
            let mut store = self.functions.write();
            match store.functions.get(&addr) {
                Some(f) if f.auto_defined == auto => {
                    store.queue.remove(&addr);
                    store.functions.remove(&addr)
                }
                _ => None,
            }
        };
        let Some(function) = removed else {
            return false;
        };
        let ranges: Vec<AddressRange> = function.basic_blocks.iter().map(|b| b.range()).collect();
        self.replace_auto_xrefs(&ranges, Vec::new());
        if !auto {
            self.record_undo(UndoAction::UserFunction {
                address: addr,
                before: true,
                after: false,
            });
        }
        self.emit(vec![ChangeEvent::FunctionRemoved { start: addr }]);
        true
    }

    /// Record an entry point and make sure a function exists there.
    pub fn add_entry_point(&self, addr: u64) {
        let _guard = self.mutation.lock();
        {
            let mut store = self.functions.write();
            if !store.entry_points.contains(&addr) {
                store.entry_points.push(addr);
            }
        }
        self.add_function(addr);
    }

    /// First registered entry point.
    pub fn entry_point(&self) -> Option<u64> {
        self.functions.read().entry_points.first().copied()
    }

    pub fn entry_points(&self) -> Vec<u64> {
        self.functions.read().entry_points.clone()
    }

    pub fn entry_function(&self) -> Option<Function> {
        self.entry_point().and_then(|addr| self.get_function_at(addr))
    }

    fn named(&self, mut function: Function) -> Function {
        let symbol = self.get_symbol_at(function.start, None).filter(|s| {
            matches!(
                s.kind,
                SymbolKind::Function | SymbolKind::LibraryFunction | SymbolKind::ImportedFunction
            )
        });
        if let Some(symbol) = symbol {
            function.name = symbol.full_name;
        }
        function
    }

    /// Function starting exactly at `addr`.
    pub fn get_function_at(&self, addr: u64) -> Option<Function> {
        let function = self.functions.read().functions.get(&addr).cloned();
        function.map(|f| self.named(f))
    }

    /// Every function with a basic block covering `addr`.
    pub fn get_functions_containing(&self, addr: u64) -> Vec<Function> {
        let found: Vec<Function> = self
            .functions
            .read()
            .functions
            .values()
            .filter(|f| f.contains(addr))
            .cloned()
            .collect();
        found.into_iter().map(|f| self.named(f)).collect()
    }

    pub fn functions(&self) -> Vec<Function> {
        let all: Vec<Function> = self.functions.read().functions.values().cloned().collect();
        all.into_iter().map(|f| self.named(f)).collect()
    }

    pub fn has_functions(&self) -> bool {
        !self.functions.read().functions.is_empty()
    }

    /// Blocks covering `addr`, one per containing function.
    pub fn get_basic_blocks_at(&self, addr: u64) -> Vec<BasicBlock> {
        self.functions
            .read()
            .functions
            .values()
            .filter_map(|f| f.block_containing(addr).cloned())
            .collect()
    }

    /// First block covering `addr` with the start of its function.
    pub(crate) fn block_with_function_at(&self, addr: u64) -> Option<(u64, BasicBlock)> {
        self.functions
            .read()
            .functions
            .values()
            .find_map(|f| f.block_containing(addr).map(|b| (f.start, b.clone())))
    }

    /// Lowest block start strictly above `addr`.
    pub(crate) fn next_block_start_after(&self, addr: u64) -> Option<u64> {
        self.functions
            .read()
            .functions
            .values()
            .flat_map(|f| f.basic_blocks.iter().map(|b| b.start))
            .filter(|&s| s > addr)
            .min()
    }

    pub fn get_basic_blocks_starting_at(&self, addr: u64) -> Vec<BasicBlock> {
        self.functions
            .read()
            .functions
            .values()
            .flat_map(|f| f.basic_blocks.iter().filter(|b| b.start == addr).cloned())
            .collect()
    }

    /// Queue every function for another pass and start analysis.
    pub fn reanalyze(&self) {
        let starts: Vec<u64> = {
            let mut store = self.functions.write();
            let starts: Vec<u64> = store.functions.keys().copied().collect();
            store.queue.extend(starts.iter().copied());
            starts
        };
        for start in &starts {
            self.scheduler.note_submit(*start);
        }
        debug!(functions = starts.len(), "reanalysis requested");
        self.update_analysis();
    }

    /// Queue one function for another pass; false when there is none at `addr`.
    pub fn reanalyze_function(&self, addr: u64) -> bool {
        let _guard = self.mutation.lock();
        {
            let mut store = self.functions.write();
            if !store.functions.contains_key(&addr) {
                return false;
            }
            store.queue.insert(addr);
        }
        self.scheduler.note_submit(addr);
        self.emit(vec![ChangeEvent::FunctionUpdateRequested { start: addr }]);
        true
    }

    /// Store analysis results for `start`; false if the function was removed meanwhile.
    pub(crate) fn update_function(&self, updated: Function) -> bool {
        let _guard = self.mutation.lock();
        let changed = {
            let mut store = self.functions.write();
            match store.functions.get_mut(&updated.start) {
                Some(existing) => {
                    let changed = existing.basic_blocks != updated.basic_blocks
                        || existing.call_sites != updated.call_sites
                        || existing.analysis_skipped != updated.analysis_skipped;
                    existing.basic_blocks = updated.basic_blocks;
                    existing.call_sites = updated.call_sites;
                    existing.analysis_skipped = updated.analysis_skipped;
                    changed
                }
                None => return false,
            }
        };
        if changed {
            self.emit_analysis(vec![ChangeEvent::FunctionUpdated {
                start: updated.start,
            }]);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpaceConfig;
    use crate::core::{SegmentFlags, Symbol};
    use crate::storage::BufferAccessor;
    use std::sync::Arc;

    fn space() -> Arc<AddressSpace> {
        let mut config = SpaceConfig::default();
        config.analysis.auto_schedule = false;
        let space = AddressSpace::builder()
            .storage(BufferAccessor::new(vec![0xc3u8; 0x100]))
            .config(config)
            .build()
            .unwrap();
        space
            .add_auto_segment(0x1000, 0x100, 0, 0x100, SegmentFlags::rwx(true, false, true))
            .unwrap();
        space
    }

    #[test]
    fn test_add_and_remove_functions() {
        let space = space();
        assert!(space.add_function(0x1000));
        assert!(!space.add_function(0x1000));
        assert!(!space.add_function(0x5000));
        assert!(space.has_functions());
        assert_eq!(space.get_function_at(0x1000).unwrap().name, "sub_1000");

        assert!(!space.remove_user_function(0x1000));
        assert!(space.remove_function(0x1000));
        assert!(!space.has_functions());
    }

    #[test]
    fn test_user_function_undo() {
        let space = space();
        assert!(space.create_user_function(0x1010));
        assert!(!space.get_function_at(0x1010).unwrap().auto_defined);
        assert!(!space.remove_function(0x1010));
        assert!(space.undo());
        assert!(space.get_function_at(0x1010).is_none());
        assert!(space.redo());
        assert!(space.get_function_at(0x1010).is_some());
    }

    #[test]
    fn test_entry_point_and_symbol_name() {
        let space = space();
        space.add_entry_point(0x1020);
        space.add_entry_point(0x1020);
        assert_eq!(space.entry_points(), vec![0x1020]);
        space.define_auto_symbol(Symbol::new(SymbolKind::Function, 0x1020, "_start"));
        assert_eq!(space.entry_function().unwrap().name, "_start");
        assert!(space.reanalyze_function(0x1020));
        assert!(!space.reanalyze_function(0x1030));
    }
}
