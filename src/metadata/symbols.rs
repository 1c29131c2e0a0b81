//! Symbol table keyed by (address, namespace).

use crate::core::{AddressRange, Symbol, SymbolKind};
use crate::notify::ChangeEvent;
use crate::space::{AddressSpace, UndoAction};

use super::{define_layered, undefine_layered, Defined};

impl AddressSpace {
    pub fn define_auto_symbol(&self, mut symbol: Symbol) {
        symbol.auto_defined = true;
        self.define_symbol(symbol);
    }

    pub fn define_user_symbol(&self, mut symbol: Symbol) {
        symbol.auto_defined = false;
        self.define_symbol(symbol);
    }

    fn define_symbol(&self, symbol: Symbol) {
        let _guard = self.mutation.lock();
        let key = symbol.key();
        let outcome = define_layered(&mut self.metadata.write().symbols, key.clone(), symbol.clone());
        if !symbol.auto_defined && outcome != Defined::Ignored {
            self.record_undo(UndoAction::Symbol {
                address: key.0,
                namespace: key.1,
                before: outcome.before().cloned(),
                after: Some(symbol.clone()),
            });
        }
        match outcome {
            Defined::Added => self.emit(vec![ChangeEvent::SymbolAdded(symbol)]),
            Defined::Updated { .. } => self.emit(vec![ChangeEvent::SymbolUpdated(symbol)]),
            Defined::Unchanged { .. } | Defined::Ignored => {}
        }
    }

    pub fn undefine_auto_symbol(&self, symbol: &Symbol) -> bool {
        self.undefine_symbol(symbol, true)
    }

    pub fn undefine_user_symbol(&self, symbol: &Symbol) -> bool {
        self.undefine_symbol(symbol, false)
    }

    fn undefine_symbol(&self, symbol: &Symbol, auto: bool) -> bool {
        let _guard = self.mutation.lock();
        let key = symbol.key();
        let removed = undefine_layered(&mut self.metadata.write().symbols, &key, auto);
        let Some(old) = removed else {
            return false;
        };
        if !auto {
            self.record_undo(UndoAction::Symbol {
                address: key.0,
                namespace: key.1,
                before: Some(old.clone()),
                after: None,
            });
        }
        self.emit(vec![ChangeEvent::SymbolRemoved(old)]);
        true
    }

    pub(crate) fn restore_symbol(&self, address: u64, namespace: &str, state: Option<Symbol>) {
        let _guard = self.mutation.lock();
        let key = (address, namespace.to_string());
        let before = {
            let mut md = self.metadata.write();
            match &state {
                Some(sym) => md.symbols.insert(key, sym.clone()),
                None => md.symbols.remove(&key),
            }
        };
        let event = match (before, state) {
            (None, Some(sym)) => ChangeEvent::SymbolAdded(sym),
            (Some(old), None) => ChangeEvent::SymbolRemoved(old),
            (Some(old), Some(sym)) if old != sym => ChangeEvent::SymbolUpdated(sym),
            _ => return,
        };
        self.emit(vec![event]);
    }

    /// Auto symbols for an import slot and the imported function it resolves to.
    pub fn define_imported_function(&self, import_address_symbol: Symbol, function_address: u64) {
        let _guard = self.mutation.lock();
        let raw = import_address_symbol.raw_name.clone();
        let namespace = import_address_symbol.namespace.clone();
        let mut slot = import_address_symbol;
        slot.kind = SymbolKind::ImportAddress;
        self.define_auto_symbol(slot);
        self.define_auto_symbol(
            Symbol::new(SymbolKind::ImportedFunction, function_address, raw)
                .with_namespace(namespace),
        );
    }

    /// Symbol at `addr` in `namespace` (`None` is the default namespace).
    pub fn get_symbol_at(&self, addr: u64, namespace: Option<&str>) -> Option<Symbol> {
        let key = (addr, namespace.unwrap_or_default().to_string());
        self.metadata.read().symbols.get(&key).cloned()
    }

    pub fn get_symbol_by_raw_name(&self, raw_name: &str, namespace: Option<&str>) -> Option<Symbol> {
        let namespace = namespace.unwrap_or_default();
        self.metadata
            .read()
            .symbols
            .values()
            .find(|s| s.raw_name == raw_name && s.namespace == namespace)
            .cloned()
    }

    /// Symbols whose raw, full or short name equals `name`.
    pub fn get_symbols_by_name(&self, name: &str) -> Vec<Symbol> {
        self.metadata
            .read()
            .symbols
            .values()
            .filter(|s| s.matches_name(name))
            .cloned()
            .collect()
    }

    /// Symbols with addresses in `[start, start + len)`.
    pub fn get_symbols(&self, start: u64, len: u64) -> Vec<Symbol> {
        let range = AddressRange::from_len(start, len);
        self.metadata
            .read()
            .symbols
            .range((range.start, String::new())..)
            .take_while(|((addr, _), _)| *addr < range.end)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.metadata.read().symbols.values().cloned().collect()
    }

    pub fn get_symbols_of_type(&self, kind: SymbolKind) -> Vec<Symbol> {
        self.metadata
            .read()
            .symbols
            .values()
            .filter(|s| s.kind == kind)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::core::{Symbol, SymbolKind};
    use crate::notify::observer_fn;
    use crate::space::AddressSpace;
    use crate::storage::BufferAccessor;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn space() -> Arc<AddressSpace> {
        AddressSpace::builder()
            .storage(BufferAccessor::new(vec![0u8; 16]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup_by_names_and_range() {
        let space = space();
        space.define_auto_symbol(Symbol::new(SymbolKind::Function, 0x1000, "_ZN3foo3barEi"));
        space.define_auto_symbol(Symbol::new(SymbolKind::Data, 0x2000, "counter"));
        space.define_user_symbol(
            Symbol::new(SymbolKind::Data, 0x2000, "counter_ns").with_namespace("libc"),
        );

        assert_eq!(space.get_symbols_by_name("foo::bar").len(), 1);
        assert_eq!(
            space.get_symbol_at(0x2000, None).unwrap().raw_name,
            "counter"
        );
        assert!(!space.get_symbol_at(0x2000, Some("libc")).unwrap().auto_defined);
        assert!(space.get_symbol_by_raw_name("counter_ns", None).is_none());
        assert_eq!(space.get_symbols(0x1000, 0x1000).len(), 1);
        assert_eq!(space.get_symbols(0x1000, 0x1001).len(), 3);
        assert_eq!(space.get_symbols_of_type(SymbolKind::Data).len(), 2);
    }

    #[test]
    fn test_bulk_modify_defers_events_in_order() {
        let space = space();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        space.register_observer(observer_fn(move |_, e| {
            s.lock().push(e.name());
            Ok(())
        }));

        space.begin_bulk_modify_symbols();
        space.define_auto_symbol(Symbol::new(SymbolKind::Function, 1, "a"));
        space.define_auto_symbol(Symbol::new(SymbolKind::Function, 1, "b"));
        space.define_auto_data_var(4, crate::core::DataType::Bool);
        assert_eq!(*seen.lock(), vec!["data_var_added"]);
        space.end_bulk_modify_symbols();
        assert_eq!(
            *seen.lock(),
            vec!["data_var_added", "symbol_added", "symbol_updated"]
        );
    }

    #[test]
    fn test_imported_function() {
        let space = space();
        space.define_imported_function(Symbol::new(SymbolKind::Data, 0x3000, "malloc"), 0x9000);
        assert_eq!(
            space.get_symbol_at(0x3000, None).unwrap().kind,
            SymbolKind::ImportAddress
        );
        assert_eq!(
            space.get_symbol_at(0x9000, None).unwrap().kind,
            SymbolKind::ImportedFunction
        );
    }
}
