//! Data variables: at most one typed record per address.

use tracing::trace;

use crate::core::{DataType, DataVariable};
use crate::notify::ChangeEvent;
use crate::space::{AddressSpace, UndoAction};

use super::{define_layered, undefine_layered, Defined};

impl AddressSpace {
    pub fn define_auto_data_var(&self, addr: u64, ty: DataType) {
        self.define_data_var(DataVariable::new(addr, ty, true));
    }

    pub fn define_user_data_var(&self, addr: u64, ty: DataType) {
        self.define_data_var(DataVariable::new(addr, ty, false));
    }

    fn define_data_var(&self, var: DataVariable) {
        let _guard = self.mutation.lock();
        let addr = var.address;
        let user = !var.auto_discovered;
        let outcome = define_layered(&mut self.metadata.write().data_vars, addr, var.clone());
        trace!(addr, user, "define data var");
        if user && outcome != Defined::Ignored {
            self.record_undo(UndoAction::DataVar {
                address: addr,
                before: outcome.before().cloned(),
                after: Some(var.clone()),
            });
        }
        match outcome {
            Defined::Added => self.emit(vec![ChangeEvent::DataVariableAdded(var)]),
            Defined::Updated { .. } => self.emit(vec![ChangeEvent::DataVariableUpdated(var)]),
            Defined::Unchanged { .. } | Defined::Ignored => {}
        }
    }

    /// Removes the record at `addr` only if analysis created it.
    pub fn undefine_auto_data_var(&self, addr: u64) -> bool {
        self.undefine_data_var(addr, true)
    }

    pub fn undefine_user_data_var(&self, addr: u64) -> bool {
        self.undefine_data_var(addr, false)
    }

    fn undefine_data_var(&self, addr: u64, auto: bool) -> bool {
        let _guard = self.mutation.lock();
        let removed = undefine_layered(&mut self.metadata.write().data_vars, &addr, auto);
        let Some(var) = removed else {
            return false;
        };
        if !auto {
            self.record_undo(UndoAction::DataVar {
                address: addr,
                before: Some(var.clone()),
                after: None,
            });
        }
        self.emit(vec![ChangeEvent::DataVariableRemoved(var)]);
        true
    }

    pub(crate) fn restore_data_var(&self, addr: u64, state: Option<DataVariable>) {
        let _guard = self.mutation.lock();
        let before = {
            let mut md = self.metadata.write();
            match &state {
                Some(var) => md.data_vars.insert(addr, var.clone()),
                None => md.data_vars.remove(&addr),
            }
        };
        let event = match (before, state) {
            (None, Some(var)) => ChangeEvent::DataVariableAdded(var),
            (Some(old), None) => ChangeEvent::DataVariableRemoved(old),
            (Some(old), Some(var)) if old != var => ChangeEvent::DataVariableUpdated(var),
            _ => return,
        };
        self.emit(vec![event]);
    }

    pub fn get_data_var_at(&self, addr: u64) -> Option<DataVariable> {
        self.metadata.read().data_vars.get(&addr).cloned()
    }

    /// Variable whose span covers `addr`, the latest start winning on overlap.
    pub fn get_data_var_containing(&self, addr: u64) -> Option<DataVariable> {
        self.metadata
            .read()
            .data_vars
            .range(..=addr)
            .rev()
            .map(|(_, v)| v)
            .find(|v| v.range().contains(addr))
            .cloned()
    }

    pub fn data_vars(&self) -> Vec<DataVariable> {
        self.metadata.read().data_vars.values().cloned().collect()
    }

    pub fn has_data_variables(&self) -> bool {
        !self.metadata.read().data_vars.is_empty()
    }

    /// First variable starting strictly after `addr`.
    pub fn get_next_data_var_after(&self, addr: u64) -> Option<DataVariable> {
        let next = addr.checked_add(1)?;
        self.metadata
            .read()
            .data_vars
            .range(next..)
            .next()
            .map(|(_, v)| v.clone())
    }

    /// Last variable starting strictly before `addr`.
    pub fn get_previous_data_var_before(&self, addr: u64) -> Option<DataVariable> {
        self.metadata
            .read()
            .data_vars
            .range(..addr)
            .next_back()
            .map(|(_, v)| v.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::DataType;
    use crate::notify::{observer_fn, ChangeEvent};
    use crate::space::AddressSpace;
    use crate::storage::BufferAccessor;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn space() -> Arc<AddressSpace> {
        AddressSpace::builder()
            .storage(BufferAccessor::new(vec![0u8; 0x200]))
            .build()
            .unwrap()
    }

    fn names(space: &AddressSpace) -> Arc<Mutex<Vec<&'static str>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        space.register_observer(observer_fn(move |_, e: &ChangeEvent| {
            s.lock().push(e.name());
            Ok(())
        }));
        seen
    }

    #[test]
    fn test_user_shadows_auto_without_resurrection() {
        let space = space();
        space.define_auto_data_var(0x100, DataType::int(4, false));
        space.define_user_data_var(0x100, DataType::int(8, true));
        assert_eq!(
            space.get_data_var_at(0x100).unwrap().ty,
            DataType::int(8, true)
        );
        assert!(space.undefine_user_data_var(0x100));
        assert!(space.get_data_var_at(0x100).is_none());
    }

    #[test]
    fn test_one_event_per_change() {
        let space = space();
        let seen = names(&space);
        space.define_user_data_var(0x10, DataType::int(4, false));
        space.define_user_data_var(0x10, DataType::int(4, false));
        space.define_user_data_var(0x10, DataType::int(2, false));
        space.define_auto_data_var(0x10, DataType::int(1, false));
        space.undefine_auto_data_var(0x10);
        space.undefine_user_data_var(0x10);
        assert_eq!(
            *seen.lock(),
            vec!["data_var_added", "data_var_updated", "data_var_removed"]
        );
    }

    #[test]
    fn test_neighbours_and_containment() {
        let space = space();
        space.define_auto_data_var(0x20, DataType::int(4, false));
        space.define_auto_data_var(0x40, DataType::array(DataType::int(1, true), 16));
        assert_eq!(space.get_next_data_var_after(0x20).unwrap().address, 0x40);
        assert_eq!(space.get_previous_data_var_before(0x40).unwrap().address, 0x20);
        assert!(space.get_previous_data_var_before(0x20).is_none());
        assert_eq!(space.get_data_var_containing(0x4f).unwrap().address, 0x40);
        assert!(space.get_data_var_containing(0x24).is_none());
        assert!(space.has_data_variables());
    }

    #[test]
    fn test_undo_restores_shadowed_auto_record() {
        let space = space();
        space.define_auto_data_var(0x30, DataType::int(4, false));
        space.define_user_data_var(0x30, DataType::Bool);
        assert!(space.undo());
        let var = space.get_data_var_at(0x30).unwrap();
        assert!(var.auto_discovered);
        assert_eq!(var.ty, DataType::int(4, false));
    }
}
