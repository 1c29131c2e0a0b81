//! Cross references.
//!
//! Auto references are rebuilt by the analysis pass for the functions it
//! just analyzed. User data references are undoable and survive that
//! rebuild. Call edges are not stored here; callers and callees are read
//! from the call sites recorded on each function.

use tracing::trace;

use crate::core::{AddressRange, Xref, XrefKind};
use crate::space::{AddressSpace, UndoAction};

impl AddressSpace {
    /// Add a user data reference `from -> to`; false if one already exists.
    pub fn add_user_data_ref(&self, from: u64, to: u64) -> bool {
        let _guard = self.mutation.lock();
        let key = (from, to, XrefKind::Data);
        {
            let mut md = self.metadata.write();
            if md.xrefs.get(&key) == Some(&false) {
                return false;
            }
            md.xrefs.insert(key, false);
            md.xrefs_to.insert((to, from, XrefKind::Data));
        }
        trace!(from, to, "user data ref added");
        self.record_undo(UndoAction::DataRef {
            from,
            to,
            before: false,
            after: true,
        });
        true
    }

    /// Remove a user data reference; auto references are left alone.
    pub fn remove_user_data_ref(&self, from: u64, to: u64) -> bool {
        let _guard = self.mutation.lock();
        let key = (from, to, XrefKind::Data);
        {
            let mut md = self.metadata.write();
            if md.xrefs.get(&key) != Some(&false) {
                return false;
            }
            md.xrefs.remove(&key);
            md.xrefs_to.remove(&(to, from, XrefKind::Data));
        }
        self.record_undo(UndoAction::DataRef {
            from,
            to,
            before: true,
            after: false,
        });
        true
    }

    /// Drop auto references originating in `ranges` and install `refs`.
    pub(crate) fn replace_auto_xrefs(&self, ranges: &[AddressRange], refs: Vec<(u64, u64, XrefKind)>) {
        let _guard = self.mutation.lock();
        let mut md = self.metadata.write();
        let stale: Vec<(u64, u64, XrefKind)> = {
            let xrefs = &md.xrefs;
            ranges
                .iter()
                .flat_map(|r| {
                    xrefs
                        .range((r.start, 0, XrefKind::Code)..)
                        .take_while(move |((from, _, _), _)| *from < r.end)
                        .filter(|(_, auto)| **auto)
                        .map(|(k, _)| *k)
                })
                .collect()
        };
        for (from, to, kind) in stale {
            md.xrefs.remove(&(from, to, kind));
            md.xrefs_to.remove(&(to, from, kind));
        }
        for (from, to, kind) in refs {
            md.xrefs.entry((from, to, kind)).or_insert(true);
            md.xrefs_to.insert((to, from, kind));
        }
    }

    fn refs_to(&self, addr: u64, len: u64, kind: XrefKind) -> Vec<Xref> {
        let range = AddressRange::from_len(addr, len.max(1));
        let md = self.metadata.read();
        md.xrefs_to
            .range((range.start, 0, XrefKind::Code)..)
            .take_while(|(to, _, _)| *to < range.end)
            .filter(|(_, _, k)| *k == kind)
            .map(|&(to, from, kind)| Xref {
                from,
                to,
                kind,
                auto_defined: md.xrefs.get(&(from, to, kind)).copied().unwrap_or(true),
            })
            .collect()
    }

    fn refs_from(&self, addr: u64, len: u64, kind: XrefKind) -> Vec<Xref> {
        let range = AddressRange::from_len(addr, len.max(1));
        self.metadata
            .read()
            .xrefs
            .range((range.start, 0, XrefKind::Code)..)
            .take_while(|((from, _, _), _)| *from < range.end)
            .filter(|((_, _, k), _)| *k == kind)
            .map(|(&(from, to, kind), &auto)| Xref {
                from,
                to,
                kind,
                auto_defined: auto,
            })
            .collect()
    }

    /// Code references into `[addr, addr + len)`; a zero length means `addr` alone.
    pub fn get_code_refs(&self, addr: u64, len: u64) -> Vec<Xref> {
        self.refs_to(addr, len, XrefKind::Code)
    }

    pub fn get_code_refs_from(&self, addr: u64, len: u64) -> Vec<Xref> {
        self.refs_from(addr, len, XrefKind::Code)
    }

    pub fn get_data_refs(&self, addr: u64, len: u64) -> Vec<Xref> {
        self.refs_to(addr, len, XrefKind::Data)
    }

    pub fn get_data_refs_from(&self, addr: u64, len: u64) -> Vec<Xref> {
        self.refs_from(addr, len, XrefKind::Data)
    }

    /// Call sites whose target is `addr`, in address order.
    pub fn get_callers(&self, addr: u64) -> Vec<u64> {
        let mut sites: Vec<u64> = self
            .functions
            .read()
            .functions
            .values()
            .flat_map(|f| f.call_sites.iter())
            .filter(|(_, target)| *target == addr)
            .map(|(site, _)| *site)
            .collect();
        sites.sort_unstable();
        sites.dedup();
        sites
    }

    /// Targets called by the instruction at `site`.
    pub fn get_callees(&self, site: u64) -> Vec<u64> {
        let mut targets: Vec<u64> = self
            .functions
            .read()
            .functions
            .values()
            .flat_map(|f| f.call_sites.iter())
            .filter(|(s, _)| *s == site)
            .map(|(_, target)| *target)
            .collect();
        targets.sort_unstable();
        targets.dedup();
        targets
    }
}
