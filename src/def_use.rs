use indexmap::{IndexMap, IndexSet};

use crate::{
    block::BlockId,
    function::Function,
    hazards::{lifetime_marker, range_covers, ranges_overlap, read_accesses, write_accesses},
    inst::{InstId, Slot},
    operand::DeclId,
};

/// A consumer of some definition: which of the definer's slots produced the
/// value and which of the user's slots reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UseRec {
    pub def_slot: Slot,
    pub user: InstId,
    pub use_slot: Slot,
}

/// A producer of some use, mirror of `UseRec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefRec {
    pub def: InstId,
    pub def_slot: Slot,
    pub use_slot: Slot,
}

/// The def-use ledger: bidirectional edges between an instruction's operand
/// slots and every instruction reading the storage it writes.
///
/// Invariant: for any live instruction, the recorded edges where it is the
/// user exactly match the non-immediate storage its operands currently
/// read, and the edges where it is the definer exactly match the live
/// readers of the storage it writes. Every rewrite restores this before
/// returning to the driver; a stale edge is a fatal bug, not a recoverable
/// condition.
#[derive(Clone, Default)]
pub struct DefUse {
    users: IndexMap<InstId, IndexSet<UseRec>>,
    defs: IndexMap<InstId, IndexSet<DefRec>>,
    /// Blocks containing a read of each declaration. Edges are
    /// block-local, so an empty in-block use set never proves a write
    /// dead on its own; a rule may only delete or retarget a destination
    /// whose storage is read nowhere outside its block.
    read_blocks: IndexMap<DeclId, IndexSet<usize>>,
}

impl DefUse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a use. Idempotent per (def, def_slot, user, use_slot) tuple.
    pub fn add_edge(&mut self, def: InstId, def_slot: Slot, user: InstId, use_slot: Slot) {
        self.users.entry(def).or_default().insert(UseRec {
            def_slot,
            user,
            use_slot,
        });
        self.defs.entry(user).or_default().insert(DefRec {
            def,
            def_slot,
            use_slot,
        });
    }

    pub fn remove_edge(&mut self, def: InstId, def_slot: Slot, user: InstId, use_slot: Slot) {
        if let Some(set) = self.users.get_mut(&def) {
            set.shift_remove(&UseRec {
                def_slot,
                user,
                use_slot,
            });
        }
        if let Some(set) = self.defs.get_mut(&user) {
            set.shift_remove(&DefRec {
                def,
                def_slot,
                use_slot,
            });
        }
    }

    /// Bulk teardown of every edge where `user` consumes a value. Called
    /// before an instruction is deleted or its operand set fully replaced.
    pub fn remove_edges_as_user(&mut self, user: InstId) {
        let recs = match self.defs.shift_remove(&user) {
            Some(set) => set,
            None => return,
        };
        for rec in recs {
            if let Some(set) = self.users.get_mut(&rec.def) {
                set.shift_remove(&UseRec {
                    def_slot: rec.def_slot,
                    user,
                    use_slot: rec.use_slot,
                });
            }
        }
    }

    /// Bulk teardown of every edge where `def` produces a value.
    pub fn remove_edges_as_def(&mut self, def: InstId) {
        let recs = match self.users.shift_remove(&def) {
            Some(set) => set,
            None => return,
        };
        for rec in recs {
            if let Some(set) = self.defs.get_mut(&rec.user) {
                set.shift_remove(&DefRec {
                    def,
                    def_slot: rec.def_slot,
                    use_slot: rec.use_slot,
                });
            }
        }
    }

    /// Tears down the edges arriving at one specific slot of `user`.
    pub fn remove_use_edges(&mut self, user: InstId, use_slot: Slot) {
        let recs: Vec<DefRec> = self.defs_of(user, use_slot);
        for rec in recs {
            self.remove_edge(rec.def, rec.def_slot, user, use_slot);
        }
    }

    /// Every consumer of `from` now consumes `to` instead, slot for slot:
    /// `to` must produce a value comparable to what `from` produced. With
    /// `keep_existing` false, `to`'s current consumers are dropped first.
    pub fn transfer_uses(&mut self, from: InstId, to: InstId, keep_existing: bool) {
        if !keep_existing {
            self.remove_edges_as_def(to);
        }
        let recs = match self.users.shift_remove(&from) {
            Some(set) => set,
            None => return,
        };
        for rec in recs {
            if let Some(set) = self.defs.get_mut(&rec.user) {
                set.shift_remove(&DefRec {
                    def: from,
                    def_slot: rec.def_slot,
                    use_slot: rec.use_slot,
                });
            }
            self.add_edge(to, rec.def_slot, rec.user, rec.use_slot);
        }
    }

    /// Rehomes the edges leaving one def slot of `inst` onto another of its
    /// slots. Used when a rewrite moves a result from the destination to
    /// the condition modifier (or the reverse).
    pub fn remap_def_slot(&mut self, inst: InstId, from_slot: Slot, to_slot: Slot) {
        let recs: Vec<UseRec> = self
            .uses_of(inst)
            .into_iter()
            .filter(|rec| rec.def_slot == from_slot)
            .collect();
        for rec in recs {
            self.remove_edge(inst, from_slot, rec.user, rec.use_slot);
            self.add_edge(inst, to_slot, rec.user, rec.use_slot);
        }
    }

    pub fn uses_of(&self, def: InstId) -> Vec<UseRec> {
        self.users
            .get(&def)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn uses_of_slot(&self, def: InstId, def_slot: Slot) -> Vec<UseRec> {
        self.uses_of(def)
            .into_iter()
            .filter(|rec| rec.def_slot == def_slot)
            .collect()
    }

    pub fn use_count(&self, def: InstId) -> usize {
        self.users.get(&def).map_or(0, |set| set.len())
    }

    pub fn defs_of(&self, user: InstId, use_slot: Slot) -> Vec<DefRec> {
        self.defs
            .get(&user)
            .map(|set| {
                set.iter()
                    .copied()
                    .filter(|rec| rec.use_slot == use_slot)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The unique definer of a slot, if exactly one reaches it.
    pub fn single_def(&self, user: InstId, use_slot: Slot) -> Option<InstId> {
        let recs = self.defs_of(user, use_slot);
        match recs.as_slice() {
            [rec] => Some(rec.def),
            _ => None,
        }
    }

    /// True when the declaration is read in some block other than `block`.
    /// Populated by `build`; rewrites only rename or remove reads within
    /// one block, so the recorded set stays conservative.
    pub fn read_outside(&self, decl: DeclId, block: BlockId) -> bool {
        self.read_blocks
            .get(&decl)
            .map_or(false, |blocks| blocks.iter().any(|&b| b != block.0))
    }

    /// Flattened edge set, for whole-ledger comparison.
    pub fn edge_set(&self) -> IndexSet<(InstId, Slot, InstId, Slot)> {
        let mut edges = IndexSet::new();
        for (def, set) in self.users.iter() {
            for rec in set.iter() {
                edges.insert((*def, rec.def_slot, rec.user, rec.use_slot));
            }
        }
        edges
    }

    /// Recomputes the ledger from the IR by a forward reaching-definition
    /// scan per block. An edge exists when the definer's written range
    /// overlaps the user's read range and no instruction in between
    /// unpredicatedly overwrites the whole written range. Edges are
    /// block-local; rules decline on cross-block reach anyway.
    pub fn build(func: &Function) -> DefUse {
        let mut ledger = DefUse::new();

        for block in func.blocks.iter() {
            let mut live: Vec<(InstId, crate::hazards::Access)> = Vec::new();

            for &id in block.insts.iter() {
                let inst = func.inst(id);

                for access in read_accesses(func, inst) {
                    ledger
                        .read_blocks
                        .entry(access.decl)
                        .or_default()
                        .insert(block.index);
                    for (def, def_access) in live.iter() {
                        if def_access.decl == access.decl
                            && ranges_overlap(&def_access.range, &access.range)
                        {
                            ledger.add_edge(*def, def_access.slot, id, access.slot);
                        }
                    }
                }

                if let Some((decl, range)) = lifetime_marker(func, inst) {
                    live.retain(|(_, access)| {
                        !(access.decl == decl && ranges_overlap(&access.range, &range))
                    });
                    continue;
                }

                let full_write = inst.predicate.is_none();
                for access in write_accesses(func, inst) {
                    if full_write {
                        live.retain(|(_, prior)| {
                            !(prior.decl == access.decl && range_covers(&access.range, &prior.range))
                        });
                    }
                    live.push((id, access));
                }
            }
        }

        ledger
    }
}

/// Copies the defining edges of `src`'s slot onto `dest`'s slot. With
/// `checked`, an edge is copied only when the definer's written range
/// actually overlaps what `dest` reads through `dest_slot`; some uses are
/// recorded at coarser granularity than an individual instruction's read.
pub fn copy_def(
    func: &mut Function,
    dest: InstId,
    dest_slot: Slot,
    src: InstId,
    src_slot: Slot,
    checked: bool,
) {
    let mut recs = func.def_use.defs_of(src, src_slot);

    if checked {
        let dest_inst = func.inst(dest);
        let dest_access = read_accesses(func, dest_inst)
            .iter()
            .find(|access| access.slot == dest_slot)
            .cloned();
        let dest_access = match dest_access {
            Some(access) => access,
            None => panic!("copy_def onto a slot {:?} that reads nothing", dest_slot),
        };
        recs.retain(|rec| {
            let def_inst = func.inst(rec.def);
            write_accesses(func, def_inst).iter().any(|access| {
                access.slot == rec.def_slot
                    && access.decl == dest_access.decl
                    && ranges_overlap(&access.range, &dest_access.range)
            })
        });
    }

    for rec in recs {
        func.def_use.add_edge(rec.def, rec.def_slot, dest, dest_slot);
    }
}

/// True when the recorded ledger matches a fresh recomputation.
pub fn consistent(func: &Function) -> bool {
    DefUse::build(func).edge_set() == func.def_use.edge_set()
}

/// Panics with the differing edges when the ledger is stale.
pub fn verify(func: &Function) {
    let rebuilt = DefUse::build(func).edge_set();
    let recorded = func.def_use.edge_set();
    if rebuilt == recorded {
        return;
    }
    let missing: Vec<_> = rebuilt.difference(&recorded).collect();
    let stale: Vec<_> = recorded.difference(&rebuilt).collect();
    panic!(
        "def-use ledger inconsistent; missing {:?}, stale {:?}",
        missing, stale
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::BlockBuilder,
        opcode::{Cond, Opcode},
        operand::Operand,
        typ::ElemType,
        HwCaps, Options,
    };

    fn function() -> Function {
        Function::new(Options::default(), HwCaps::default())
    }

    #[test]
    fn build_records_simple_edges() {
        let mut func = function();
        let block = func.add_block();
        let mut b = BlockBuilder::new(&mut func, block);
        let a = b.grf(ElemType::S32);
        let c = b.grf(ElemType::S32);
        let t = b.grf(ElemType::S32);
        let add = b.alu2(Opcode::Add, Some(t), Operand::Reg(a), Operand::Reg(c));
        let cmp = b.cmp(Cond::G, 0, Operand::Reg(t), b.zero(ElemType::S32));
        func.rebuild_def_use();

        assert_eq!(func.def_use().single_def(cmp, Slot::Src(0)), Some(add));
        assert_eq!(func.def_use().use_count(add), 1);
        assert!(consistent(&func));
    }

    #[test]
    fn unpredicated_write_kills_predicated_does_not() {
        let mut func = function();
        let block = func.add_block();
        let mut b = BlockBuilder::new(&mut func, block);
        let x = b.grf(ElemType::S32);
        let t = b.grf(ElemType::S32);
        let first = b.mov(Some(t), Operand::Reg(x));
        let second = b.mov(Some(t), Operand::Reg(x));
        let pred_write = {
            let id = b.mov(Some(t), b.zero(ElemType::S32));
            b.func.inst_mut(id).predicate = Some(crate::inst::Predicate {
                flag: b.func.flag(0),
                invert: false,
            });
            id
        };
        let reader = b.mov(Some(x), Operand::Reg(t));
        func.rebuild_def_use();

        // The second mov fully overwrites the first; the predicated mov
        // does not kill the second. The reader sees both.
        let defs: Vec<_> = func
            .def_use()
            .defs_of(reader, Slot::Src(0))
            .iter()
            .map(|rec| rec.def)
            .collect();
        assert!(!defs.contains(&first));
        assert!(defs.contains(&second));
        assert!(defs.contains(&pred_write));
    }

    #[test]
    fn transfer_moves_consumers() {
        let mut func = function();
        let block = func.add_block();
        let mut b = BlockBuilder::new(&mut func, block);
        let x = b.grf(ElemType::S32);
        let t = b.grf(ElemType::S32);
        let old = b.mov(Some(t), Operand::Reg(x));
        let new = b.mov(Some(t), Operand::Reg(x));
        let user = b.mov(Some(x), Operand::Reg(t));
        func.rebuild_def_use();

        // The second mov kills the first, so only it reaches the user.
        assert_eq!(func.def_use().single_def(user, Slot::Src(0)), Some(new));

        func.def_use_mut().transfer_uses(new, old, false);
        assert_eq!(func.def_use().single_def(user, Slot::Src(0)), Some(old));
    }

    #[test]
    fn copy_def_checked_rejects_disjoint_storage() {
        let mut func = function();
        let block = func.add_block();
        let mut b = BlockBuilder::new(&mut func, block);
        let wide = b.grf_sized(64);
        let lo = crate::operand::Region::new(crate::operand::RegFile::Grf, wide, ElemType::S32);
        let hi = lo.at(32);
        let def_lo = b.mov(Some(lo), b.zero(ElemType::S32));
        let def_hi = b.mov(Some(hi), b.zero(ElemType::S32));
        // Reader of the low half only.
        let user = b.mov(Some(b.func.acc_region(ElemType::S32)), Operand::Reg(lo));
        func.rebuild_def_use();

        // Seed a second reader and copy the low-half use onto it, checked:
        // only the overlapping definer survives the copy.
        let mut b = BlockBuilder::new(&mut func, block);
        let probe = b.mov(Some(lo), Operand::Reg(lo));
        func.def_use_mut().remove_edges_as_user(probe);
        copy_def(&mut func, probe, Slot::Src(0), user, Slot::Src(0), true);
        assert_eq!(func.def_use().single_def(probe, Slot::Src(0)), Some(def_lo));
        let defs = func.def_use().defs_of(probe, Slot::Src(0));
        assert!(!defs.iter().any(|rec| rec.def == def_hi));
    }
}
