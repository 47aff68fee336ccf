use crate::{
    block::BlockId,
    def_use::copy_def,
    function::Function,
    hazards::touches_storage_in_range,
    inst::{CondMod, Inst, InstId, Predicate, Slot},
    opcode::{Cond, Opcode},
    operand::{Imm, Operand, RegFile, Region},
    typ::ElemType,
};

/// Lowers abstract flag-logic pseudo-ops to concrete flag-register code.
/// After this pass no pseudo-logic opcode remains in the block.
///
/// Three strategies, tried in order:
///
/// 1. Flag-union pre-fold (And/Or of two single-use comparison results):
///    both comparisons are retargeted at the destination flag and the
///    second is predicated on it, so the logic op disappears entirely.
///
///    Turn this:  cmp.l.f0 null, a, b ; cmp.l.f1 null, c, d ; pseudo_and f2, f0, f1
///    Into this:  cmp.l.f2 null, a, b ; (+f2) cmp.l.f2 null, c, d
///
/// 2. Fast path: the op covers a whole flag subregister and runs
///    unconditionally, so it degenerates to a one-wide native logic
///    instruction directly on flag storage.
///
/// 3. Slow path: each flag source is materialized as an all-ones/zero
///    integer through a predicated select, the native logic op combines
///    them, and a nonzero condition modifier writes the result back as a
///    flag.
pub fn lower_flag_logic(func: &mut Function, block: BlockId) -> bool {
    let mut pass = LowerFlagLogic {
        func,
        block,
        changed: false,
    };
    pass.run();
    pass.changed
}

struct LowerFlagLogic<'a> {
    func: &'a mut Function,
    block: BlockId,
    changed: bool,
}

impl<'a> LowerFlagLogic<'a> {
    fn run(&mut self) {
        let mut index = 0;
        while index < self.func.block(self.block).len() {
            let id = self.func.block(self.block).insts[index];
            if !self.func.inst(id).opcode.is_pseudo_logic() {
                index += 1;
                continue;
            }
            self.changed = true;
            if self.try_union_fold(index) {
                // The pseudo-op at `index` is gone.
                continue;
            }
            if self.try_fast_path(index) {
                index += 1;
                continue;
            }
            index = self.slow_path(index) + 1;
        }
    }

    /// Strategy 1. Declines unless both sources are single-use flags, each
    /// defined by an unpredicated comparison, with no conflicting flag
    /// traffic in between.
    fn try_union_fold(&mut self, position: usize) -> bool {
        let anchor_id = self.func.block(self.block).insts[position];
        let anchor = self.func.inst(anchor_id);

        let invert_second = match anchor.opcode {
            Opcode::PseudoAnd => false,
            Opcode::PseudoOr => true,
            _ => return false,
        };
        if anchor.predicate.is_some() {
            return false;
        }
        let dst_flag = anchor.dst.expect("pseudo-logic op with null destination").decl;
        let exec_width = anchor.exec_width;
        let mask_offset = anchor.mask_offset;
        let flag_range = anchor.flag_byte_range();

        let mut cmps = [InstId::default(); 2];
        for slot in 0..2u8 {
            let src_flag = match anchor.srcs[slot as usize].as_reg() {
                Some(region) => region.decl,
                None => return false,
            };
            if src_flag == dst_flag {
                return false;
            }
            // The pre-fold stops writing the source flag entirely; a read
            // in a later block would not show up as a recorded use.
            if self.func.def_use.read_outside(src_flag, self.block) {
                return false;
            }
            let def = match self.func.def_use.single_def(anchor_id, Slot::Src(slot)) {
                Some(def) => def,
                None => return false,
            };
            let uses = self.func.def_use.uses_of(def);
            if uses.len() != 1 || uses[0].user != anchor_id {
                return false;
            }
            let cmp = self.func.inst(def);
            if cmp.opcode != Opcode::Cmp
                || cmp.predicate.is_some()
                || cmp.dst.is_some()
                || cmp.exec_width != exec_width
                || cmp.mask_offset != mask_offset
            {
                return false;
            }
            let cm = cmp.cond_mod.expect("comparison without a condition modifier");
            if cm.flag != src_flag {
                return false;
            }
            cmps[slot as usize] = def;
        }
        let (first_src, p1, p2) = {
            let q0 = self.func.position_of(self.block, cmps[0]);
            let q1 = self.func.position_of(self.block, cmps[1]);
            match (q0, q1) {
                (Some(q0), Some(q1)) if q0 < q1 => (0usize, q0, q1),
                (Some(q0), Some(q1)) => (1usize, q1, q0),
                _ => return false,
            }
        };
        if self.func.inst(cmps[0]).cond_mod.map(|cm| cm.flag)
            == self.func.inst(cmps[1]).cond_mod.map(|cm| cm.flag)
        {
            return false;
        }
        let first = cmps[first_src];
        let second = cmps[1 - first_src];

        // The destination flag is written at the first comparison's
        // position from now on; no instruction in between may touch it
        // (the second comparison is about to be retargeted, so skip it).
        for k in p1 + 1..position {
            if k == p2 {
                continue;
            }
            if touches_storage_in_range(self.func, self.block, k - 1, k + 1, dst_flag, &flag_range)
            {
                return false;
            }
        }

        self.func.inst_mut(first).cond_mod.as_mut().unwrap().flag = dst_flag;
        let second_inst = self.func.inst_mut(second);
        second_inst.cond_mod.as_mut().unwrap().flag = dst_flag;
        second_inst.predicate = Some(Predicate {
            flag: dst_flag,
            invert: invert_second,
        });

        // Readers of the logic result now see the predicated second
        // comparison as a partial write over the first one.
        self.func.def_use.add_edge(first, Slot::CondMod, second, Slot::Pred);
        for rec in self.func.def_use.uses_of_slot(anchor_id, Slot::Dst) {
            self.func
                .def_use
                .add_edge(first, Slot::CondMod, rec.user, rec.use_slot);
            self.func
                .def_use
                .add_edge(second, Slot::CondMod, rec.user, rec.use_slot);
        }
        self.func.remove_inst(self.block, position);
        true
    }

    /// Strategy 2. One-wide native logic directly on flag storage, with a
    /// subregister bump when the active lanes sit in the upper half of a
    /// wide flag.
    fn try_fast_path(&mut self, position: usize) -> bool {
        let anchor_id = self.func.block(self.block).insts[position];
        let anchor = self.func.inst(anchor_id);
        if anchor.predicate.is_some() {
            return false;
        }
        let (elem, sub_offset) = match (anchor.exec_width, anchor.mask_offset) {
            (32, 0) => (ElemType::U32, 0),
            (16, offset) if offset % 16 == 0 => (ElemType::U16, offset as u32 / 16 * 2),
            _ => return false,
        };

        let native = anchor.opcode.native_logic();
        let as_data = |region: &Region| {
            Region::new(RegFile::Flag, region.decl, elem).at(sub_offset)
        };

        let anchor = self.func.inst_mut(anchor_id);
        anchor.opcode = native;
        anchor.exec_width = 1;
        anchor.mask_offset = 0;
        anchor.dst = Some(as_data(&anchor.dst.unwrap()));
        for src in anchor.srcs.iter_mut() {
            if let Operand::Reg(region) = src {
                *src = Operand::Reg(as_data(region));
            }
        }
        // Slots and byte ranges are unchanged, so every ledger edge
        // survives as recorded.
        true
    }

    /// Strategy 3. Always applies. Returns the anchor's position after the
    /// selects are inserted in front of it.
    fn slow_path(&mut self, position: usize) -> usize {
        let anchor_id = self.func.block(self.block).insts[position];
        let anchor = self.func.inst(anchor_id).clone();
        let exec_width = anchor.exec_width;
        let mask_offset = anchor.mask_offset;
        let dst_flag = anchor.dst.expect("pseudo-logic op with null destination").decl;
        let ones = Imm::all_ones(ElemType::U16);

        let mut tmps = Vec::new();
        let mut inserted = 0usize;
        for (i, src) in anchor.srcs.iter().enumerate() {
            let region = src.as_reg().expect("pseudo-logic source must be a flag");
            let tmp_decl = self
                .func
                .new_grf((mask_offset as u32 + exec_width as u32) * 2);
            let tmp = Region::new(RegFile::Grf, tmp_decl, ElemType::U16);

            let mut sel = Inst::new(Opcode::Sel, exec_width, mask_offset);
            sel.predicate = Some(Predicate {
                flag: region.decl,
                invert: false,
            });
            sel.srcs.push(Operand::Imm(ones));
            sel.srcs.push(Operand::Imm(Imm::zero(ElemType::U16)));
            sel.dst = Some(tmp);
            let sel_id = self.func.insert_inst(self.block, position + inserted, sel);
            inserted += 1;

            // The select inherits the flag's definers from the pseudo-op's
            // source slot; the use is recorded at coarser granularity, so
            // the copy is overlap-checked.
            copy_def(self.func, sel_id, Slot::Pred, anchor_id, Slot::Src(i as u8), true);
            tmps.push((sel_id, tmp));
        }

        let anchor_position = position + inserted;
        debug_assert_eq!(self.func.block(self.block).insts[anchor_position], anchor_id);

        for i in 0..anchor.srcs.len() {
            self.func
                .def_use
                .remove_use_edges(anchor_id, Slot::Src(i as u8));
        }

        let native = anchor.opcode.native_logic();
        let rewritten = self.func.inst_mut(anchor_id);
        rewritten.opcode = native;
        rewritten.dst = None;
        rewritten.cond_mod = Some(CondMod {
            cond: Cond::Nz,
            flag: dst_flag,
        });
        rewritten.srcs.clear();
        rewritten.srcs.push(Operand::Reg(tmps[0].1));
        if tmps.len() == 2 {
            rewritten.srcs.push(Operand::Reg(tmps[1].1));
        } else {
            // A one-operand Not becomes Xor with the all-ones pattern.
            rewritten.opcode = Opcode::Xor;
            rewritten.srcs.push(Operand::Imm(ones));
        }

        for (i, (sel_id, _)) in tmps.iter().enumerate() {
            self.func
                .def_use
                .add_edge(*sel_id, Slot::Dst, anchor_id, Slot::Src(i as u8));
        }
        // The flag result moves from the destination slot to the condition
        // modifier.
        self.func.def_use.remap_def_slot(anchor_id, Slot::Dst, Slot::CondMod);

        anchor_position
    }
}
