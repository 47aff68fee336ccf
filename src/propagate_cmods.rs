use crate::{
    block::BlockId,
    function::Function,
    hazards::{range_hazard, touches_storage_in_range},
    inst::Slot,
    opcode::Opcode,
};

/// Folds a trailing zero-comparison into the condition modifier of the
/// instruction that produced the compared value.
///
/// Turn this:  add v1, v2, v3 ; cmp.g.f0 null, v1, 0
/// Into this:  add.g.f0 v1, v2, v3
///
/// The destination write survives the fold: the flag reflects the stored
/// result, so the destination's element type records the width and
/// signedness the flag is read at. Ordering comparisons retype it to the
/// comparison's signedness. If another instruction between the definer
/// and the comparison touches the flag, the definer is instead sunk to
/// just before the comparison, when nothing in between depends on it.
pub fn propagate_cmods(func: &mut Function, block: BlockId) -> bool {
    let mut pass = PropagateCmods {
        func,
        block,
        changed: false,
    };
    pass.run();
    pass.changed
}

struct PropagateCmods<'a> {
    func: &'a mut Function,
    block: BlockId,
    changed: bool,
}

impl<'a> PropagateCmods<'a> {
    fn run(&mut self) {
        let mut index = 0;
        while index < self.func.block(self.block).len() {
            if self.try_fold(index) {
                self.changed = true;
                // The comparison at `index` is gone; the next instruction
                // slid into its position.
            } else {
                index += 1;
            }
        }
    }

    fn try_fold(&mut self, position: usize) -> bool {
        let cmp_id = self.func.block(self.block).insts[position];
        let cmp = self.func.inst(cmp_id);

        if cmp.opcode != Opcode::Cmp || cmp.predicate.is_some() || cmp.saturate {
            return false;
        }
        // A comparison with an explicit destination also writes a per-lane
        // mask; the fold produces no such value.
        if cmp.dst.is_some() {
            return false;
        }
        let cm = match cmp.cond_mod {
            Some(cm) => cm,
            None => panic!("comparison without a condition modifier"),
        };
        if !cmp.srcs[1].is_zero_imm() {
            return false;
        }
        let value = match cmp.src_reg(0) {
            Some(region) => *region,
            None => return false,
        };
        if value.has_modifier() || value.indirect.is_some() {
            return false;
        }
        let cmp_elem = value.elem;
        let exec_width = cmp.exec_width;
        let mask_offset = cmp.mask_offset;

        let def_id = match self.func.def_use.single_def(cmp_id, Slot::Src(0)) {
            Some(def) => def,
            None => return false,
        };
        let def_position = match self.func.position_of(self.block, def_id) {
            Some(p) => p,
            None => return false, // defined in another block
        };
        debug_assert!(def_position < position);

        let def = self.func.inst(def_id);
        let info = def.opcode.info();
        if !info.cmod_foldable
            || def.cond_mod.is_some()
            || def.predicate.is_some()
            || def.saturate
            || def.exec_width != exec_width
            || def.mask_offset != mask_offset
        {
            return false;
        }
        let def_dst = match &def.dst {
            Some(dst) => *dst,
            None => return false,
        };
        if !def_dst.same_storage(&value) || def_dst.indirect.is_some() {
            return false;
        }

        // The flag reflects the comparison's view of the bits. Equality
        // relations only need matching width; ordering relations follow the
        // comparison's type, so the definer's destination is retyped to the
        // comparison's signedness. Float and integer views never mix.
        if def_dst.elem.is_float() != cmp_elem.is_float() {
            return false;
        }
        let retyped = if cm.cond.is_ordering() && def_dst.elem != cmp_elem {
            if def_dst.elem.is_float() {
                return false;
            }
            Some(def_dst.retyped(def_dst.elem.with_signedness(cmp_elem.is_signed())))
        } else {
            None
        };

        // Folding moves the flag write up to the definer's position. If
        // anything in between touches the flag, try sinking the definer
        // down instead; that is legal only when nothing in between depends
        // on it.
        let flag_range = self.func.inst(cmp_id).flag_byte_range();
        let flag_clear = !touches_storage_in_range(
            self.func,
            self.block,
            def_position,
            position,
            cm.flag,
            &flag_range,
        );
        if !flag_clear {
            if range_hazard(self.func, self.block, def_position, position, def_id) {
                return false;
            }
            self.func.move_inst(self.block, def_position, position - 1);
        }

        let def = self.func.inst_mut(def_id);
        if let Some(region) = retyped {
            def.dst = Some(region);
        }
        def.cond_mod = Some(cm);

        self.func.def_use.transfer_uses(cmp_id, def_id, true);
        let cmp_position = self
            .func
            .position_of(self.block, cmp_id)
            .expect("comparison left its block");
        self.func.remove_inst(self.block, cmp_position);
        true
    }
}
