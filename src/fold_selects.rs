use crate::{
    block::BlockId,
    function::Function,
    hazards::{touches_storage_in_range, writes_storage_in_range},
    inst::{CondMod, InstId, Slot},
    opcode::Opcode,
    operand::Operand,
};

/// Folds a comparison into the select it predicates.
///
/// Turn this:  cmp.l.f0 null, v1, v2 ; (+f0) sel v3, v1, v2
/// Into this:  sel.l.f0 v3, v1, v2
///
/// The select's sources must be exactly the comparison's two operands, in
/// either order; a swapped order reverses the relation, an inverted
/// predicate negates it. The rewritten select is the conditional-select
/// form: it evaluates the relation itself, writes the flag, and picks
/// src0 where the relation holds.
pub fn fold_selects(func: &mut Function, block: BlockId) -> bool {
    let mut changed = false;
    let mut index = 0;
    while index < func.block(block).len() {
        if try_fold(func, block, index) {
            changed = true;
        } else {
            index += 1;
        }
    }
    changed
}

fn try_fold(func: &mut Function, block: BlockId, position: usize) -> bool {
    let cmp_id = func.block(block).insts[position];
    let cmp = func.inst(cmp_id);

    if cmp.opcode != Opcode::Cmp || cmp.predicate.is_some() {
        return false;
    }
    let cm = match cmp.cond_mod {
        Some(cm) => cm,
        None => panic!("comparison without a condition modifier"),
    };
    if cmp.dst.is_some() {
        return false;
    }
    let (a, b) = (cmp.srcs[0], cmp.srcs[1]);
    let exec_width = cmp.exec_width;
    let mask_offset = cmp.mask_offset;

    // The flag must have exactly one consumer: the predicate of a select.
    let users = func.def_use.uses_of(cmp_id);
    let rec = match users.as_slice() {
        [rec] => *rec,
        _ => return false,
    };
    if rec.def_slot != Slot::CondMod || rec.use_slot != Slot::Pred {
        return false;
    }
    let sel_id = rec.user;
    let sel = func.inst(sel_id);
    if sel.opcode != Opcode::Sel || sel.cond_mod.is_some() || sel.saturate {
        return false;
    }
    let pred = sel.predicate.expect("ledger recorded a predicate edge");
    debug_assert_eq!(pred.flag, cm.flag);
    if sel.exec_width != exec_width || sel.mask_offset != mask_offset {
        return false;
    }
    let sel_position = match func.position_of(block, sel_id) {
        Some(p) => p,
        None => return false,
    };
    debug_assert!(sel_position > position);

    let mut cond = if sel.srcs[0] == a && sel.srcs[1] == b {
        cm.cond
    } else if sel.srcs[0] == b && sel.srcs[1] == a {
        cm.cond.reverse()
    } else {
        return false;
    };
    if pred.invert {
        cond = cond.negate();
    }

    // A reversed or negated relation leaves different bits in the flag.
    // The single recorded use makes that private to this block; a read in
    // a later block would not be recorded, so it must be ruled out.
    if cond != cm.cond && func.def_use.read_outside(cm.flag, block) {
        return false;
    }

    // The select re-evaluates the relation at its own position, so each
    // compared value must be unchanged in between: same reaching defs, or
    // for values defined outside the block, no intervening write.
    for (sel_slot, operand) in [(0u8, sel.srcs[0]), (1u8, sel.srcs[1])] {
        let region = match operand {
            Operand::Reg(region) => region,
            Operand::Imm(_) => continue,
        };
        let cmp_slot = if operand == a { Slot::Src(0) } else { Slot::Src(1) };
        let sel_defs = func.def_use.defs_of(sel_id, Slot::Src(sel_slot));
        let cmp_defs = func.def_use.defs_of(cmp_id, cmp_slot);
        let same_defs = sel_defs.len() == cmp_defs.len()
            && cmp_defs
                .iter()
                .all(|d| sel_defs.iter().any(|s| s.def == d.def && s.def_slot == d.def_slot));
        if !same_defs {
            return false;
        }
        if sel_defs.is_empty() {
            let range = region.byte_range(exec_width);
            if region.indirect.is_some()
                || writes_storage_in_range(func, block, position, sel_position, region.decl, &range)
            {
                return false;
            }
        }
    }

    // The flag write moves down to the select's position; nothing in
    // between may touch it. The single-use check already rules out readers,
    // this rules out writers.
    let flag_range = func.inst(cmp_id).flag_byte_range();
    if touches_storage_in_range(func, block, position, sel_position, cm.flag, &flag_range) {
        return false;
    }

    let sel = func.inst_mut(sel_id);
    sel.predicate = None;
    sel.cond_mod = Some(CondMod { cond, flag: cm.flag });

    // The comparison's only consumer was the predicate we just dissolved;
    // deleting it tears down that edge and the select's mirror record.
    remove_at(func, block, cmp_id);
    true
}

fn remove_at(func: &mut Function, block: BlockId, id: InstId) {
    let position = func
        .position_of(block, id)
        .expect("instruction left its block");
    func.remove_inst(block, position);
}
