use crate::{
    block::BlockId,
    def_use::copy_def,
    function::Function,
    hazards::writes_storage_in_range,
    inst::Slot,
    operand::Operand,
};

/// Eliminates a raw copy whose consumers are all raw copies of the same
/// value, by renaming each consumer's source to the copied storage.
///
/// Turn this:  mov t, s ; mov u, t ; mov w, t
/// Into this:  mov u, s ; mov w, s
///
/// Legal only while the copied storage is not rewritten between the copy
/// and each consumer, and only within a bounded distance; past the bound
/// the rule declines. Renaming one copy can expose another, so the driver
/// reruns this rule to a fixed point.
pub fn rename_copies(func: &mut Function, block: BlockId) -> bool {
    let max_distance = func.options.max_copy_distance;
    let mut changed = false;
    let mut index = 0;
    while index < func.block(block).len() {
        if try_rename(func, block, index, max_distance) {
            changed = true;
        } else {
            index += 1;
        }
    }
    changed
}

fn try_rename(func: &mut Function, block: BlockId, position: usize, max_distance: usize) -> bool {
    let copy_id = func.block(block).insts[position];
    let copy = func.inst(copy_id);
    if !copy.is_raw_mov() {
        return false;
    }
    let src = match copy.src_reg(0) {
        Some(region) => *region,
        None => return false,
    };
    if src.indirect.is_some() {
        return false;
    }
    let exec_width = copy.exec_width;
    let mask_offset = copy.mask_offset;
    let src_range = src.byte_range(exec_width);

    // The copied value must have one definer; renaming substitutes its
    // storage for the copy's, so the value identity has to be unambiguous.
    if func.def_use.single_def(copy_id, Slot::Src(0)).is_none() {
        return false;
    }

    // Deleting the copy destroys its destination; edges are block-local,
    // so a read in a later block would never appear below.
    let copy_dst = func.inst(copy_id).dst.expect("raw mov without destination");
    if func.def_use.read_outside(copy_dst.decl, block) {
        return false;
    }

    let uses = func.def_use.uses_of(copy_id);
    if uses.is_empty() {
        return false;
    }
    let mut consumers = Vec::with_capacity(uses.len());
    for rec in uses.iter() {
        if rec.def_slot != Slot::Dst || rec.use_slot != Slot::Src(0) {
            return false;
        }
        let user = func.inst(rec.user);
        if !user.is_raw_mov()
            || user.exec_width != exec_width
            || user.mask_offset != mask_offset
        {
            return false;
        }
        // The consumer must read exactly what the copy wrote; a partial or
        // retyped read of the copied bytes cannot be renamed.
        let user_src = user.src_reg(0).expect("raw mov without register source");
        if !user_src.same_storage(&copy_dst) || user_src.elem != src.elem {
            return false;
        }
        let user_position = match func.position_of(block, rec.user) {
            Some(p) => p,
            None => return false,
        };
        debug_assert!(user_position > position);
        if user_position - position > max_distance {
            return false;
        }
        // The consumer will read the copied storage at its own position.
        if writes_storage_in_range(func, block, position, user_position, src.decl, &src_range) {
            return false;
        }
        consumers.push(rec.user);
    }

    for user_id in consumers {
        func.inst_mut(user_id).srcs[0] = Operand::Reg(src);
        func.def_use.remove_use_edges(user_id, Slot::Src(0));
        copy_def(func, user_id, Slot::Src(0), copy_id, Slot::Src(0), false);
    }
    func.remove_inst(block, position);
    true
}
