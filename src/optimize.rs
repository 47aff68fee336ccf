use crate::{
    block::BlockId,
    def_use,
    fold_selects::fold_selects,
    function::Function,
    fuse_accumulator::fuse_accumulator,
    lower_flag_logic::lower_flag_logic,
    propagate_cmods::propagate_cmods,
    rename_copies::rename_copies,
};

/// The local optimizer driver. Blocks are processed in program order; no
/// rewrite crosses a block boundary. Within a block the peephole rules run
/// to a fixed point, then accumulator fusion runs once.
///
/// Flag-logic lowering is not optional: the output contract forbids
/// pseudo-logic opcodes regardless of which rules are enabled.
pub fn optimize(func: &mut Function) {
    let options = func.options.clone();

    if options.dump_at_each_phase {
        print!("before local optimizer:\n{}", func);
    }

    for index in 0..func.num_blocks() {
        let block = BlockId(index);
        loop {
            let mut changed = false;

            changed |= run_rule(func, &options, |func| lower_flag_logic(func, block));
            if options.enable_cmod_propagation {
                changed |= run_rule(func, &options, |func| propagate_cmods(func, block));
            }
            if options.enable_select_folding {
                changed |= run_rule(func, &options, |func| fold_selects(func, block));
            }
            if options.enable_copy_renaming {
                changed |= run_rule(func, &options, |func| rename_copies(func, block));
            }

            if !changed {
                break;
            }
        }
        if options.enable_acc_fusion {
            run_rule(func, &options, |func| fuse_accumulator(func, block));
        }
    }

    if options.dump_at_each_phase {
        print!("after local optimizer:\n{}", func);
    }
}

fn run_rule(
    func: &mut Function,
    options: &crate::Options,
    rule: impl FnOnce(&mut Function) -> bool,
) -> bool {
    let changed = rule(func);
    if options.verify_ledger {
        def_use::verify(func);
    }
    changed
}
