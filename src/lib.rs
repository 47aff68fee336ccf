//! Local optimizer for a SIMD execution-unit shader IR.
//!
//! The input is a function of basic blocks produced by an earlier lowering
//! stage; the output is the same IR shape with comparisons folded into
//! condition modifiers, selects carrying their own relation, flag-logic
//! pseudo-ops lowered to hardware form, redundant copies renamed away, and
//! multiply-add chains fused onto the implicit accumulator. All mutation
//! flows through the def-use ledger and is vetted by the hazard oracle.

pub mod block;
pub mod builder;
pub mod def_use;
pub mod fold_selects;
pub mod function;
pub mod fuse_accumulator;
pub mod hazards;
pub mod inst;
pub mod interp;
pub mod lower_flag_logic;
pub mod opcode;
pub mod operand;
pub mod optimize;
pub mod pool;
pub mod propagate_cmods;
pub mod rename_copies;
pub mod typ;


pub use block::BlockId;
pub use builder::BlockBuilder;
pub use function::Function;
pub use inst::{CondMod, Inst, InstId, Predicate, Slot};
pub use opcode::{AccRestriction, Cond, Opcode, NUM_OPCODES, OPCODES};
pub use operand::{Decl, DeclId, Imm, Operand, RegFile, Region, Stride};
pub use optimize::optimize;
pub use typ::ElemType;

/// How much work the driver does. `None` still lowers pseudo-logic ops;
/// the output contract requires it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    None,
    Local,
}

/// Pass configuration. The driver receives this at function construction
/// and never consults ambient state.
#[derive(Debug, Clone)]
pub struct Options {
    pub opt_level: OptLevel,
    pub enable_cmod_propagation: bool,
    pub enable_select_folding: bool,
    pub enable_copy_renaming: bool,
    pub enable_acc_fusion: bool,
    /// Furthest a renamed copy's consumer may sit below the copy.
    pub max_copy_distance: usize,
    /// Longest consumer chain accumulator fusion will follow.
    pub max_consumer_hops: usize,
    pub dump_at_each_phase: bool,
    /// Recompute and compare the ledger after every rule. Expensive;
    /// meant for tests and debugging.
    pub verify_ledger: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            opt_level: OptLevel::Local,
            enable_cmod_propagation: true,
            enable_select_folding: true,
            enable_copy_renaming: true,
            enable_acc_fusion: true,
            max_copy_distance: 16,
            max_consumer_hops: 4,
            dump_at_each_phase: false,
            verify_ledger: false,
        }
    }
}

impl Options {
    pub fn from_opt_level(opt_level: OptLevel) -> Self {
        let enabled = opt_level != OptLevel::None;
        Options {
            opt_level,
            enable_cmod_propagation: enabled,
            enable_select_folding: enabled,
            enable_copy_renaming: enabled,
            enable_acc_fusion: enabled,
            ..Options::default()
        }
    }
}

/// Hardware description consumed by the optimizer. The accumulator
/// restriction table is configuration data; the engines consult it and
/// never derive it from opcode semantics.
#[derive(Debug, Clone)]
pub struct HwCaps {
    /// The byte ALU can feed byte-typed multiply-accumulate chains.
    pub byte_mac: bool,
    pub num_flag_regs: usize,
    pub acc_bytes: u32,
    acc_restrictions: [AccRestriction; NUM_OPCODES],
}

impl Default for HwCaps {
    fn default() -> Self {
        HwCaps {
            byte_mac: false,
            num_flag_regs: 4,
            acc_bytes: 128,
            acc_restrictions: std::array::from_fn(|i| OPCODES[i].info().acc_restriction),
        }
    }
}

impl HwCaps {
    pub fn restriction(&self, opcode: Opcode) -> AccRestriction {
        self.acc_restrictions[opcode as usize]
    }

    pub fn set_restriction(&mut self, opcode: Opcode, restriction: AccRestriction) {
        self.acc_restrictions[opcode as usize] = restriction;
    }
}
