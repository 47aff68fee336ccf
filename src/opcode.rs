use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// A no-op, useful when a rewrite wants to keep a slot in the list.
    Nop,

    /// Raw copy. With identical element types this is a bit copy; otherwise
    /// it converts numerically.
    Mov,

    /// Select. With a predicate: per lane, pick src0 where the predicate is
    /// set, src1 elsewhere. With a condition modifier it is the
    /// conditional-select form: per lane, compare src0 against src1 with the
    /// modifier's relation, write the outcome to the modifier's flag, and
    /// pick src0 where the relation holds.
    Sel,

    /// Native bitwise ops. These operate on register data, including flag
    /// storage addressed as plain integers after flag-logic lowering.
    Not,
    And,
    Or,
    Xor,

    Shl,
    Shr,
    Asr,

    /// Comparison. Writes its condition-modifier flag per lane; the
    /// destination is normally null.
    Cmp,

    Add,
    Mul,

    /// Floating-point fraction (x - floor(x)) and round-down.
    Frc,
    Rndd,

    /// Abstract multiply-add: dst = src0 * src1 + src2. The accumulator
    /// fusion engine rewrites chains of these into Mac.
    Mad,

    /// Fused multiply-accumulate: dst = src0 * src1 + accumulator. The
    /// accumulator read does not appear as an operand.
    Mac,

    /// High half of the widened product. Writes the accumulator as a side
    /// effect; no explicit accumulator operand is ever legal on it.
    Mach,

    /// Abstract logic over flag-typed operands. These cannot be encoded and
    /// must be lowered by lower_flag_logic before the optimizer hands the
    /// function onward.
    PseudoNot,
    PseudoAnd,
    PseudoOr,
    PseudoXor,

    /// Marks the end of a storage live range. Never moves past a later true
    /// use of the storage it names.
    LifetimeEnd,
}

pub const NUM_OPCODES: usize = Opcode::LifetimeEnd as usize + 1;

pub const OPCODES: [Opcode; NUM_OPCODES] = [
    Opcode::Nop,
    Opcode::Mov,
    Opcode::Sel,
    Opcode::Not,
    Opcode::And,
    Opcode::Or,
    Opcode::Xor,
    Opcode::Shl,
    Opcode::Shr,
    Opcode::Asr,
    Opcode::Cmp,
    Opcode::Add,
    Opcode::Mul,
    Opcode::Frc,
    Opcode::Rndd,
    Opcode::Mad,
    Opcode::Mac,
    Opcode::Mach,
    Opcode::PseudoNot,
    Opcode::PseudoAnd,
    Opcode::PseudoOr,
    Opcode::PseudoXor,
    Opcode::LifetimeEnd,
];

/// What an opcode may do with the implicit accumulator. This is hardware
/// configuration: the fusion engine consults it through `HwCaps` and never
/// derives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccRestriction {
    NoRestriction,
    /// May not touch the accumulator at all.
    NoAccess,
    /// Accumulator legal as a source only.
    SrcOnly,
    /// Accumulator legal as a destination only.
    NoSrc,
    /// No explicit accumulator operand, but the opcode writes it implicitly.
    ImplicitWriteOnly,
    /// Accumulator legal as destination or source, not both.
    DstOrSrcNotBoth,
    /// Accumulator source illegal when the operand type is integer.
    NoIntSrc,
    /// Accumulator operands legal only without source modifiers/saturation.
    NoModifier,
}

/// Static per-opcode capabilities consulted by the hazard oracle, the rule
/// engine and the fusion engine.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    /// Minimum and maximum source arity.
    pub min_srcs: u8,
    pub max_srcs: u8,
    /// Accepts a condition modifier at all.
    pub accepts_cond_mod: bool,
    /// A comparison may fold its condition modifier onto this opcode.
    /// Excludes Sel (a modifier changes its meaning) and Cmp itself.
    pub cmod_foldable: bool,
    /// Reads the accumulator with no explicit operand.
    pub reads_acc: bool,
    /// Writes the accumulator with no explicit operand.
    pub writes_acc: bool,
    /// Baseline accumulator restriction class; `HwCaps` may override.
    pub acc_restriction: AccRestriction,
}

const fn info(
    min_srcs: u8,
    max_srcs: u8,
    accepts_cond_mod: bool,
    cmod_foldable: bool,
    reads_acc: bool,
    writes_acc: bool,
    acc_restriction: AccRestriction,
) -> OpInfo {
    OpInfo {
        min_srcs,
        max_srcs,
        accepts_cond_mod,
        cmod_foldable,
        reads_acc,
        writes_acc,
        acc_restriction,
    }
}

static OP_INFO: Lazy<[OpInfo; NUM_OPCODES]> = Lazy::new(|| {
    use AccRestriction::*;

    let mut table = [info(0, 0, false, false, false, false, NoAccess); NUM_OPCODES];

    table[Opcode::Nop as usize] = info(0, 0, false, false, false, false, NoAccess);
    table[Opcode::Mov as usize] = info(1, 1, true, true, false, false, NoRestriction);
    table[Opcode::Sel as usize] = info(2, 2, true, false, false, false, NoAccess);
    table[Opcode::Not as usize] = info(1, 1, true, true, false, false, NoAccess);
    table[Opcode::And as usize] = info(2, 2, true, true, false, false, NoAccess);
    table[Opcode::Or as usize] = info(2, 2, true, true, false, false, NoAccess);
    table[Opcode::Xor as usize] = info(2, 2, true, true, false, false, NoAccess);
    table[Opcode::Shl as usize] = info(2, 2, true, true, false, false, NoSrc);
    table[Opcode::Shr as usize] = info(2, 2, true, true, false, false, NoSrc);
    table[Opcode::Asr as usize] = info(2, 2, true, true, false, false, SrcOnly);
    table[Opcode::Cmp as usize] = info(2, 2, true, false, false, false, NoAccess);
    table[Opcode::Add as usize] = info(2, 2, true, true, false, false, NoRestriction);
    table[Opcode::Mul as usize] = info(2, 2, true, true, false, false, NoIntSrc);
    table[Opcode::Frc as usize] = info(1, 1, true, true, false, false, NoModifier);
    table[Opcode::Rndd as usize] = info(1, 1, true, true, false, false, NoAccess);
    table[Opcode::Mad as usize] = info(3, 3, true, true, false, false, DstOrSrcNotBoth);
    table[Opcode::Mac as usize] = info(2, 2, true, true, true, false, NoRestriction);
    table[Opcode::Mach as usize] = info(2, 2, true, false, false, true, ImplicitWriteOnly);
    table[Opcode::PseudoNot as usize] = info(1, 1, false, false, false, false, NoAccess);
    table[Opcode::PseudoAnd as usize] = info(2, 2, false, false, false, false, NoAccess);
    table[Opcode::PseudoOr as usize] = info(2, 2, false, false, false, false, NoAccess);
    table[Opcode::PseudoXor as usize] = info(2, 2, false, false, false, false, NoAccess);
    table[Opcode::LifetimeEnd as usize] = info(1, 1, false, false, false, false, NoAccess);

    table
});

impl Opcode {
    pub fn info(self) -> &'static OpInfo {
        &OP_INFO[self as usize]
    }

    pub const fn is_pseudo_logic(self) -> bool {
        matches!(
            self,
            Opcode::PseudoNot | Opcode::PseudoAnd | Opcode::PseudoOr | Opcode::PseudoXor
        )
    }

    /// The concrete logic opcode for a pseudo-logic opcode.
    pub fn native_logic(self) -> Opcode {
        match self {
            Opcode::PseudoNot => Opcode::Not,
            Opcode::PseudoAnd => Opcode::And,
            Opcode::PseudoOr => Opcode::Or,
            Opcode::PseudoXor => Opcode::Xor,
            _ => panic!("not a pseudo-logic opcode: {}", self),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Mov => "mov",
            Opcode::Sel => "sel",
            Opcode::Not => "not",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::Asr => "asr",
            Opcode::Cmp => "cmp",
            Opcode::Add => "add",
            Opcode::Mul => "mul",
            Opcode::Frc => "frc",
            Opcode::Rndd => "rndd",
            Opcode::Mad => "mad",
            Opcode::Mac => "mac",
            Opcode::Mach => "mach",
            Opcode::PseudoNot => "pseudo_not",
            Opcode::PseudoAnd => "pseudo_and",
            Opcode::PseudoOr => "pseudo_or",
            Opcode::PseudoXor => "pseudo_xor",
            Opcode::LifetimeEnd => "lifetime_end",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Comparison relation carried by a condition modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    Z,
    Nz,
    G,
    Ge,
    L,
    Le,
}

impl Cond {
    /// Logical negation: cond(a, b) == !negate(cond)(a, b).
    pub fn negate(self) -> Cond {
        match self {
            Cond::Z => Cond::Nz,
            Cond::Nz => Cond::Z,
            Cond::G => Cond::Le,
            Cond::Le => Cond::G,
            Cond::Ge => Cond::L,
            Cond::L => Cond::Ge,
        }
    }

    /// Operand swap: cond(a, b) == reverse(cond)(b, a).
    pub fn reverse(self) -> Cond {
        match self {
            Cond::Z => Cond::Z,
            Cond::Nz => Cond::Nz,
            Cond::G => Cond::L,
            Cond::L => Cond::G,
            Cond::Ge => Cond::Le,
            Cond::Le => Cond::Ge,
        }
    }

    /// Ordering relations care about the signedness of the compared type;
    /// equality relations do not.
    pub const fn is_ordering(self) -> bool {
        matches!(self, Cond::G | Cond::Ge | Cond::L | Cond::Le)
    }
}

impl std::fmt::Display for Cond {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Cond::Z => write!(f, "z"),
            Cond::Nz => write!(f, "nz"),
            Cond::G => write!(f, "g"),
            Cond::Ge => write!(f, "ge"),
            Cond::L => write!(f, "l"),
            Cond::Le => write!(f, "le"),
        }
    }
}
