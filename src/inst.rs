use tinyvec::TinyVec;

use crate::{
    opcode::{Cond, Opcode},
    operand::{DeclId, Operand, Region},
    pool::PoolElement,
};

/// Execution-mask source: a flag register read per lane, optionally
/// inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Predicate {
    pub flag: DeclId,
    pub invert: bool,
}

/// Flag destination written as a side effect: per lane, the relation
/// evaluated on the instruction's result (or on src0 vs src1 for Cmp and
/// conditional Sel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondMod {
    pub cond: Cond,
    pub flag: DeclId,
}

/// Operand slots as recorded in the def-use ledger. `AccIn`/`AccOut` stand
/// for accumulator accesses implied by the opcode with no explicit operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Dst,
    CondMod,
    AccOut,
    Src(u8),
    Pred,
    AccIn,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub index: usize,
    pub opcode: Opcode,
    /// None is the null destination: the result is dropped, only side
    /// effects (condition modifier, implicit accumulator) remain.
    pub dst: Option<Region>,
    pub srcs: TinyVec<[Operand; 3]>,
    pub predicate: Option<Predicate>,
    pub cond_mod: Option<CondMod>,
    pub saturate: bool,
    /// Number of SIMD lanes this instruction processes.
    pub exec_width: u8,
    /// First lane of the wider lane space the execution mask refers to.
    pub mask_offset: u8,
}

impl Default for Inst {
    fn default() -> Self {
        Inst {
            index: usize::MAX,
            opcode: Opcode::Nop,
            dst: None,
            srcs: TinyVec::new(),
            predicate: None,
            cond_mod: None,
            saturate: false,
            exec_width: 1,
            mask_offset: 0,
        }
    }
}

impl Inst {
    pub fn new(opcode: Opcode, exec_width: u8, mask_offset: u8) -> Self {
        Inst {
            opcode,
            exec_width,
            mask_offset,
            ..Default::default()
        }
    }

    pub fn src_reg(&self, index: usize) -> Option<&Region> {
        self.srcs.get(index).and_then(|operand| operand.as_reg())
    }

    /// A plain unconditional copy with no modifiers and matching element
    /// size; candidate for copy renaming.
    pub fn is_raw_mov(&self) -> bool {
        if self.opcode != Opcode::Mov
            || self.predicate.is_some()
            || self.cond_mod.is_some()
            || self.saturate
        {
            return false;
        }
        let (dst, src) = match (&self.dst, self.src_reg(0)) {
            (Some(dst), Some(src)) => (dst, src),
            _ => return false,
        };
        !src.has_modifier()
            && src.indirect.is_none()
            && dst.indirect.is_none()
            && dst.elem == src.elem
            && dst.stride == src.stride
    }

    /// Byte range of flag storage covered by this instruction's execution
    /// mask. Flag registers hold one bit per lane; accesses are rounded out
    /// to whole bytes.
    pub fn flag_byte_range(&self) -> std::ops::Range<u32> {
        let first = self.mask_offset as u32 / 8;
        let last = (self.mask_offset as u32 + self.exec_width as u32 + 7) / 8;
        first..last
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InstId(pub usize);

impl Default for InstId {
    fn default() -> Self {
        InstId(usize::MAX)
    }
}

impl From<usize> for InstId {
    fn from(index: usize) -> Self {
        InstId(index)
    }
}

impl From<InstId> for usize {
    fn from(id: InstId) -> Self {
        id.0
    }
}

impl PoolElement for Inst {
    type Id = InstId;

    fn id(&self) -> Self::Id {
        InstId(self.index)
    }

    fn set_id(&mut self, id: Self::Id) {
        self.index = id.0;
    }
}

impl std::fmt::Display for Inst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(pred) = &self.predicate {
            write!(f, "({}f{}) ", if pred.invert { "-" } else { "+" }, pred.flag.0)?;
        }
        write!(f, "{}", self.opcode)?;
        if self.saturate {
            write!(f, ".sat")?;
        }
        if let Some(cm) = &self.cond_mod {
            write!(f, ".{}.f{}", cm.cond, cm.flag.0)?;
        }
        match &self.dst {
            Some(dst) => write!(f, " {}", dst)?,
            None => write!(f, " null")?,
        }
        for src in self.srcs.iter() {
            write!(f, ", {}", src)?;
        }
        write!(f, " <w{}", self.exec_width)?;
        if self.mask_offset != 0 {
            write!(f, "+{}", self.mask_offset)?;
        }
        write!(f, ">")
    }
}
