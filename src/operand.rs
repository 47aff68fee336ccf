use crate::{pool::PoolElement, typ::ElemType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegFile {
    /// General register file: virtual registers later colored by the
    /// allocator.
    Grf,
    /// Flag registers: boolean-vector storage written by condition
    /// modifiers and read by predicates.
    Flag,
    /// The implicit accumulator.
    Acc,
    /// Address registers used for indirect regions.
    Addr,
}

/// Named storage. Operands do not own storage; they reference declarations,
/// which may be aliased by several operands at different offsets.
#[derive(Debug, Clone)]
pub struct Decl {
    pub index: usize,
    pub file: RegFile,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub usize);

impl Default for DeclId {
    fn default() -> Self {
        DeclId(usize::MAX)
    }
}

impl From<usize> for DeclId {
    fn from(index: usize) -> Self {
        DeclId(index)
    }
}

impl From<DeclId> for usize {
    fn from(id: DeclId) -> Self {
        id.0
    }
}

impl PoolElement for Decl {
    type Id = DeclId;

    fn id(&self) -> Self::Id {
        DeclId(self.index)
    }

    fn set_id(&mut self, id: Self::Id) {
        self.index = id.0;
    }
}

/// Access pattern of a region: one element broadcast to every lane, or one
/// element per lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stride {
    Scalar,
    Unit,
}

impl Default for Stride {
    fn default() -> Self {
        Stride::Unit
    }
}

/// A region of storage: register file, declaration, starting byte offset,
/// element type and access pattern, with optional source modifiers and
/// optional indirection through an address register.
///
/// Regions are value types. Rewrites build a new region and swap it into an
/// instruction; a region shared by copy with another instruction is never
/// mutated through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    pub file: RegFile,
    pub decl: DeclId,
    pub offset: u32,
    pub elem: ElemType,
    pub stride: Stride,
    pub negate: bool,
    pub abs: bool,
    pub indirect: Option<DeclId>,
}

impl Default for RegFile {
    fn default() -> Self {
        RegFile::Grf
    }
}

impl Region {
    pub fn new(file: RegFile, decl: DeclId, elem: ElemType) -> Self {
        Region {
            file,
            decl,
            offset: 0,
            elem,
            stride: Stride::Unit,
            negate: false,
            abs: false,
            indirect: None,
        }
    }

    pub fn scalar(mut self) -> Self {
        self.stride = Stride::Scalar;
        self
    }

    pub fn at(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub fn absolute(mut self) -> Self {
        self.abs = true;
        self
    }

    pub fn retyped(mut self, elem: ElemType) -> Self {
        self.elem = elem;
        self
    }

    pub fn has_modifier(&self) -> bool {
        self.negate || self.abs
    }

    /// Byte range touched by a direct access at the given execution width.
    /// Indirect accesses are resolved conservatively by the hazard oracle,
    /// not here.
    pub fn byte_range(&self, exec_width: u8) -> std::ops::Range<u32> {
        let elem = self.elem.bytes();
        match self.stride {
            Stride::Scalar => self.offset..self.offset + elem,
            Stride::Unit => self.offset..self.offset + exec_width as u32 * elem,
        }
    }

    /// Same declaration, offset, element size and stride: reads of `self`
    /// observe exactly the bytes a write of `other` produced.
    pub fn same_storage(&self, other: &Region) -> bool {
        self.decl == other.decl
            && self.offset == other.offset
            && self.stride == other.stride
            && self.elem.bytes() == other.elem.bytes()
            && self.indirect.is_none()
            && other.indirect.is_none()
    }
}

/// An immediate: element type plus raw bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Imm {
    pub elem: ElemType,
    pub bits: u64,
}

impl Imm {
    pub fn f32(value: f32) -> Self {
        Imm {
            elem: ElemType::F32,
            bits: value.to_bits() as u64,
        }
    }

    pub fn d(value: i32) -> Self {
        Imm {
            elem: ElemType::S32,
            bits: value as u32 as u64,
        }
    }

    pub fn ud(value: u32) -> Self {
        Imm {
            elem: ElemType::U32,
            bits: value as u64,
        }
    }

    pub fn w(value: i16) -> Self {
        Imm {
            elem: ElemType::S16,
            bits: value as u16 as u64,
        }
    }

    pub fn uw(value: u16) -> Self {
        Imm {
            elem: ElemType::U16,
            bits: value as u64,
        }
    }

    pub fn zero(elem: ElemType) -> Self {
        Imm { elem, bits: 0 }
    }

    pub fn all_ones(elem: ElemType) -> Self {
        Imm {
            elem,
            bits: elem.all_ones(),
        }
    }

    /// True for the zero of any element type. Float zero has zero bits, so
    /// one test covers both (negative float zero is not treated as zero).
    pub fn is_zero(&self) -> bool {
        self.bits == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(Region),
    Imm(Imm),
}

impl Default for Operand {
    fn default() -> Self {
        Operand::Imm(Imm::default())
    }
}

impl Operand {
    pub fn as_reg(&self) -> Option<&Region> {
        match self {
            Operand::Reg(region) => Some(region),
            Operand::Imm(_) => None,
        }
    }

    pub fn as_imm(&self) -> Option<&Imm> {
        match self {
            Operand::Imm(imm) => Some(imm),
            Operand::Reg(_) => None,
        }
    }

    pub fn is_zero_imm(&self) -> bool {
        matches!(self, Operand::Imm(imm) if imm.is_zero())
    }
}

fn file_prefix(file: RegFile) -> &'static str {
    match file {
        RegFile::Grf => "v",
        RegFile::Flag => "f",
        RegFile::Acc => "acc",
        RegFile::Addr => "a",
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.negate {
            write!(f, "-")?;
        }
        if self.abs {
            write!(f, "|")?;
        }
        write!(f, "{}{}", file_prefix(self.file), self.decl.0)?;
        if let Some(addr) = self.indirect {
            write!(f, "[a{}]", addr.0)?;
        }
        if self.offset != 0 {
            write!(f, ".{}", self.offset)?;
        }
        write!(f, ":{}", self.elem)?;
        if self.stride == Stride::Scalar {
            write!(f, "<0>")?;
        }
        if self.abs {
            write!(f, "|")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Imm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.elem {
            ElemType::F32 => write!(f, "{}:f", f32::from_bits(self.bits as u32)),
            ElemType::S32 => write!(f, "{}:d", self.bits as u32 as i32),
            ElemType::S16 => write!(f, "{}:w", self.bits as u16 as i16),
            ElemType::S8 => write!(f, "{}:b", self.bits as u8 as i8),
            _ => write!(f, "{:#x}:{}", self.bits, self.elem),
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Operand::Reg(region) => write!(f, "{}", region),
            Operand::Imm(imm) => write!(f, "{}", imm),
        }
    }
}
