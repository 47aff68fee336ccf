/// Element types for register regions and immediates. These name the data
/// layout of a single SIMD channel, not the width of the whole region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    F32,
    S32,
    U32,
    S16,
    U16,
    S8,
    U8,
}

impl Default for ElemType {
    fn default() -> Self {
        ElemType::U32
    }
}

impl ElemType {
    pub const fn bytes(self) -> u32 {
        match self {
            ElemType::F32 | ElemType::S32 | ElemType::U32 => 4,
            ElemType::S16 | ElemType::U16 => 2,
            ElemType::S8 | ElemType::U8 => 1,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ElemType::F32)
    }

    pub const fn is_int(self) -> bool {
        !self.is_float()
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, ElemType::S32 | ElemType::S16 | ElemType::S8)
    }

    /// Byte and word types. These are the types that terminate an
    /// accumulator consumer chain.
    pub const fn is_narrow(self) -> bool {
        self.bytes() <= 2
    }

    /// Same-size integer type with the requested signedness. Used when a
    /// folded ordering comparison imposes its signedness on the defining
    /// instruction's destination.
    pub fn with_signedness(self, signed: bool) -> ElemType {
        match (self.bytes(), signed) {
            _ if self.is_float() => self,
            (4, true) => ElemType::S32,
            (4, false) => ElemType::U32,
            (2, true) => ElemType::S16,
            (2, false) => ElemType::U16,
            (1, true) => ElemType::S8,
            (1, false) => ElemType::U8,
            _ => unreachable!(),
        }
    }

    /// All-ones bit pattern for this type, as raw immediate bits.
    pub const fn all_ones(self) -> u64 {
        match self.bytes() {
            1 => 0xff,
            2 => 0xffff,
            4 => 0xffff_ffff,
            _ => unreachable!(),
        }
    }
}

impl std::fmt::Display for ElemType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ElemType::F32 => write!(f, "f"),
            ElemType::S32 => write!(f, "d"),
            ElemType::U32 => write!(f, "ud"),
            ElemType::S16 => write!(f, "w"),
            ElemType::U16 => write!(f, "uw"),
            ElemType::S8 => write!(f, "b"),
            ElemType::U8 => write!(f, "ub"),
        }
    }
}
