use crate::{
    block::BlockId,
    function::Function,
    inst::{CondMod, Inst, InstId, Predicate},
    opcode::{Cond, Opcode},
    operand::{DeclId, Imm, Operand, RegFile, Region},
    typ::ElemType,
};

/// Appends instructions to one block. The lowering stage that feeds the
/// optimizer builds functions through this; so do the tests.
pub struct BlockBuilder<'a> {
    pub func: &'a mut Function,
    pub block: BlockId,
    pub exec_width: u8,
    pub mask_offset: u8,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(func: &'a mut Function, block: BlockId) -> Self {
        BlockBuilder {
            func,
            block,
            exec_width: 8,
            mask_offset: 0,
        }
    }

    pub fn with_exec(mut self, exec_width: u8, mask_offset: u8) -> Self {
        self.exec_width = exec_width;
        self.mask_offset = mask_offset;
        self
    }

    pub fn push(&mut self, inst: Inst) -> InstId {
        self.func.append_inst(self.block, inst)
    }

    fn inst(&self, opcode: Opcode) -> Inst {
        Inst::new(opcode, self.exec_width, self.mask_offset)
    }

    /// A fresh general-register region sized for this builder's execution
    /// mask.
    pub fn grf(&mut self, elem: ElemType) -> Region {
        let size = (self.mask_offset as u32 + self.exec_width as u32) * elem.bytes();
        let decl = self.func.new_grf(size.max(elem.bytes()));
        Region::new(RegFile::Grf, decl, elem)
    }

    pub fn grf_sized(&mut self, size: u32) -> DeclId {
        self.func.new_grf(size)
    }

    pub fn flag_reg(&self, index: usize) -> Region {
        Region::new(RegFile::Flag, self.func.flag(index), ElemType::U16)
    }

    pub fn zero(&self, elem: ElemType) -> Operand {
        Operand::Imm(Imm::zero(elem))
    }

    pub fn mov(&mut self, dst: Option<Region>, src: Operand) -> InstId {
        let mut inst = self.inst(Opcode::Mov);
        inst.dst = dst;
        inst.srcs.push(src);
        self.push(inst)
    }

    pub fn alu1(&mut self, opcode: Opcode, dst: Option<Region>, a: Operand) -> InstId {
        let mut inst = self.inst(opcode);
        inst.dst = dst;
        inst.srcs.push(a);
        self.push(inst)
    }

    pub fn alu2(&mut self, opcode: Opcode, dst: Option<Region>, a: Operand, b: Operand) -> InstId {
        let mut inst = self.inst(opcode);
        inst.dst = dst;
        inst.srcs.push(a);
        inst.srcs.push(b);
        self.push(inst)
    }

    pub fn mad(&mut self, dst: Region, a: Operand, b: Operand, c: Operand) -> InstId {
        let mut inst = self.inst(Opcode::Mad);
        inst.dst = Some(dst);
        inst.srcs.push(a);
        inst.srcs.push(b);
        inst.srcs.push(c);
        self.push(inst)
    }

    /// Comparison writing flag `flag_index`; the destination stays null.
    pub fn cmp(&mut self, cond: Cond, flag_index: usize, a: Operand, b: Operand) -> InstId {
        let mut inst = self.inst(Opcode::Cmp);
        inst.cond_mod = Some(CondMod {
            cond,
            flag: self.func.flag(flag_index),
        });
        inst.srcs.push(a);
        inst.srcs.push(b);
        self.push(inst)
    }

    /// Predicated select.
    pub fn sel(
        &mut self,
        dst: Region,
        flag_index: usize,
        invert: bool,
        a: Operand,
        b: Operand,
    ) -> InstId {
        let mut inst = self.inst(Opcode::Sel);
        inst.dst = Some(dst);
        inst.predicate = Some(Predicate {
            flag: self.func.flag(flag_index),
            invert,
        });
        inst.srcs.push(a);
        inst.srcs.push(b);
        self.push(inst)
    }

    /// Abstract two-source logic over flag registers.
    pub fn pseudo2(
        &mut self,
        opcode: Opcode,
        dst_flag: usize,
        a_flag: usize,
        b_flag: usize,
    ) -> InstId {
        assert!(opcode.is_pseudo_logic());
        let mut inst = self.inst(opcode);
        inst.dst = Some(self.flag_reg(dst_flag));
        inst.srcs.push(Operand::Reg(self.flag_reg(a_flag)));
        inst.srcs.push(Operand::Reg(self.flag_reg(b_flag)));
        self.push(inst)
    }

    pub fn pseudo_not(&mut self, dst_flag: usize, src_flag: usize) -> InstId {
        let mut inst = self.inst(Opcode::PseudoNot);
        inst.dst = Some(self.flag_reg(dst_flag));
        inst.srcs.push(Operand::Reg(self.flag_reg(src_flag)));
        self.push(inst)
    }

    pub fn lifetime_end(&mut self, region: Region) -> InstId {
        let mut inst = self.inst(Opcode::LifetimeEnd);
        inst.srcs.push(Operand::Reg(region));
        self.push(inst)
    }
}
