use indexmap::IndexMap;

use crate::{
    block::BlockId,
    function::Function,
    inst::Inst,
    opcode::{Cond, Opcode},
    operand::{DeclId, Imm, Operand, RegFile, Region, Stride},
    typ::ElemType,
};

/// Reference emulator: executes a function over plain byte storage, lane
/// by lane, modeling predicates, condition modifiers and the implicit
/// accumulator. The rewrite tests run a block before and after a rule and
/// compare final storage.
///
/// Accumulator cells are four bytes per lane regardless of element type,
/// matching how the hazard oracle tracks them.
pub struct Machine {
    storage: IndexMap<DeclId, Vec<u8>>,
}

/// A lane value: floating-point, or an integer numerically widened from
/// its storage type (sign-extended when signed).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    F(f32),
    I(i64),
}

impl Machine {
    pub fn new(func: &Function) -> Self {
        let mut storage = IndexMap::new();
        for id in func.decls.ids() {
            let size = func.decl(id).size as usize;
            storage.insert(id, vec![0u8; size]);
        }
        Machine { storage }
    }

    pub fn bytes(&self, decl: DeclId) -> &[u8] {
        &self.storage[&decl]
    }

    pub fn bytes_mut(&mut self, decl: DeclId) -> &mut [u8] {
        self.storage.get_mut(&decl).expect("unknown declaration")
    }

    pub fn store(&mut self, decl: DeclId, offset: usize, bytes: &[u8]) {
        self.bytes_mut(decl)[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn flag_bit(&self, decl: DeclId, lane: u32) -> bool {
        self.bytes(decl)[lane as usize / 8] >> (lane % 8) & 1 != 0
    }

    pub fn set_flag_bit(&mut self, decl: DeclId, lane: u32, value: bool) {
        let byte = &mut self.bytes_mut(decl)[lane as usize / 8];
        if value {
            *byte |= 1 << (lane % 8);
        } else {
            *byte &= !(1 << (lane % 8));
        }
    }

    pub fn run(&mut self, func: &Function) {
        for index in 0..func.num_blocks() {
            self.run_block(func, BlockId(index));
        }
    }

    pub fn run_block(&mut self, func: &Function, block: BlockId) {
        for &id in func.block(block).insts.iter() {
            self.step(func, func.inst(id));
        }
    }

    fn step(&mut self, func: &Function, inst: &Inst) {
        match inst.opcode {
            Opcode::Nop | Opcode::LifetimeEnd => {}
            Opcode::Sel => self.step_sel(func, inst),
            op if op.is_pseudo_logic() => self.step_pseudo(inst),
            _ => self.step_alu(func, inst),
        }
    }

    fn lanes(inst: &Inst) -> std::ops::Range<u32> {
        let base = inst.mask_offset as u32;
        base..base + inst.exec_width as u32
    }

    fn enabled(&self, inst: &Inst, lane: u32) -> bool {
        match &inst.predicate {
            Some(pred) => self.flag_bit(pred.flag, lane) != pred.invert,
            None => true,
        }
    }

    /// Select executes on every lane; its predicate is a data input, not an
    /// execution mask. The condition-modifier form evaluates the relation
    /// itself and writes the flag.
    fn step_sel(&mut self, func: &Function, inst: &Inst) {
        for lane in Self::lanes(inst) {
            let a = self.read(func, inst, lane, &inst.srcs[0]);
            let b = self.read(func, inst, lane, &inst.srcs[1]);
            let take_first = if let Some(cm) = &inst.cond_mod {
                let holds = compare(cm.cond, a, b);
                self.set_flag_bit(cm.flag, lane, holds);
                holds
            } else {
                let pred = inst.predicate.expect("select needs a predicate or modifier");
                self.flag_bit(pred.flag, lane) != pred.invert
            };
            let value = if take_first { a } else { b };
            if let Some(dst) = &inst.dst {
                self.write_region(func, inst, lane, dst, value, inst.saturate);
            }
        }
    }

    fn step_pseudo(&mut self, inst: &Inst) {
        let dst = inst.dst.expect("pseudo-logic op with null destination");
        for lane in Self::lanes(inst) {
            if !self.enabled(inst, lane) {
                continue;
            }
            let bit = |m: &Machine, i: usize| {
                let region = inst.srcs[i].as_reg().expect("flag operand");
                m.flag_bit(region.decl, lane)
            };
            let value = match inst.opcode {
                Opcode::PseudoNot => !bit(self, 0),
                Opcode::PseudoAnd => bit(self, 0) && bit(self, 1),
                Opcode::PseudoOr => bit(self, 0) || bit(self, 1),
                Opcode::PseudoXor => bit(self, 0) != bit(self, 1),
                _ => unreachable!(),
            };
            self.set_flag_bit(dst.decl, lane, value);
        }
    }

    fn step_alu(&mut self, func: &Function, inst: &Inst) {
        for lane in Self::lanes(inst) {
            if !self.enabled(inst, lane) {
                continue;
            }
            let src = |m: &Machine, i: usize| m.read(func, inst, lane, &inst.srcs[i]);
            let result = match inst.opcode {
                Opcode::Mov => convert(src(self, 0), dst_elem(inst)),
                Opcode::Not => int1(src(self, 0), |a| !a),
                Opcode::And => int2(src(self, 0), src(self, 1), |a, b| a & b),
                Opcode::Or => int2(src(self, 0), src(self, 1), |a, b| a | b),
                Opcode::Xor => int2(src(self, 0), src(self, 1), |a, b| a ^ b),
                Opcode::Shl => int2(src(self, 0), src(self, 1), |a, b| a << (b & 31)),
                Opcode::Shr => {
                    int2(src(self, 0), src(self, 1), |a, b| {
                        ((a as u64 & mask_of(dst_elem(inst))) >> (b & 31)) as i64
                    })
                }
                Opcode::Asr => int2(src(self, 0), src(self, 1), |a, b| a >> (b & 31)),
                Opcode::Cmp => {
                    let holds = compare(
                        inst.cond_mod.expect("comparison without a modifier").cond,
                        src(self, 0),
                        src(self, 1),
                    );
                    let cm = inst.cond_mod.unwrap();
                    self.set_flag_bit(cm.flag, lane, holds);
                    if let Some(dst) = &inst.dst {
                        let bits = if holds { dst.elem.all_ones() as i64 } else { 0 };
                        self.write_region(func, inst, lane, dst, Val::I(bits), false);
                    }
                    continue;
                }
                Opcode::Add => num2(src(self, 0), src(self, 1), |a, b| a + b, |a, b| a.wrapping_add(b)),
                Opcode::Mul => num2(src(self, 0), src(self, 1), |a, b| a * b, |a, b| a.wrapping_mul(b)),
                Opcode::Frc => float1(src(self, 0), |a| a - a.floor()),
                Opcode::Rndd => float1(src(self, 0), |a| a.floor()),
                Opcode::Mad => {
                    let (a, b, c) = (src(self, 0), src(self, 1), src(self, 2));
                    mad(a, b, c)
                }
                Opcode::Mac => {
                    let acc = self.read_acc(func, lane, dst_elem(inst));
                    mad(src(self, 0), src(self, 1), acc)
                }
                Opcode::Mach => {
                    let (a, b) = (int_of(src(self, 0)), int_of(src(self, 1)));
                    let product = a.wrapping_mul(b);
                    self.write_acc(func, lane, ElemType::U32, Val::I(product & 0xffff_ffff));
                    Val::I(product >> 32)
                }
                op => panic!("cannot interpret {}", op),
            };

            if let Some(cm) = &inst.cond_mod {
                // The flag reflects the result as the destination stores
                // it, truncated to the element width and reinterpreted
                // with its signedness.
                let flagged = match &inst.dst {
                    Some(dst) => stored_view(result, dst.elem),
                    None => result,
                };
                self.set_flag_bit(cm.flag, lane, compare_zero(cm.cond, flagged));
            }
            if let Some(dst) = &inst.dst {
                self.write_region(func, inst, lane, dst, result, inst.saturate);
            }
        }
    }

    fn read(&self, func: &Function, inst: &Inst, lane: u32, operand: &Operand) -> Val {
        match operand {
            Operand::Imm(imm) => imm_val(imm),
            Operand::Reg(region) => {
                let raw = if region.file == RegFile::Acc {
                    self.read_acc(func, lane, region.elem)
                } else {
                    let offset = self.region_offset(inst, lane, region);
                    load(self.bytes(region.decl), offset, region.elem)
                };
                self.modify(raw, region)
            }
        }
    }

    fn modify(&self, value: Val, region: &Region) -> Val {
        let mut value = value;
        if region.abs {
            value = match value {
                Val::F(f) => Val::F(f.abs()),
                Val::I(i) => Val::I(i.abs()),
            };
        }
        if region.negate {
            value = match value {
                Val::F(f) => Val::F(-f),
                Val::I(i) => Val::I(-i),
            };
        }
        value
    }

    fn region_offset(&self, inst: &Inst, lane: u32, region: &Region) -> usize {
        let indirect = match region.indirect {
            Some(addr) => load(self.bytes(addr), 0, ElemType::U16),
            None => Val::I(0),
        };
        let base = region.offset as i64 + int_of(indirect);
        let elem = region.elem.bytes() as i64;
        let within = match region.stride {
            Stride::Scalar => 0,
            Stride::Unit => (lane - inst.mask_offset as u32) as i64 * elem,
        };
        usize::try_from(base + within).expect("region offset out of range")
    }

    fn write_region(
        &mut self,
        func: &Function,
        inst: &Inst,
        lane: u32,
        region: &Region,
        value: Val,
        saturate: bool,
    ) {
        let value = if saturate { saturated(value, region.elem) } else { value };
        if region.file == RegFile::Acc {
            self.write_acc(func, lane, region.elem, value);
            return;
        }
        let offset = self.region_offset(inst, lane, region);
        store(self.bytes_mut(region.decl), offset, region.elem, value);
    }

    fn read_acc(&self, func: &Function, lane: u32, elem: ElemType) -> Val {
        load(self.bytes(func.acc()), lane as usize * 4, elem)
    }

    fn write_acc(&mut self, func: &Function, lane: u32, elem: ElemType, value: Val) {
        let cell = lane as usize * 4;
        let acc = func.acc();
        self.bytes_mut(acc)[cell..cell + 4].copy_from_slice(&[0; 4]);
        store(self.bytes_mut(acc), cell, elem, value);
    }
}

fn dst_elem(inst: &Inst) -> ElemType {
    inst.dst.map(|dst| dst.elem).unwrap_or_default()
}

fn imm_val(imm: &Imm) -> Val {
    if imm.elem.is_float() {
        Val::F(f32::from_bits(imm.bits as u32))
    } else {
        Val::I(sign_extend(imm.bits, imm.elem))
    }
}

fn load(bytes: &[u8], offset: usize, elem: ElemType) -> Val {
    let size = elem.bytes() as usize;
    let mut raw = [0u8; 8];
    raw[..size].copy_from_slice(&bytes[offset..offset + size]);
    let bits = u64::from_le_bytes(raw);
    if elem.is_float() {
        Val::F(f32::from_bits(bits as u32))
    } else {
        Val::I(sign_extend(bits, elem))
    }
}

fn store(bytes: &mut [u8], offset: usize, elem: ElemType, value: Val) {
    let size = elem.bytes() as usize;
    let bits = match value {
        Val::F(f) => {
            if elem.is_float() {
                f.to_bits() as u64
            } else {
                (f.trunc() as i64) as u64
            }
        }
        Val::I(i) => {
            if elem.is_float() {
                return store(bytes, offset, elem, Val::F(i as f32));
            }
            i as u64
        }
    };
    bytes[offset..offset + size].copy_from_slice(&bits.to_le_bytes()[..size]);
}

/// The value a later read of storage with this element type would observe
/// after the result is stored: a store/load round trip through raw bytes.
fn stored_view(value: Val, elem: ElemType) -> Val {
    let mut raw = [0u8; 8];
    store(&mut raw, 0, elem, value);
    load(&raw, 0, elem)
}

fn sign_extend(bits: u64, elem: ElemType) -> i64 {
    let width = elem.bytes() * 8;
    if elem.is_signed() {
        let shift = 64 - width;
        ((bits << shift) as i64) >> shift
    } else {
        (bits & mask_of(elem)) as i64
    }
}

fn mask_of(elem: ElemType) -> u64 {
    match elem.bytes() {
        1 => 0xff,
        2 => 0xffff,
        _ => 0xffff_ffff,
    }
}

fn int_of(value: Val) -> i64 {
    match value {
        Val::I(i) => i,
        Val::F(f) => panic!("integer operation on float value {}", f),
    }
}

fn float_of(value: Val) -> f32 {
    match value {
        Val::F(f) => f,
        Val::I(i) => panic!("float operation on integer value {}", i),
    }
}

fn convert(value: Val, elem: ElemType) -> Val {
    match (value, elem.is_float()) {
        (Val::F(f), true) => Val::F(f),
        (Val::I(i), false) => Val::I(i),
        (Val::I(i), true) => Val::F(i as f32),
        (Val::F(f), false) => Val::I(f.trunc() as i64),
    }
}

fn int1(a: Val, op: impl Fn(i64) -> i64) -> Val {
    Val::I(op(int_of(a)))
}

fn int2(a: Val, b: Val, op: impl Fn(i64, i64) -> i64) -> Val {
    Val::I(op(int_of(a), int_of(b)))
}

fn float1(a: Val, op: impl Fn(f32) -> f32) -> Val {
    Val::F(op(float_of(a)))
}

fn num2(a: Val, b: Val, f: impl Fn(f32, f32) -> f32, i: impl Fn(i64, i64) -> i64) -> Val {
    match (a, b) {
        (Val::F(x), Val::F(y)) => Val::F(f(x, y)),
        (Val::I(x), Val::I(y)) => Val::I(i(x, y)),
        _ => panic!("mixed float and integer operands"),
    }
}

fn mad(a: Val, b: Val, c: Val) -> Val {
    match (a, b, c) {
        (Val::F(a), Val::F(b), Val::F(c)) => Val::F(a * b + c),
        (Val::I(a), Val::I(b), Val::I(c)) => Val::I(a.wrapping_mul(b).wrapping_add(c)),
        _ => panic!("mixed float and integer operands"),
    }
}

fn compare(cond: Cond, a: Val, b: Val) -> bool {
    match (a, b) {
        (Val::F(a), Val::F(b)) => match cond {
            Cond::Z => a == b,
            Cond::Nz => a != b,
            Cond::G => a > b,
            Cond::Ge => a >= b,
            Cond::L => a < b,
            Cond::Le => a <= b,
        },
        (Val::I(a), Val::I(b)) => match cond {
            Cond::Z => a == b,
            Cond::Nz => a != b,
            Cond::G => a > b,
            Cond::Ge => a >= b,
            Cond::L => a < b,
            Cond::Le => a <= b,
        },
        _ => panic!("mixed float and integer comparison"),
    }
}

fn compare_zero(cond: Cond, value: Val) -> bool {
    match value {
        Val::F(_) => compare(cond, value, Val::F(0.0)),
        Val::I(_) => compare(cond, value, Val::I(0)),
    }
}

fn saturated(value: Val, elem: ElemType) -> Val {
    match value {
        Val::F(f) => Val::F(num_traits::clamp(f, 0.0, 1.0)),
        Val::I(i) => {
            let width = elem.bytes() * 8;
            let (min, max) = if elem.is_signed() {
                (-(1i64 << (width - 1)), (1i64 << (width - 1)) - 1)
            } else {
                (0, (1i64 << width) - 1)
            };
            Val::I(num_traits::clamp(i, min, max))
        }
    }
}
