use std::ops::Range;

use tinyvec::TinyVec;

use crate::{
    block::BlockId,
    function::Function,
    inst::{Inst, InstId, Slot},
    opcode::Opcode,
    operand::{DeclId, RegFile, Region},
};

/// Pairwise ordering constraints between two instructions sharing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hazard {
    /// Both write overlapping storage.
    Waw,
    /// The later instruction writes storage the earlier one reads.
    War,
    /// The later instruction reads storage the earlier one writes.
    Raw,
}

/// One storage access of an instruction: the ledger slot it happens
/// through, the declaration, and the byte range touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub slot: Slot,
    pub decl: DeclId,
    pub range: Range<u32>,
}

impl Default for Access {
    fn default() -> Self {
        Access {
            slot: Slot::Dst,
            decl: DeclId::default(),
            range: 0..0,
        }
    }
}

pub fn ranges_overlap(a: &Range<u32>, b: &Range<u32>) -> bool {
    a.start < b.end && b.start < a.end
}

pub fn range_covers(outer: &Range<u32>, inner: &Range<u32>) -> bool {
    outer.start <= inner.start && inner.end <= outer.end
}

/// Byte range of the accumulator touched by an instruction's lanes. The
/// accumulator is tracked at its widest element pitch regardless of the
/// operand type, which is conservative for narrow-element accesses.
fn acc_lane_range(inst: &Inst) -> Range<u32> {
    let base = inst.mask_offset as u32 * 4;
    base..base + inst.exec_width as u32 * 4
}

/// Byte range a region access covers in the context of `inst`. Flag-valued
/// accesses (pseudo-logic operands) and accumulator regions depend on the
/// instruction's execution mask, not on the region's own shape.
fn region_range(inst: &Inst, region: &Region) -> Range<u32> {
    match region.file {
        RegFile::Acc => acc_lane_range(inst),
        RegFile::Flag if inst.opcode.is_pseudo_logic() => inst.flag_byte_range(),
        _ => region.byte_range(inst.exec_width),
    }
}

/// Everything `inst` reads: register sources, the predicate flag, and the
/// implicit accumulator when the opcode implies one. Indirect regions read
/// the address register and, conservatively, the whole indirected
/// declaration. LifetimeEnd names storage but reads no value.
pub fn read_accesses(func: &Function, inst: &Inst) -> TinyVec<[Access; 4]> {
    let mut accesses = TinyVec::new();

    if inst.opcode != Opcode::LifetimeEnd {
        for (i, src) in inst.srcs.iter().enumerate() {
            let region = match src.as_reg() {
                Some(region) => region,
                None => continue,
            };
            let slot = Slot::Src(i as u8);
            if let Some(addr) = region.indirect {
                accesses.push(Access {
                    slot,
                    decl: addr,
                    range: 0..func.decl(addr).size,
                });
                accesses.push(Access {
                    slot,
                    decl: region.decl,
                    range: 0..func.decl(region.decl).size,
                });
            } else {
                accesses.push(Access {
                    slot,
                    decl: region.decl,
                    range: region_range(inst, region),
                });
            }
        }
    }

    // An indirect destination reads its address register; the access is
    // keyed to the Dst slot since there is no operand of its own.
    if let Some(dst) = &inst.dst {
        if let Some(addr) = dst.indirect {
            accesses.push(Access {
                slot: Slot::Dst,
                decl: addr,
                range: 0..func.decl(addr).size,
            });
        }
    }

    if let Some(pred) = &inst.predicate {
        accesses.push(Access {
            slot: Slot::Pred,
            decl: pred.flag,
            range: inst.flag_byte_range(),
        });
    }

    if inst.opcode.info().reads_acc {
        accesses.push(Access {
            slot: Slot::AccIn,
            decl: func.acc(),
            range: acc_lane_range(inst),
        });
    }

    accesses
}

/// Everything `inst` writes: the destination, the condition-modifier flag,
/// and the implicit accumulator when the opcode implies one.
pub fn write_accesses(func: &Function, inst: &Inst) -> TinyVec<[Access; 3]> {
    let mut accesses = TinyVec::new();

    if let Some(dst) = &inst.dst {
        if dst.indirect.is_some() {
            accesses.push(Access {
                slot: Slot::Dst,
                decl: dst.decl,
                range: 0..func.decl(dst.decl).size,
            });
        } else {
            accesses.push(Access {
                slot: Slot::Dst,
                decl: dst.decl,
                range: region_range(inst, dst),
            });
        }
    }

    if let Some(cm) = &inst.cond_mod {
        accesses.push(Access {
            slot: Slot::CondMod,
            decl: cm.flag,
            range: inst.flag_byte_range(),
        });
    }

    if inst.opcode.info().writes_acc {
        accesses.push(Access {
            slot: Slot::AccOut,
            decl: func.acc(),
            range: acc_lane_range(inst),
        });
    }

    accesses
}

/// The storage range a LifetimeEnd marker terminates.
pub fn lifetime_marker(func: &Function, inst: &Inst) -> Option<(DeclId, Range<u32>)> {
    if inst.opcode != Opcode::LifetimeEnd {
        return None;
    }
    let region = inst
        .src_reg(0)
        .unwrap_or_else(|| panic!("lifetime_end with no region operand"));
    if region.indirect.is_some() {
        Some((region.decl, 0..func.decl(region.decl).size))
    } else {
        Some((region.decl, region_range(inst, region)))
    }
}

fn any_overlap(accesses: &[Access], decl: DeclId, range: &Range<u32>) -> bool {
    accesses
        .iter()
        .any(|access| access.decl == decl && ranges_overlap(&access.range, range))
}

fn sets_conflict(a: &[Access], b: &[Access]) -> bool {
    a.iter().any(|access| any_overlap(b, access.decl, &access.range))
}

/// Classifies the dependency between `a` (earlier in program order) and `b`
/// (later). Returns the first hazard found, RAW before WAR before WAW.
pub fn hazard(func: &Function, a: InstId, b: InstId) -> Option<Hazard> {
    let ia = func.inst(a);
    let ib = func.inst(b);

    // Lifetime markers: an earlier marker conflicts with any later touch of
    // the storage it ends (a read after the marker is broken input, a write
    // starts a new live range that must stay below the marker). A later
    // marker conflicts with earlier reads but never with earlier writes;
    // ending a live range early is the marker's whole point.
    if let Some((decl, range)) = lifetime_marker(func, ia) {
        let reads = read_accesses(func, ib);
        if any_overlap(&reads, decl, &range) {
            return Some(Hazard::Raw);
        }
        let writes = write_accesses(func, ib);
        if any_overlap(&writes, decl, &range) {
            return Some(Hazard::Waw);
        }
        return None;
    }
    if let Some((decl, range)) = lifetime_marker(func, ib) {
        let reads = read_accesses(func, ia);
        if any_overlap(&reads, decl, &range) {
            return Some(Hazard::War);
        }
        return None;
    }

    let a_reads = read_accesses(func, ia);
    let a_writes = write_accesses(func, ia);
    let b_reads = read_accesses(func, ib);
    let b_writes = write_accesses(func, ib);

    if sets_conflict(&a_writes, &b_reads) {
        Some(Hazard::Raw)
    } else if sets_conflict(&a_reads, &b_writes) {
        Some(Hazard::War)
    } else if sets_conflict(&a_writes, &b_writes) {
        Some(Hazard::Waw)
    } else {
        None
    }
}

/// True if any instruction strictly between positions `after` and `before`
/// conflicts with `inst` (which precedes the range). Stops at the first
/// hazard.
pub fn range_hazard(func: &Function, block: BlockId, after: usize, before: usize, inst: InstId) -> bool {
    (after + 1..before).any(|position| {
        let other = func.block(block).insts[position];
        hazard(func, inst, other).is_some()
    })
}

/// True if any instruction strictly between the positions writes storage
/// overlapping the given range. Lifetime markers count as writes: a value
/// is not available past the end of its live range.
pub fn writes_storage_in_range(
    func: &Function,
    block: BlockId,
    after: usize,
    before: usize,
    decl: DeclId,
    range: &Range<u32>,
) -> bool {
    (after + 1..before).any(|position| {
        let inst = func.inst(func.block(block).insts[position]);
        if let Some((marker_decl, marker_range)) = lifetime_marker(func, inst) {
            return marker_decl == decl && ranges_overlap(&marker_range, range);
        }
        any_overlap(&write_accesses(func, inst), decl, range)
    })
}

/// True if any instruction strictly between the positions reads or writes
/// storage overlapping the given range.
pub fn touches_storage_in_range(
    func: &Function,
    block: BlockId,
    after: usize,
    before: usize,
    decl: DeclId,
    range: &Range<u32>,
) -> bool {
    if writes_storage_in_range(func, block, after, before, decl, range) {
        return true;
    }
    (after + 1..before).any(|position| {
        let inst = func.inst(func.block(block).insts[position]);
        any_overlap(&read_accesses(func, inst), decl, range)
    })
}

/// True if the instruction reads or writes the accumulator, explicitly or
/// implicitly.
pub fn touches_acc(func: &Function, id: InstId) -> bool {
    let inst = func.inst(id);
    read_accesses(func, inst)
        .iter()
        .chain(write_accesses(func, inst).iter())
        .any(|access| func.decl(access.decl).file == RegFile::Acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::BlockBuilder,
        operand::{Imm, Operand},
        typ::ElemType,
        HwCaps, Options,
    };

    fn function() -> Function {
        Function::new(Options::default(), HwCaps::default())
    }

    #[test]
    fn classifies_raw_before_war_before_waw() {
        let mut func = function();
        let block = func.add_block();
        let mut b = BlockBuilder::new(&mut func, block);
        let t = b.grf(ElemType::S32);
        let u = b.grf(ElemType::S32);
        let w = b.grf(ElemType::S32);
        let writer = b.mov(Some(t), b.zero(ElemType::S32));
        let reader = b.mov(Some(u), Operand::Reg(t));
        let clobber = b.mov(Some(t), b.zero(ElemType::S32));
        let other = b.mov(Some(w), Operand::Reg(t));

        assert_eq!(hazard(&func, writer, reader), Some(Hazard::Raw));
        assert_eq!(hazard(&func, reader, clobber), Some(Hazard::War));
        assert_eq!(hazard(&func, writer, clobber), Some(Hazard::Waw));
        // Two reads of the same storage into disjoint destinations.
        assert_eq!(hazard(&func, reader, other), None);
    }

    #[test]
    fn implicit_accumulator_conflicts_without_operands() {
        let mut func = function();
        let block = func.add_block();
        let mut b = BlockBuilder::new(&mut func, block);
        let a = b.grf(ElemType::S32);
        let c = b.grf(ElemType::S32);
        let hi = b.grf(ElemType::S32);
        let r = b.grf(ElemType::S32);
        // Mach seeds the accumulator, Mac reads it; neither names it.
        let seed = b.alu2(Opcode::Mach, Some(hi), Operand::Reg(a), Operand::Reg(c));
        let mac = b.alu2(Opcode::Mac, Some(r), Operand::Reg(a), Operand::Reg(c));

        assert_eq!(hazard(&func, seed, mac), Some(Hazard::Raw));
        assert!(touches_acc(&func, seed));
        assert!(touches_acc(&func, mac));
    }

    #[test]
    fn flag_traffic_is_tracked_by_lane_bytes() {
        let mut func = function();
        let block = func.add_block();
        let mut b = BlockBuilder::new(&mut func, block).with_exec(8, 0);
        let x = b.grf(ElemType::S32);
        let cmp = b.cmp(crate::opcode::Cond::G, 0, Operand::Reg(x), b.zero(ElemType::S32));
        // A predicate on the same flag but lanes 16..24 reads a different
        // byte; no conflict with the 8-wide comparison at lane 0.
        let mut b = BlockBuilder::new(&mut func, block).with_exec(8, 16);
        let t = b.grf(ElemType::S32);
        let far = {
            let id = b.mov(Some(t), b.zero(ElemType::S32));
            b.func.inst_mut(id).predicate = Some(crate::inst::Predicate {
                flag: b.func.flag(0),
                invert: false,
            });
            id
        };
        let mut b = BlockBuilder::new(&mut func, block).with_exec(8, 0);
        let u = b.grf(ElemType::S32);
        let near = {
            let id = b.mov(Some(u), b.zero(ElemType::S32));
            b.func.inst_mut(id).predicate = Some(crate::inst::Predicate {
                flag: b.func.flag(0),
                invert: false,
            });
            id
        };

        assert_eq!(hazard(&func, cmp, far), None);
        assert_eq!(hazard(&func, cmp, near), Some(Hazard::Raw));
    }

    #[test]
    fn indirect_destination_reads_its_address_register() {
        let mut func = function();
        let block = func.add_block();
        let addr = func.new_addr();
        let mut b = BlockBuilder::new(&mut func, block);
        let t = b.grf(ElemType::S32);
        let addr_region = Region::new(RegFile::Addr, addr, ElemType::U16).scalar();
        let set_addr = b.mov(Some(addr_region), Operand::Imm(Imm::uw(0)));
        let mut dst = t;
        dst.indirect = Some(addr);
        let scatter = b.mov(Some(dst), b.zero(ElemType::S32));

        // The address register is consumed, not clobbered: writing it
        // after the scatter is a write-after-read, not write-after-write.
        assert_eq!(hazard(&func, set_addr, scatter), Some(Hazard::Raw));
        assert_eq!(hazard(&func, scatter, set_addr), Some(Hazard::War));
    }

    #[test]
    fn lifetime_markers_block_later_touches_not_earlier_writes() {
        let mut func = function();
        let block = func.add_block();
        let mut b = BlockBuilder::new(&mut func, block);
        let t = b.grf(ElemType::S32);
        let u = b.grf(ElemType::S32);
        let writer = b.mov(Some(t), b.zero(ElemType::S32));
        let reader = b.mov(Some(u), Operand::Reg(t));
        let marker = b.lifetime_end(t);
        let late_reader = b.mov(Some(u), Operand::Reg(t));

        // Ending the range after its last use is what the marker is for.
        assert_eq!(hazard(&func, writer, marker), None);
        assert_eq!(hazard(&func, reader, marker), Some(Hazard::War));
        // A use below the marker may not float above it and vice versa.
        assert_eq!(hazard(&func, marker, late_reader), Some(Hazard::Raw));
    }

    #[test]
    fn range_queries_are_strictly_between() {
        let mut func = function();
        let block = func.add_block();
        let mut b = BlockBuilder::new(&mut func, block);
        let t = b.grf(ElemType::S32);
        b.mov(Some(t), b.zero(ElemType::S32));
        b.mov(Some(t), b.zero(ElemType::S32));
        b.mov(Some(t), b.zero(ElemType::S32));
        let range = t.byte_range(8);

        // Positions 0 and 2 are endpoints; only position 1 is inspected.
        assert!(writes_storage_in_range(&func, block, 0, 2, t.decl, &range));
        assert!(!writes_storage_in_range(&func, block, 0, 1, t.decl, &range));
        assert!(!writes_storage_in_range(&func, block, 1, 2, t.decl, &range));
    }
}
