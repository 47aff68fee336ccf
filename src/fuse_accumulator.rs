use crate::{
    block::BlockId,
    function::Function,
    hazards::{read_accesses, touches_acc, write_accesses},
    inst::{Inst, InstId, Slot},
    opcode::{AccRestriction, Opcode},
    operand::{Operand, Region},
    typ::ElemType,
};

/// Rewrites a chain of multiply-adds into implicit-accumulator form.
///
/// Turn this:  mov t0, s ; mad t1, a, b, t0 ; mad t2, c, d, t1 ; mad r, e, f, t2
/// Into this:  mov acc, s ; mac acc, a, b ; mac acc, c, d ; mac r, e, f
///
/// The producer seeds the accumulator, each multiply-add becomes a fused
/// multiply-accumulate reading the accumulator implicitly, and only the
/// last instruction writes an explicit destination. When the chain's
/// result is a wide integer, a bounded single-use consumer chain may be
/// pulled in as well, ending at the first consumer with a narrow
/// destination.
///
/// Every instruction placed on the accumulator is checked against the
/// hardware restriction table; any failed check aborts the whole chain
/// with no mutation.
pub fn fuse_accumulator(func: &mut Function, block: BlockId) -> bool {
    let mut pass = FuseAccumulator {
        func,
        block,
        changed: false,
    };
    pass.run();
    pass.changed
}

/// True when the restriction table lets this instruction write the
/// accumulator as an explicit destination.
fn can_acc_dst(func: &Function, inst: &Inst) -> bool {
    match func.caps.restriction(inst.opcode) {
        AccRestriction::NoRestriction | AccRestriction::NoSrc | AccRestriction::NoIntSrc => true,
        AccRestriction::DstOrSrcNotBoth => !inst.opcode.info().reads_acc,
        AccRestriction::NoModifier => {
            !inst.saturate && inst.srcs.iter().all(|src| match src.as_reg() {
                Some(region) => !region.has_modifier(),
                None => true,
            })
        }
        AccRestriction::NoAccess
        | AccRestriction::SrcOnly
        | AccRestriction::ImplicitWriteOnly => false,
    }
}

/// True when the restriction table lets this instruction read the
/// accumulator through the given source region.
fn can_acc_src(func: &Function, inst: &Inst, region: &Region) -> bool {
    match func.caps.restriction(inst.opcode) {
        AccRestriction::NoRestriction
        | AccRestriction::SrcOnly
        | AccRestriction::DstOrSrcNotBoth => true,
        AccRestriction::NoIntSrc => region.elem.is_float(),
        AccRestriction::NoModifier => !region.has_modifier() && !inst.saturate,
        AccRestriction::NoAccess
        | AccRestriction::NoSrc
        | AccRestriction::ImplicitWriteOnly => false,
    }
}

struct FuseAccumulator<'a> {
    func: &'a mut Function,
    block: BlockId,
    changed: bool,
}

/// One consumer-chain hop: the instruction, the source slot reading the
/// running value, and whether it terminates the chain with a real
/// destination.
struct Hop {
    id: InstId,
    src: u8,
    terminal: bool,
}

impl<'a> FuseAccumulator<'a> {
    fn run(&mut self) {
        let mut index = 0;
        while index < self.func.block(self.block).len() {
            match self.try_fuse(index) {
                Some(next) => {
                    self.changed = true;
                    index = next;
                }
                None => index += 1,
            }
        }
    }

    fn dst_type_allowed(&self, elem: ElemType) -> bool {
        if elem.is_float() {
            return true;
        }
        // Narrow integer chains need the byte/word multiply-accumulate
        // capability.
        elem.bytes() == 4 || self.func.caps.byte_mac
    }

    fn mad_eligible(&self, inst: &Inst) -> bool {
        if inst.opcode != Opcode::Mad
            || inst.predicate.is_some()
            || inst.cond_mod.is_some()
            || inst.saturate
        {
            return false;
        }
        match &inst.dst {
            Some(dst) => dst.indirect.is_none() && self.dst_type_allowed(dst.elem),
            None => false,
        }
    }

    fn try_fuse(&mut self, start: usize) -> Option<usize> {
        let block = self.func.block(self.block);
        let first_id = block.insts[start];
        let first = self.func.inst(first_id);
        if !self.mad_eligible(first) {
            return None;
        }
        let exec_width = first.exec_width;
        let mask_offset = first.mask_offset;

        // Collect: a contiguous run of chained multiply-adds, each feeding
        // its successor's third source and nothing else.
        let mut mads = vec![first_id];
        loop {
            let next_position = start + mads.len();
            if next_position >= self.func.block(self.block).len() {
                break;
            }
            let next_id = self.func.block(self.block).insts[next_position];
            let next = self.func.inst(next_id);
            if !self.mad_eligible(next)
                || next.exec_width != exec_width
                || next.mask_offset != mask_offset
            {
                break;
            }
            let prev_id = *mads.last().unwrap();
            let prev_dst = self.func.inst(prev_id).dst.unwrap();
            let link = match next.src_reg(2) {
                Some(region) => *region,
                None => break,
            };
            if link.has_modifier()
                || link.indirect.is_some()
                || !link.same_storage(&prev_dst)
                || link.elem != prev_dst.elem
                || self.func.def_use.single_def(next_id, Slot::Src(2)) != Some(prev_id)
                || self.func.def_use.use_count(prev_id) != 1
            {
                break;
            }
            mads.push(next_id);
        }
        if mads.len() < 2 {
            return None;
        }
        let end = start + mads.len();

        let producer_id = self.classify_producer(first_id, start, exec_width, mask_offset)?;
        let last_id = *mads.last().unwrap();
        let result = self.func.inst(last_id).dst.unwrap();
        let hops = if result.elem.is_int() && result.elem.bytes() == 4 {
            self.classify_consumers(last_id, end - 1, exec_width, mask_offset)
        } else {
            Vec::new()
        };
        if !self.acc_free_after(end, &hops) {
            return None;
        }

        // Every destination the commit retargets onto the accumulator
        // stops being written; edges are block-local, so a read in a
        // later block must be ruled out through the read-block record.
        let mut doomed = vec![self.func.inst(producer_id).dst.unwrap().decl];
        for (i, &id) in mads.iter().enumerate() {
            if i == mads.len() - 1 && hops.is_empty() {
                continue;
            }
            doomed.push(self.func.inst(id).dst.unwrap().decl);
        }
        for hop in hops.iter().filter(|hop| !hop.terminal) {
            doomed.push(self.func.inst(hop.id).dst.unwrap().decl);
        }
        if doomed
            .iter()
            .any(|&decl| self.func.def_use.read_outside(decl, self.block))
        {
            return None;
        }

        self.commit(producer_id, &mads, &hops);
        Some(end)
    }

    /// The first multiply-add's third source must come from a single-use,
    /// unconditional definer that may legally write the accumulator, with
    /// no accumulator traffic between it and the chain.
    fn classify_producer(
        &self,
        first_id: InstId,
        start: usize,
        exec_width: u8,
        mask_offset: u8,
    ) -> Option<InstId> {
        let first = self.func.inst(first_id);
        let seed = match first.src_reg(2) {
            Some(region) => *region,
            None => return None,
        };
        if seed.has_modifier() || seed.indirect.is_some() {
            return None;
        }
        let producer_id = self.func.def_use.single_def(first_id, Slot::Src(2))?;
        if self.func.def_use.use_count(producer_id) != 1 {
            return None;
        }
        let position = self.func.position_of(self.block, producer_id)?;
        debug_assert!(position < start);

        let producer = self.func.inst(producer_id);
        if producer.predicate.is_some()
            || producer.saturate
            || producer.exec_width != exec_width
            || producer.mask_offset != mask_offset
        {
            return None;
        }
        let dst = producer.dst.as_ref()?;
        if dst.indirect.is_some() || !dst.same_storage(&seed) || dst.elem != seed.elem {
            return None;
        }
        if !can_acc_dst(self.func, producer) {
            return None;
        }
        for between in position + 1..start {
            let id = self.func.block(self.block).insts[between];
            if touches_acc(self.func, id) {
                return None;
            }
        }
        Some(producer_id)
    }

    /// Follows the single-use chain out of the last multiply-add, up to the
    /// hop bound, ending at the first consumer with a narrow destination.
    /// An empty result means the chain fuses with an explicit final
    /// destination instead.
    fn classify_consumers(
        &self,
        last_id: InstId,
        last_position: usize,
        exec_width: u8,
        mask_offset: u8,
    ) -> Vec<Hop> {
        let mut hops: Vec<Hop> = Vec::new();
        let mut cur_id = last_id;
        let mut cur_position = last_position;

        for _ in 0..self.func.options.max_consumer_hops {
            let uses = self.func.def_use.uses_of_slot(cur_id, Slot::Dst);
            let rec = match uses.as_slice() {
                [rec] => *rec,
                _ => return Vec::new(),
            };
            let src_slot = match rec.use_slot {
                Slot::Src(i) => i,
                _ => return Vec::new(),
            };
            let user_position = match self.func.position_of(self.block, rec.user) {
                Some(p) => p,
                None => return Vec::new(),
            };
            let user = self.func.inst(rec.user);
            if user.predicate.is_some()
                || user.exec_width != exec_width
                || user.mask_offset != mask_offset
            {
                return Vec::new();
            }
            let cur_dst = self.func.inst(cur_id).dst.unwrap();
            let value = match user.src_reg(src_slot as usize) {
                Some(region) => *region,
                None => return Vec::new(),
            };
            if value.indirect.is_some() || !value.same_storage(&cur_dst) {
                return Vec::new();
            }
            // The running value must be the hop's only wide source.
            let other_wide = user.srcs.iter().enumerate().any(|(i, src)| {
                i != src_slot as usize
                    && matches!(src.as_reg(), Some(region) if !region.elem.is_narrow())
            });
            if other_wide || !can_acc_src(self.func, user, &value) {
                return Vec::new();
            }
            for between in cur_position + 1..user_position {
                let id = self.func.block(self.block).insts[between];
                if touches_acc(self.func, id) {
                    return Vec::new();
                }
            }

            let dst = match &user.dst {
                Some(dst) if dst.indirect.is_none() => dst,
                _ => return Vec::new(),
            };
            if dst.elem.is_narrow() {
                hops.push(Hop {
                    id: rec.user,
                    src: src_slot,
                    terminal: true,
                });
                return hops;
            }
            if user.cond_mod.is_some()
                || !can_acc_dst(self.func, user)
                || self.func.caps.restriction(user.opcode) == AccRestriction::DstOrSrcNotBoth
            {
                return Vec::new();
            }
            hops.push(Hop {
                id: rec.user,
                src: src_slot,
                terminal: false,
            });
            cur_id = rec.user;
            cur_position = user_position;
        }
        Vec::new()
    }

    /// The rewrite leaves the accumulator holding chain state; any
    /// instruction later in the block that reads it before an unpredicated
    /// full rewrite would observe that state.
    fn acc_free_after(&self, from: usize, hops: &[Hop]) -> bool {
        let acc = self.func.acc();
        for position in from..self.func.block(self.block).len() {
            let id = self.func.block(self.block).insts[position];
            if hops.iter().any(|hop| hop.id == id) {
                continue;
            }
            let inst = self.func.inst(id);
            if read_accesses(self.func, inst)
                .iter()
                .any(|access| access.decl == acc)
            {
                return false;
            }
            let full_write = inst.predicate.is_none()
                && write_accesses(self.func, inst)
                    .iter()
                    .any(|access| access.decl == acc && access.range == (0..self.func.decl(acc).size));
            if full_write {
                return true;
            }
        }
        true
    }

    fn commit(&mut self, producer_id: InstId, mads: &[InstId], hops: &[Hop]) {
        let acc = |func: &Function, elem: ElemType| func.acc_region(elem);

        // Seed: the producer's destination becomes the accumulator.
        let elem = self.func.inst(producer_id).dst.unwrap().elem;
        let seed_dst = acc(self.func, elem);
        self.func.inst_mut(producer_id).dst = Some(seed_dst);

        let last = mads.len() - 1;
        let mut prev = producer_id;
        for (i, &id) in mads.iter().enumerate() {
            self.func.def_use.remove_use_edges(id, Slot::Src(2));
            self.func.def_use.add_edge(prev, Slot::Dst, id, Slot::AccIn);

            let keep_dst = i == last && hops.is_empty();
            let elem = self.func.inst(id).dst.unwrap().elem;
            let acc_dst = acc(self.func, elem);
            let inst = self.func.inst_mut(id);
            inst.opcode = Opcode::Mac;
            inst.srcs.truncate(2);
            if !keep_dst {
                inst.dst = Some(acc_dst);
            }
            prev = id;
        }

        // Consumer hops read and (except the terminal) write the
        // accumulator explicitly; the ledger edges already connect the
        // right slots and the storage ranges still coincide.
        for hop in hops {
            let inst = self.func.inst(hop.id);
            let value = *inst.src_reg(hop.src as usize).unwrap();
            let mut region = acc(self.func, value.elem);
            region.negate = value.negate;
            region.abs = value.abs;
            let dst_elem = inst.dst.unwrap().elem;
            let dst = acc(self.func, dst_elem);
            let inst = self.func.inst_mut(hop.id);
            inst.srcs[hop.src as usize] = Operand::Reg(region);
            if !hop.terminal {
                inst.dst = Some(dst);
            }
        }
    }
}
