use crate::{
    block::{Block, BlockId},
    def_use::DefUse,
    inst::{Inst, InstId},
    operand::{Decl, DeclId, RegFile, Region},
    pool::Pool,
    typ::ElemType,
    HwCaps, Options,
};

/// One function's instruction graph: the instruction and declaration
/// arenas, the ordered blocks, the def-use ledger, and the configuration
/// the pass driver was constructed with.
#[derive(Clone)]
pub struct Function {
    pub(crate) options: Options,
    pub(crate) caps: HwCaps,
    pub(crate) insts: Pool<Inst>,
    pub(crate) decls: Pool<Decl>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) def_use: DefUse,
    flags: Vec<DeclId>,
    acc: DeclId,
}

impl Function {
    pub fn new(options: Options, caps: HwCaps) -> Self {
        let mut decls = Pool::new();

        // Flag registers and the accumulator are physical-like shared
        // resources; declare them eagerly so every operand can reference
        // them by id.
        let flags = (0..caps.num_flag_regs)
            .map(|_| {
                decls.add(Decl {
                    index: 0,
                    file: RegFile::Flag,
                    size: 4,
                })
            })
            .collect();
        let acc = decls.add(Decl {
            index: 0,
            file: RegFile::Acc,
            size: caps.acc_bytes,
        });

        Function {
            options,
            caps,
            insts: Pool::new(),
            decls,
            blocks: Vec::new(),
            def_use: DefUse::new(),
            flags,
            acc,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn caps(&self) -> &HwCaps {
        &self.caps
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block::new(id.0));
        id
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        self.insts
            .at(id)
            .unwrap_or_else(|| panic!("dead instruction {:?}", id))
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        self.insts
            .at_mut(id)
            .unwrap_or_else(|| panic!("dead instruction {:?}", id))
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        self.decls
            .at(id)
            .unwrap_or_else(|| panic!("dead declaration {:?}", id))
    }

    pub fn new_grf(&mut self, size: u32) -> DeclId {
        self.decls.add(Decl {
            index: 0,
            file: RegFile::Grf,
            size,
        })
    }

    pub fn new_addr(&mut self) -> DeclId {
        self.decls.add(Decl {
            index: 0,
            file: RegFile::Addr,
            size: 2,
        })
    }

    pub fn flag(&self, index: usize) -> DeclId {
        self.flags[index]
    }

    pub fn num_flags(&self) -> usize {
        self.flags.len()
    }

    pub fn acc(&self) -> DeclId {
        self.acc
    }

    /// The accumulator as a region operand at the given element type. The
    /// lane base comes from each instruction's mask offset, so the region
    /// itself always starts at byte zero.
    pub fn acc_region(&self, elem: ElemType) -> Region {
        Region::new(RegFile::Acc, self.acc, elem)
    }

    pub fn append_inst(&mut self, block: BlockId, inst: Inst) -> InstId {
        let id = self.insts.add(inst);
        self.blocks[block.0].insts.push(id);
        id
    }

    pub fn insert_inst(&mut self, block: BlockId, position: usize, inst: Inst) -> InstId {
        let id = self.insts.add(inst);
        self.blocks[block.0].insts.insert(position, id);
        id
    }

    /// Deletes the instruction at `position`: ledger edges in both
    /// directions are torn down, the id leaves the block's sequence, and
    /// the arena slot becomes a permanent hole.
    pub fn remove_inst(&mut self, block: BlockId, position: usize) {
        let id = self.blocks[block.0].insts.remove(position);
        self.def_use.remove_edges_as_user(id);
        self.def_use.remove_edges_as_def(id);
        self.insts.remove(id);
    }

    /// Relocates an instruction within its block. Legality (no hazards
    /// crossed) is the caller's burden; the ledger does not encode
    /// positions, so it needs no update.
    pub fn move_inst(&mut self, block: BlockId, from: usize, to: usize) {
        let id = self.blocks[block.0].insts.remove(from);
        self.blocks[block.0].insts.insert(to, id);
    }

    pub fn position_of(&self, block: BlockId, id: InstId) -> Option<usize> {
        self.blocks[block.0].position_of(id)
    }

    pub fn def_use(&self) -> &DefUse {
        &self.def_use
    }

    pub fn def_use_mut(&mut self) -> &mut DefUse {
        &mut self.def_use
    }

    /// Recomputes the ledger from the IR. The lowering stage that produces
    /// the input calls this once; tests call it to seed the input contract.
    pub fn rebuild_def_use(&mut self) {
        let def_use = DefUse::build(self);
        self.def_use = def_use;
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for block in self.blocks.iter() {
            writeln!(f, "block{}:", block.index)?;
            for &id in block.insts.iter() {
                writeln!(f, "    {}", self.inst(id))?;
            }
        }
        Ok(())
    }
}
