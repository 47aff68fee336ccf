use std::ops::{Deref, DerefMut};

use crate::inst::InstId;

/// An ordered sequence of instructions. Ownership of instructions is
/// exclusive to their containing block; the optimizer relocates them within
/// the block but never across blocks.
#[derive(Clone)]
pub struct Block {
    pub index: usize,
    pub insts: Vec<InstId>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl Block {
    pub fn new(index: usize) -> Self {
        Block {
            index,
            insts: Vec::new(),
        }
    }

    /// Position of an instruction in this block, by linear scan. The rule
    /// engine works on bounded neighborhoods, so this never dominates.
    pub fn position_of(&self, id: InstId) -> Option<usize> {
        self.insts.iter().position(|&inst| inst == id)
    }
}

impl Deref for Block {
    type Target = Vec<InstId>;

    fn deref(&self) -> &Self::Target {
        &self.insts
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.insts
    }
}
