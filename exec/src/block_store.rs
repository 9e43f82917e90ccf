use std::collections::HashMap;

use vu_core::block::MicroBlock;
use vu_core::state::PipelineState;

/// Translated blocks, keyed by start pc and entry pipeline state.
///
/// Several blocks may share a pc, one per distinct entry state. The
/// store only grows; [`flush`](Self::flush) drops everything at once.
#[derive(Debug, Default)]
pub struct BlockStore {
    blocks: Vec<MicroBlock>,
    by_pc: HashMap<u32, Vec<usize>>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest block at `pc` whose key accepts `state`.
    pub fn lookup(&self, pc: u32, state: &PipelineState) -> Option<usize> {
        let chain = self.by_pc.get(&pc)?;
        chain
            .iter()
            .rev()
            .copied()
            .find(|&idx| state.is_compatible(&self.blocks[idx].entry))
    }

    /// Block at `pc` whose stored key is byte-for-byte `key`.
    pub fn find_exact(&self, pc: u32, key: &PipelineState) -> Option<usize> {
        let chain = self.by_pc.get(&pc)?;
        chain
            .iter()
            .rev()
            .copied()
            .find(|&idx| self.blocks[idx].entry == *key)
    }

    pub fn insert(&mut self, block: MicroBlock) -> usize {
        let idx = self.blocks.len();
        self.by_pc.entry(block.pc).or_default().push(idx);
        self.blocks.push(block);
        idx
    }

    pub fn get(&self, idx: usize) -> &MicroBlock {
        &self.blocks[idx]
    }

    /// Number of blocks cached at `pc`.
    pub fn count_at(&self, pc: u32) -> usize {
        self.by_pc.get(&pc).map_or(0, Vec::len)
    }

    pub fn flush(&mut self) {
        self.blocks.clear();
        self.by_pc.clear();
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
