use ferry_env::Topology;
use serde::{Deserialize, Serialize};

/// How a parallel job over a snapshot is split into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchStrategy {
    /// As many records per batch as fit one L1-sized chunk.
    #[default]
    MaximizeChunk,
    /// One record per batch.
    PerElement,
}

impl BatchStrategy {
    pub fn batch_size(self, elem_size: usize) -> usize {
        match self {
            BatchStrategy::MaximizeChunk => Topology::detect().elements_per_chunk(elem_size),
            BatchStrategy::PerElement => 1,
        }
    }

    pub fn batch_size_for<T>(self) -> usize {
        self.batch_size(std::mem::size_of::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_element_is_always_one() {
        assert_eq!(BatchStrategy::PerElement.batch_size_for::<[u8; 4096]>(), 1);
    }

    #[test]
    fn maximize_chunk_shrinks_with_element_size() {
        let small = BatchStrategy::MaximizeChunk.batch_size_for::<u8>();
        let large = BatchStrategy::MaximizeChunk.batch_size_for::<[u64; 64]>();
        assert!(small > large);
        assert!(large >= 1);
    }
}
