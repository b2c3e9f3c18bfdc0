use rand::Rng;
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::data::dataset::{Dataset, Sample};
use crate::data::sampler::SamplerKind;
use crate::error::{Error, Result};

/// Order in which a loader walks its dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Sequential,
    Sampled(SamplerKind),
}

/// Batches a dataset and materialises each batch on a pool of
/// `num_workers` threads. Workers only read; every sample maps to its own
/// file, so no coordination is needed beyond the pool itself.
pub struct DataLoader<'a> {
    dataset: &'a dyn Dataset,
    batch_size: usize,
    drop_last: bool,
    order: Order,
    pool: ThreadPool,
}

impl<'a> DataLoader<'a> {
    pub fn new(
        dataset: &'a dyn Dataset,
        batch_size: usize,
        num_workers: usize,
        order: Order,
        drop_last: bool,
    ) -> Result<DataLoader<'a>> {
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .thread_name(|i| format!("loader-{}", i))
            .build()
            .map_err(|e| Error::Config(format!("cannot start loader workers: {}", e)))?;
        Ok(DataLoader { dataset, batch_size, drop_last, order, pool })
    }

    pub fn dataset(&self) -> &dyn Dataset {
        self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Index batches for one pass over the data.
    pub fn epoch_plan<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Vec<usize>> {
        match self.order {
            Order::Sequential => self.sequential_plan(),
            Order::Sampled(kind) => self.chunk(kind.sample(&self.dataset.labels(), rng)),
        }
    }

    /// Index batches in dataset order, whatever the configured order.
    pub fn sequential_plan(&self) -> Vec<Vec<usize>> {
        self.chunk((0..self.dataset.len()).collect())
    }

    fn chunk(&self, indices: Vec<usize>) -> Vec<Vec<usize>> {
        indices
            .chunks(self.batch_size)
            .filter(|chunk| !self.drop_last || chunk.len() == self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Loads the samples of one batch, preserving `indices` order.
    pub fn load(&self, indices: &[usize]) -> Result<Vec<Sample>> {
        let dataset = self.dataset;
        self.pool.install(|| indices.par_iter().map(|&i| dataset.get(i)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::InMemoryDataset;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn dataset(n: usize) -> InMemoryDataset {
        InMemoryDataset::new(
            (0..n)
                .map(|i| Sample {
                    participant_id: format!("sub-{}", i),
                    session_id: "ses-M00".into(),
                    input: vec![i as f64],
                    label: i % 2,
                })
                .collect(),
        )
    }

    #[test]
    fn drop_last_discards_the_short_batch() {
        let data = dataset(7);
        let loader = DataLoader::new(&data, 3, 2, Order::Sampled(SamplerKind::Random), true).unwrap();
        let plan = loader.epoch_plan(&mut StdRng::seed_from_u64(0));
        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|b| b.len() == 3));
    }

    #[test]
    fn sequential_load_keeps_order() {
        let data = dataset(5);
        let loader = DataLoader::new(&data, 2, 3, Order::Sequential, false).unwrap();
        let plan = loader.sequential_plan();
        assert_eq!(plan, vec![vec![0, 1], vec![2, 3], vec![4]]);
        let batch = loader.load(&plan[1]).unwrap();
        assert_eq!(batch[0].input, vec![2.0]);
        assert_eq!(batch[1].input, vec![3.0]);
    }

    #[test]
    fn zero_batch_size_is_a_config_error() {
        let data = dataset(1);
        assert!(matches!(
            DataLoader::new(&data, 0, 1, Order::Sequential, false),
            Err(Error::Config(_))
        ));
    }
}
