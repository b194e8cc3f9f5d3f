//! Mini-batch sampling over dataset views.

use crate::common::*;

/// Splits the index range of a view into mini-batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSampler {
    len: usize,
    batch_size: usize,
}

impl BatchSampler {
    pub fn new(len: usize, batch_size: usize) -> Result<Self> {
        ensure!(
            batch_size > 0,
            DataError::usage("batch size must be positive")
        );
        Ok(Self { len, batch_size })
    }

    pub fn num_batches(&self) -> usize {
        (self.len + self.batch_size - 1) / self.batch_size
    }

    /// Batches in index order. The last batch may be smaller.
    pub fn sequential(&self) -> Vec<Vec<usize>> {
        self.batches((0..self.len).collect())
    }

    /// Batches over a random permutation of the indices.
    pub fn shuffled<R>(&self, rng: &mut R) -> Vec<Vec<usize>>
    where
        R: Rng + ?Sized,
    {
        let mut indices: Vec<_> = (0..self.len).collect();
        indices.shuffle(rng);
        self.batches(indices)
    }

    fn batches(&self, indices: Vec<usize>) -> Vec<Vec<usize>> {
        indices
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

/// Stack the samples at `indices` into an (input, target) batch on `device`.
pub fn collate<V>(view: &V, indices: &[usize], device: Device) -> Result<(Tensor, Tensor)>
where
    V: RandomAccessView + ?Sized,
{
    ensure!(!indices.is_empty(), DataError::usage("cannot collate an empty batch"));

    let samples: Vec<_> = indices.iter().map(|&index| view.get(index)).try_collect()?;
    let (inputs, targets): (Vec<_>, Vec<_>) = samples.into_iter().unzip();

    let inputs = Tensor::stack(&inputs, 0).to_device(device);
    let targets = Tensor::stack(&targets, 0).to_device(device);
    Ok((inputs, targets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_covers_all_indices() -> Result<()> {
        let sampler = BatchSampler::new(10, 4)?;
        assert_eq!(sampler.num_batches(), 3);

        let batches = sampler.sequential();
        assert_eq!(batches, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);

        let mut rng = StdRng::seed_from_u64(7);
        let mut indices: Vec<_> = sampler.shuffled(&mut rng).concat();
        indices.sort_unstable();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn empty_and_invalid_samplers() -> Result<()> {
        let sampler = BatchSampler::new(0, 4)?;
        assert_eq!(sampler.num_batches(), 0);
        assert!(sampler.sequential().is_empty());
        assert!(BatchSampler::new(3, 0).is_err());
        Ok(())
    }
}
