//! Size-bounded batching.
//!
//! Items are packed in order. Before an item is appended, the batch is flushed
//! if the item would bring it to the budget or past it. An item larger than
//! the budget therefore still ships, alone in its batch.

/// One outbound batch and its estimated serialized size.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub bytes: usize,
}

impl<T> Batch<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            bytes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Packs `(item, size)` pairs into batches under `budget` bytes.
///
/// Every item lands in exactly one batch, order is preserved, and no empty
/// batch is produced.
pub fn chunk_by_budget<T, I>(items: I, budget: usize) -> Vec<Batch<T>>
where
    I: IntoIterator<Item = (T, usize)>,
{
    let mut batches = Vec::new();
    let mut current = Batch::new();

    for (item, size) in items {
        if !current.is_empty() && current.bytes + size >= budget {
            batches.push(std::mem::replace(&mut current, Batch::new()));
        }
        current.items.push(item);
        current.bytes += size;
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    fn ids(batches: &[Batch<u32>]) -> Vec<Vec<u32>> {
        batches.iter().map(|b| b.items.clone()).collect()
    }

    #[test]
    fn everything_fits_in_one_batch() {
        let batches = chunk_by_budget([(1, 10), (2, 10), (3, 10)], 1000);
        assert_eq!(ids(&batches), vec![vec![1, 2, 3]]);
        assert_eq!(batches[0].bytes, 30);
    }

    #[test]
    fn third_item_meeting_budget_starts_new_batch() {
        let batches = chunk_by_budget([(1, 10), (2, 10), (3, 10)], 30);
        assert_eq!(ids(&batches), vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn oversized_items_ship_alone() {
        let batches = chunk_by_budget([(1, 50), (2, 5), (3, 80), (4, 5)], 40);
        assert_eq!(ids(&batches), vec![vec![1], vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn empty_input_sends_nothing() {
        let batches = chunk_by_budget(Vec::<(u32, usize)>::new(), 10);
        assert!(batches.is_empty());
    }

    #[test]
    fn random_inputs_keep_order_and_budget() {
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..200 {
            let n = rng.gen_range(0..60);
            let budget = rng.gen_range(1..400);
            let items: Vec<(u32, usize)> =
                (0..n).map(|i| (i, rng.gen_range(1..120))).collect();

            let batches = chunk_by_budget(items.clone(), budget);

            let flat: Vec<u32> = batches.iter().flat_map(|b| b.items.clone()).collect();
            assert_eq!(flat, (0..n).collect::<Vec<_>>());

            for b in &batches {
                assert!(!b.is_empty());
                let sizes: Vec<usize> = b.items.iter().map(|&i| items[i as usize].1).collect();
                assert_eq!(b.bytes, sizes.iter().sum::<usize>());
                let before_last: usize = sizes[..sizes.len() - 1].iter().sum();
                assert!(before_last < budget);
                if b.bytes >= budget {
                    assert_eq!(b.len(), 1, "only a lone item may reach the budget");
                }
            }
        }
    }
}
