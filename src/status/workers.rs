//! Fixed-size worker pool for probing members.
//!
//! Items are split into contiguous chunks, one per worker, and results are
//! merged back on the calling thread in input order.

use std::thread;

/// Map `probe` over `items` on at most `workers` threads.
///
/// With one worker, or one item, everything runs on the calling thread.
pub fn probe_parallel<T, R, F>(workers: usize, items: &[T], probe: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let threads = workers.min(items.len());
    if threads <= 1 {
        return items.iter().map(&probe).collect();
    }

    let chunk_size = items.len().div_ceil(threads);
    let probe = &probe;
    thread::scope(|scope| {
        let handles: Vec<_> = items
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move || chunk.iter().map(probe).collect::<Vec<R>>()))
            .collect();
        let mut results = Vec::with_capacity(items.len());
        for handle in handles {
            match handle.join() {
                Ok(chunk) => results.extend(chunk),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        results
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_results_keep_input_order() {
        let items: Vec<u32> = (0..23).collect();
        let doubled = probe_parallel(4, &items, |n| n * 2);
        assert_eq!(doubled, items.iter().map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_every_item_probed_once() {
        let calls = AtomicUsize::new(0);
        let items = vec!["a"; 9];
        let out = probe_parallel(3, &items, |_| calls.fetch_add(1, Ordering::SeqCst));
        assert_eq!(out.len(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn test_single_worker_and_empty_input() {
        assert_eq!(probe_parallel(1, &[1, 2, 3], |n| n + 1), vec![2, 3, 4]);
        assert!(probe_parallel::<u8, u8, _>(8, &[], |n| *n).is_empty());
    }
}
