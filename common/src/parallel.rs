//! Parallel iteration helpers built on rayon.

use rayon::prelude::*;

/// Multiplier for number of chunks relative to CPU threads.
/// Using 3x threads provides good load balancing when some chunks finish faster.
const CHUNKS_PER_THREAD: usize = 3;

/// Number of rows per parallel chunk for a buffer with `height` rows.
#[inline]
pub fn rows_per_chunk(height: usize) -> usize {
    let num_chunks = rayon::current_num_threads() * CHUNKS_PER_THREAD;
    (height / num_chunks).max(1)
}

/// Fill a row-major buffer in parallel, one call of `f(y, row)` per row.
///
/// Rows are grouped into chunks so each task touches a contiguous span of
/// memory.
///
/// # Panics
///
/// Panics if `width` is 0 or `data.len()` is not a multiple of `width`.
pub fn par_rows_mut<T, F>(data: &mut [T], width: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync,
{
    assert!(width > 0, "width must be > 0");
    assert_eq!(data.len() % width, 0, "buffer is not row-aligned");

    let height = data.len() / width;
    let rows = rows_per_chunk(height);

    data.par_chunks_mut(width * rows)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            let start_y = chunk_idx * rows;
            for (local_y, row) in chunk.chunks_mut(width).enumerate() {
                f(start_y + local_y, row);
            }
        });
}

/// Calls `f` for every index in `0..len` in parallel, with at most
/// `max_concurrent` indices in flight at once.
///
/// Indices are started in ascending batches of `max_concurrent`. Bounding the
/// number of in-flight items caps peak memory when each item allocates large
/// buffers, as long as `f` does not keep them.
///
/// # Panics
///
/// Panics if `max_concurrent` is 0.
pub fn par_for_each_indexed_limited<F>(len: usize, max_concurrent: usize, f: F)
where
    F: Fn(usize) + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut start = 0;
    while start < len {
        let end = (start + max_concurrent).min(len);
        (start..end).into_par_iter().for_each(&f);
        start = end;
    }
}
