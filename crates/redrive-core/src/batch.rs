//! Splitting ordered sequences into size-limited chunks.

use std::num::NonZeroUsize;

/// Maximum number of entries SQS accepts in a single receive, send or delete call.
pub const SQS_BATCH_LIMIT: NonZeroUsize = match NonZeroUsize::new(10) {
    Some(limit) => limit,
    None => unreachable!(),
};

/// Splits `items` into ordered chunks of at most `size` elements.
///
/// Every chunk except possibly the last holds exactly `size` elements and
/// flattening the result yields the input unchanged.
///
/// An empty input yields a single empty chunk. Callers must treat an empty
/// chunk as a no-op.
///
/// # Example
///
/// ```
/// use std::num::NonZeroUsize;
/// use redrive::batch;
///
/// let chunks = batch((0..12).collect(), NonZeroUsize::new(10).unwrap());
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[1], vec![10, 11]);
/// ```
pub fn batch<T>(items: Vec<T>, size: NonZeroUsize) -> Vec<Vec<T>> {
    let size = size.get();
    let mut batches = vec![Vec::with_capacity(size.min(items.len()))];

    for item in items {
        match batches.last_mut() {
            Some(current) if current.len() < size => current.push(item),
            _ => {
                let mut next = Vec::with_capacity(size);
                next.push(item);
                batches.push(next);
            }
        }
    }

    batches
}
