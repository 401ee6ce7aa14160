//! Reproducible sampling without replacement.
//!
//! Fixtures that pick random entries (claim proofs, holders) thread their own
//! visited set and seed through these helpers instead of sharing global state.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ForgeError, Result};

/// Draw an index from `range` that is not yet in `visited`, and record it.
///
/// Fails once every index in the range has been drawn.
pub fn draw_unique<R: Rng + ?Sized>(
    rng: &mut R,
    range: RangeInclusive<usize>,
    visited: &mut HashSet<usize>,
) -> Result<usize> {
    if range.is_empty() {
        return Err(ForgeError::Decode(format!(
            "cannot sample from empty range {}..={}",
            range.start(),
            range.end()
        )));
    }
    let (start, end) = (*range.start(), *range.end());
    let available = (start..=end).filter(|i| !visited.contains(i)).count();
    if available == 0 {
        return Err(ForgeError::Decode(format!(
            "all {} indices in {start}..={end} already drawn",
            end - start + 1
        )));
    }

    // Pick the n-th free index so the draw never loops on collisions.
    let nth = rng.gen_range(0..available);
    let picked = (start..=end)
        .filter(|i| !visited.contains(i))
        .nth(nth)
        .ok_or_else(|| ForgeError::Decode("sampling index out of range".to_string()))?;
    visited.insert(picked);
    Ok(picked)
}

/// `count` distinct entries of `keys`, in draw order, determined by `seed`.
pub fn sample_without_replacement<T: Clone>(keys: &[T], count: usize, seed: u64) -> Result<Vec<T>> {
    if count > keys.len() {
        return Err(ForgeError::Decode(format!(
            "requested {count} samples from {} keys",
            keys.len()
        )));
    }
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut visited = HashSet::with_capacity(count);
    let last = keys.len() - 1;
    (0..count)
        .map(|_| draw_unique(&mut rng, 0..=last, &mut visited).map(|i| keys[i].clone()))
        .collect()
}
