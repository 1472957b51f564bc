//! Longest increasing subsequence.
//!
//! The keyed diff maps each node of the new child list to the position it
//! had in the old list. The nodes on a longest increasing run of that map
//! are already in the right relative order and stay where they are; every
//! other reused node is moved. Picking the longest run minimizes moves.

/// Indices of a longest strictly increasing subsequence of `positions`,
/// in ascending order.
///
/// Entries equal to `0` mean "no old position" (a new node) and are never
/// part of the result. Among several longest subsequences, the one that
/// keeps earlier entries in place wins, so a node pulled towards the end of
/// the list is the one that moves.
///
/// Runs in `O(n log n)`.
pub fn get_sequence(positions: &[usize]) -> Vec<usize> {
    // Scanned right to left: `heads[k]` is the index starting the best
    // increasing run of length `k + 1` seen so far. A run starting with a
    // larger value leaves more room in front of it, so the values at
    // `heads` strictly decrease with `k`.
    let mut heads: Vec<usize> = Vec::new();
    let mut next = vec![usize::MAX; positions.len()];

    for (i, &value) in positions.iter().enumerate().rev() {
        if value == 0 {
            continue;
        }
        let len = heads.partition_point(|&h| positions[h] > value);
        if len > 0 {
            next[i] = heads[len - 1];
        }
        if len == heads.len() {
            heads.push(i);
        } else if value > positions[heads[len]] {
            heads[len] = i;
        }
    }

    let mut result = Vec::with_capacity(heads.len());
    let mut cursor = heads.last().copied();
    while let Some(i) = cursor {
        result.push(i);
        cursor = Some(next[i]).filter(|&n| n != usize::MAX);
    }
    result
}
