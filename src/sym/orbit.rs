//! Permutation combinatorics for the equivariant layers.
//!
//! A size signature assigns one feature width per arity class (subset size)
//! of `n` interchangeable agents. Each arity class `m` owns `P(n, m)` blocks,
//! one per ordered m-permutation of the agents, laid out contiguously in
//! ascending class order with permutations in lexicographic order. Weight
//! sharing is driven by *orbits*: a full input permutation masked against a
//! fixed output permutation collapses to a masked pattern, and every
//! permutation pair with the same pattern shares one weight matrix.

use std::collections::BTreeSet;

/// Masking sentinel: an agent slot not visible to the output permutation.
pub const SENTINEL: i8 = -1;

/// Number of ordered m-permutations of n agents, `P(n, m) = n!/(n-m)!`.
///
/// Always integral; callers rely on exact block counts.
pub fn num_perms(n: usize, m: usize) -> usize {
    assert!(m <= n, "arity class {m} exceeds agent count {n}");
    ((n - m + 1)..=n).product()
}

/// Total feature width of a size signature: `sum_m P(n, m) * sizes[m]`.
///
/// The signature must carry exactly one entry per arity class `0..n`.
pub fn sizes_to_size(n: usize, sizes: &[usize]) -> usize {
    assert_eq!(
        sizes.len(),
        n,
        "size signature must have exactly {n} arity classes"
    );
    sizes
        .iter()
        .enumerate()
        .map(|(m, &width)| num_perms(n, m) * width)
        .sum()
}

/// All ordered m-permutations of `0..n`, in lexicographic order.
///
/// The block layout of every equivariant tensor follows this order, so it
/// must stay canonical.
pub fn perms(n: usize, m: usize) -> Vec<Vec<i8>> {
    assert!(m <= n, "arity class {m} exceeds agent count {n}");
    let items: Vec<i8> = (0..n as i8).collect();
    perms_from(&items, m)
}

/// Ordered m-permutations of the given items, positions treated as distinct.
fn perms_from(items: &[i8], m: usize) -> Vec<Vec<i8>> {
    fn rec(items: &[i8], used: &mut [bool], cur: &mut Vec<i8>, m: usize, out: &mut Vec<Vec<i8>>) {
        if cur.len() == m {
            out.push(cur.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            cur.push(items[i]);
            rec(items, used, cur, m, out);
            cur.pop();
            used[i] = false;
        }
    }

    let mut out = Vec::new();
    let mut used = vec![false; items.len()];
    rec(items, &mut used, &mut Vec::with_capacity(m), m, &mut out);
    out
}

/// Mask a full permutation against a keep set (the output permutation).
///
/// Every element present in `keep` is replaced by its rank within `keep`;
/// everything else becomes the sentinel. Pure function of its arguments.
pub fn mask_perm(perm: &[i8], keep: &[i8]) -> Vec<i8> {
    perm.iter()
        .map(|x| {
            keep.iter()
                .position(|k| k == x)
                .map(|rank| rank as i8)
                .unwrap_or(SENTINEL)
        })
        .collect()
}

/// The orbit set for `(n, m, k)`: unique m-length sequences over
/// `{0..k-1, SENTINEL}` with no repeated non-sentinel value and at most
/// `n - k` sentinels.
///
/// Built incrementally: the orbits for `k` are the orbits for `k-1` that
/// still fit the sentinel budget, plus every sentinel-position substitution
/// of `k-1`. This avoids generating and discarding the full permutation set.
pub fn masked_perms(n: usize, m: usize, k: usize) -> BTreeSet<Vec<i8>> {
    assert!(m <= n, "arity class {m} exceeds agent count {n}");
    assert!(k <= n, "keep count {k} exceeds agent count {n}");

    let mut orbits = BTreeSet::new();
    orbits.insert(vec![SENTINEL; m]);
    for v in 1..=k {
        let mut next = BTreeSet::new();
        for orbit in &orbits {
            let sentinels = orbit.iter().filter(|&&x| x == SENTINEL).count();
            if sentinels <= n - v {
                next.insert(orbit.clone());
            }
            for (i, &x) in orbit.iter().enumerate() {
                if x == SENTINEL {
                    let mut sub = orbit.clone();
                    sub[i] = (v - 1) as i8;
                    next.insert(sub);
                }
            }
        }
        orbits = next;
    }
    orbits
}

/// Reference construction of the orbit set: enumerate permutations of the
/// padded alphabet `[0..k-1, SENTINEL * (n-k)]` and deduplicate.
///
/// Used as a cross-check against [`masked_perms`]; quadratic in the number
/// of raw permutations, so not the production path.
pub fn masked_perms_enumerated(n: usize, m: usize, k: usize) -> BTreeSet<Vec<i8>> {
    assert!(m <= n, "arity class {m} exceeds agent count {n}");
    assert!(k <= n, "keep count {k} exceeds agent count {n}");

    let mut alphabet: Vec<i8> = (0..k as i8).collect();
    alphabet.resize(n, SENTINEL);
    perms_from(&alphabet, m).into_iter().collect()
}

/// Identifies one weight-sharing orbit: the output arity class plus the
/// masked input permutation pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrbitKey {
    /// Output arity class `m1`.
    pub out_class: usize,
    /// Masked input permutation over `{0..m1-1, SENTINEL}`.
    pub masked: Vec<i8>,
}
