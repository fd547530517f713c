//! Overlay construction.
//!
//! Each peer picks its neighbors from the authoritative peer list by
//! Zipf-weighted sampling without replacement, which yields a power-law
//! degree distribution across the network. Selection is reproducible for
//! a given `(peer list, RNG seed)` pair.

use gossipnet_core::{constants, NodeId};
use rand::rngs::StdRng;
use rand::Rng;

/// Neighbor-set size for a peer list of `n` entries (self excluded):
/// `min(floor(n/2) + 1, n)`.
pub fn target_degree(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        (n / 2 + 1).min(n)
    }
}

/// Selects neighbors from `peers` (the peer list excluding self) with the
/// default Zipf exponent.
pub fn select_neighbors(peers: &[NodeId], rng: &mut StdRng) -> Vec<NodeId> {
    select_neighbors_with_alpha(peers, constants::ZIPF_ALPHA, rng)
}

/// Zipf-weighted sampling without replacement:
///
/// 1. rank peers ascending by canonical string,
/// 2. weight rank `i` as `1 / (i+1)^alpha`,
/// 3. draw `k` distinct entries, renormalizing after each draw.
pub fn select_neighbors_with_alpha(
    peers: &[NodeId],
    alpha: f64,
    rng: &mut StdRng,
) -> Vec<NodeId> {
    let mut ranked: Vec<NodeId> = peers.to_vec();
    ranked.sort_by(|a, b| a.canonical().cmp(&b.canonical()));
    ranked.dedup();

    let k = target_degree(ranked.len());
    let mut weights: Vec<f64> = (0..ranked.len())
        .map(|i| 1.0 / ((i + 1) as f64).powf(alpha))
        .collect();

    let mut chosen = Vec::with_capacity(k);
    for _ in 0..k {
        let total: f64 = weights.iter().sum();
        let mut r = rng.gen::<f64>() * total;
        let mut pick = weights.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            if r < *w {
                pick = i;
                break;
            }
            r -= *w;
        }
        chosen.push(ranked.remove(pick));
        weights.remove(pick);
    }
    chosen
}
