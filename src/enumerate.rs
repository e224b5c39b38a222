//! Key enumeration
//!
//! Combines per-byte ranked score lists into one globally ranked stream of
//! full-key candidates whose total score is the sum of the per-byte scores.
//! The 2^(8·K) key space is never materialized: everything is pulled lazily
//! through a binary tree of pairwise merge nodes.
//!
//! ## Merge node invariants
//! A node owns two child streams, R ("row") and C ("column"), plus a
//! **frontier**: for each buffered row `j`, the cursor `c[j]` of the next
//! unemitted column. At each emission the node picks the `j*` maximizing
//! `R[j].score + C[c[j]].score`, emits that combination, and advances
//! `c[j*]`:
//! - R is extended by one element the first time a row emits (only the last
//!   buffered row can be in that state), which also appends a fresh cursor;
//! - C is extended when any cursor reaches its current tail;
//! - a cursor that falls off a fully-extended C is retired for good.
//!
//! The best still-unemitted combination always lies inside the frontier, so
//! this is an exact ordered merge, not a heuristic. Children are consumed
//! strictly lazily; enumerating the top N keys touches O(N) child elements
//! per tree level.
//!
//! ## NaN scores
//! Leaves sort NaN scores past every finite score and treat the first NaN
//! as end-of-stream, so no NaN ever becomes part of a candidate.

#![forbid(unsafe_code)]

use crate::KEY_CLASSES;

/// Cursor value marking a retired frontier row.
const RETIRED: usize = usize::MAX;

/// One enumerated (partial or full) key with its total score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedKey {
    pub score: f64,
    pub bytes: Vec<u8>,
}

enum Node {
    Leaf(Leaf),
    Merge(Box<Merge>),
}

impl Node {
    /// Append up to `n` further elements to `out`; `true` means the stream
    /// ran out before producing all of them.
    fn next(&mut self, out: &mut Vec<RankedKey>, n: usize) -> bool {
        match self {
            Node::Leaf(leaf) => leaf.next(out, n),
            Node::Merge(merge) => merge.next(out, n),
        }
    }
}

// ============================================================================
// Leaves: one ranked key byte
// ============================================================================

struct Leaf {
    scores: [f64; KEY_CLASSES],
    /// Key values sorted by descending score, NaN entries last.
    order: Vec<u8>,
    cursor: usize,
}

impl Leaf {
    fn new(scores: &[f64; KEY_CLASSES]) -> Self {
        let mut order: Vec<u8> = (0..=255).collect();
        // Stable: equal scores keep ascending key order (first seen).
        order.sort_by(|&a, &b| {
            let (sa, sb) = (scores[a as usize], scores[b as usize]);
            match (sa.is_nan(), sb.is_nan()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) => sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal),
            }
        });
        Self { scores: *scores, order, cursor: 0 }
    }

    fn next(&mut self, out: &mut Vec<RankedKey>, n: usize) -> bool {
        for _ in 0..n {
            if self.cursor >= KEY_CLASSES {
                return true;
            }
            let key = self.order[self.cursor];
            let score = self.scores[key as usize];
            if score.is_nan() {
                // Everything from here on is NaN; the stream ends early.
                self.cursor = KEY_CLASSES;
                return true;
            }
            out.push(RankedKey { score, bytes: vec![key] });
            self.cursor += 1;
        }
        false
    }
}

// ============================================================================
// Merge nodes
// ============================================================================

struct Merge {
    row: Node,
    col: Node,
    row_buf: Vec<RankedKey>,
    col_buf: Vec<RankedKey>,
    /// Frontier: `cursors[j]` is the next column for buffered row `j`.
    cursors: Vec<usize>,
    row_exhausted: bool,
    col_exhausted: bool,
}

impl Merge {
    fn new(row: Node, col: Node) -> Self {
        Self {
            row,
            col,
            row_buf: Vec::new(),
            col_buf: Vec::new(),
            cursors: vec![0],
            row_exhausted: false,
            col_exhausted: false,
        }
    }

    fn next(&mut self, out: &mut Vec<RankedKey>, n: usize) -> bool {
        // Bootstrap one element per side.
        if self.row_buf.is_empty() {
            self.row_exhausted = self.row.next(&mut self.row_buf, 1);
            if self.row_buf.is_empty() {
                return true;
            }
        }
        if self.col_buf.is_empty() {
            self.col_exhausted = self.col.next(&mut self.col_buf, 1);
            if self.col_buf.is_empty() {
                return true;
            }
        }

        for _ in 0..n {
            // Best active frontier entry.
            let mut best_j = RETIRED;
            let mut best_score = f64::NEG_INFINITY;
            for (j, &cursor) in self.cursors.iter().enumerate() {
                if cursor == RETIRED {
                    continue;
                }
                let score = self.row_buf[j].score + self.col_buf[cursor].score;
                if score > best_score {
                    best_score = score;
                    best_j = j;
                }
            }
            if best_j == RETIRED {
                return true;
            }

            let cursor = self.cursors[best_j];
            let mut bytes = self.row_buf[best_j].bytes.clone();
            bytes.extend_from_slice(&self.col_buf[cursor].bytes);
            out.push(RankedKey { score: best_score, bytes });

            // First emission of the newest row: extend R and open the next
            // row's frontier entry at column 0.
            if cursor == 0 {
                debug_assert_eq!(best_j, self.cursors.len() - 1);
                if !self.row_exhausted {
                    self.row_exhausted = self.row.next(&mut self.row_buf, 1);
                }
                if self.cursors.len() < self.row_buf.len() {
                    self.cursors.push(0);
                }
            }

            self.cursors[best_j] += 1;
            if self.cursors[best_j] == self.col_buf.len() && !self.col_exhausted {
                self.col_exhausted = self.col.next(&mut self.col_buf, 1);
            }
            if self.cursors[best_j] == self.col_buf.len() {
                self.cursors[best_j] = RETIRED;
            }
        }
        false
    }
}

// ============================================================================
// Public enumerator
// ============================================================================

/// Ordered enumerator over full keys, built from one 256-score array per
/// key byte.
pub struct KeyEnumerator {
    root: Option<Node>,
}

impl KeyEnumerator {
    pub fn new(byte_scores: &[[f64; KEY_CLASSES]]) -> Self {
        let mut nodes: Vec<Node> =
            byte_scores.iter().map(|scores| Node::Leaf(Leaf::new(scores))).collect();
        // Pairwise merge, carrying an odd leftover to the next level, until
        // one stream remains. Adjacent pairing preserves byte order in the
        // concatenated keys.
        while nodes.len() > 1 {
            let mut level = Vec::with_capacity(nodes.len().div_ceil(2));
            let mut iter = nodes.into_iter();
            while let Some(first) = iter.next() {
                match iter.next() {
                    Some(second) => {
                        level.push(Node::Merge(Box::new(Merge::new(first, second))));
                    }
                    None => level.push(first),
                }
            }
            nodes = level;
        }
        Self { root: nodes.pop() }
    }

    /// Pull up to `n` further keys in descending total-score order.
    /// Returns `true` when the stream is exhausted.
    pub fn next_batch(&mut self, out: &mut Vec<RankedKey>, n: usize) -> bool {
        match self.root.as_mut() {
            Some(root) => root.next(out, n),
            None => true,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn collect(scores: &[[f64; KEY_CLASSES]], n: usize) -> Vec<RankedKey> {
        let mut enumerator = KeyEnumerator::new(scores);
        let mut out = Vec::new();
        enumerator.next_batch(&mut out, n);
        out
    }

    /// Scores where key `k` of byte `b` gets one of {10, 7, 3, 0} by a
    /// per-byte permutation, everything else strongly negative.
    fn permuted_scores(bytes: usize) -> Vec<[f64; KEY_CLASSES]> {
        let tiers = [10.0, 7.0, 3.0, 0.0];
        (0..bytes)
            .map(|b| {
                let mut scores = [-1000.0; KEY_CLASSES];
                for (rank, &score) in tiers.iter().enumerate() {
                    // A different winning key per byte and tier.
                    scores[(b * 31 + rank * 7) % KEY_CLASSES] = score;
                }
                scores
            })
            .collect()
    }

    #[test]
    fn top_candidates_are_sums_of_bytewise_tiers() {
        let scores = permuted_scores(4);
        let keys = collect(&scores, 16);
        assert_eq!(keys.len(), 16);

        // Rank 1 combines the four per-byte winners.
        assert_eq!(keys[0].score, 40.0);
        for (b, byte) in keys[0].bytes.iter().enumerate() {
            assert_eq!(*byte as usize, (b * 31) % KEY_CLASSES);
        }

        // Every emitted score is the sum of its bytewise scores, and the
        // sequence never increases.
        for window in keys.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        for key in &keys {
            let total: f64 = key
                .bytes
                .iter()
                .enumerate()
                .map(|(b, &k)| scores[b][k as usize])
                .sum();
            assert_eq!(key.score, total);
        }

        // The emitted totals match the best 16 by brute force over tiers.
        let tiers = [10.0, 7.0, 3.0, 0.0];
        let mut all_sums = Vec::new();
        for a in tiers {
            for b in tiers {
                for c in tiers {
                    for d in tiers {
                        all_sums.push(a + b + c + d);
                    }
                }
            }
        }
        all_sums.sort_by(|x, y| y.partial_cmp(x).unwrap());
        let expected: Vec<f64> = all_sums[..16].to_vec();
        let emitted: Vec<f64> = keys.iter().map(|k| k.score).collect();
        assert_eq!(emitted, expected);
    }

    #[test]
    fn two_byte_enumeration_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(99);
        let scores: Vec<[f64; KEY_CLASSES]> = (0..2)
            .map(|_| {
                let mut s = [0.0; KEY_CLASSES];
                for slot in &mut s {
                    *slot = rng.gen_range(-50.0..50.0);
                }
                s
            })
            .collect();

        let keys = collect(&scores, 200);
        assert_eq!(keys.len(), 200);

        let mut brute: Vec<f64> = Vec::with_capacity(KEY_CLASSES * KEY_CLASSES);
        for a in 0..KEY_CLASSES {
            for b in 0..KEY_CLASSES {
                brute.push(scores[0][a] + scores[1][b]);
            }
        }
        brute.sort_by(|x, y| y.partial_cmp(x).unwrap());
        for (i, key) in keys.iter().enumerate() {
            assert!(
                (key.score - brute[i]).abs() < 1e-9,
                "rank {i}: {} != {}",
                key.score,
                brute[i]
            );
        }
    }

    #[test]
    fn odd_byte_counts_preserve_byte_order() {
        let scores = permuted_scores(3);
        let keys = collect(&scores, 4);
        for key in &keys {
            assert_eq!(key.bytes.len(), 3);
        }
        // Best key still concatenates the per-byte winners in byte order.
        for (b, byte) in keys[0].bytes.iter().enumerate() {
            assert_eq!(*byte as usize, (b * 31) % KEY_CLASSES);
        }
    }

    #[test]
    fn nan_scores_never_become_candidates() {
        let mut byte0 = [f64::NAN; KEY_CLASSES];
        byte0[7] = 5.0;
        byte0[9] = 3.0;
        let mut byte1 = [f64::NAN; KEY_CLASSES];
        byte1[1] = 2.0;

        let keys = collect(&[byte0, byte1], 1000);
        // Only 2 × 1 finite combinations exist.
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].bytes, vec![7, 1]);
        assert_eq!(keys[0].score, 7.0);
        assert_eq!(keys[1].bytes, vec![9, 1]);
        assert_eq!(keys[1].score, 5.0);
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut byte0 = [f64::NAN; KEY_CLASSES];
        byte0[0] = 1.0;
        let mut enumerator = KeyEnumerator::new(&[byte0]);
        let mut out = Vec::new();
        assert!(enumerator.next_batch(&mut out, 10));
        assert_eq!(out.len(), 1);
        assert!(enumerator.next_batch(&mut out, 1));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn single_byte_enumeration_is_a_sorted_scan() {
        let mut scores = [0.0; KEY_CLASSES];
        for (k, slot) in scores.iter_mut().enumerate() {
            *slot = f64::from((k as u32 * 37) % 251);
        }
        let keys = collect(&[scores], KEY_CLASSES);
        assert_eq!(keys.len(), KEY_CLASSES);
        for window in keys.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }

    #[test]
    fn ties_resolve_to_lower_key_first() {
        let mut scores = [0.0; KEY_CLASSES];
        scores[10] = 9.0;
        scores[20] = 9.0;
        let keys = collect(&[scores], 2);
        assert_eq!(keys[0].bytes, vec![10]);
        assert_eq!(keys[1].bytes, vec![20]);
    }

    #[test]
    fn empty_byte_list_is_immediately_exhausted() {
        let mut enumerator = KeyEnumerator::new(&[]);
        let mut out = Vec::new();
        assert!(enumerator.next_batch(&mut out, 5));
        assert!(out.is_empty());
    }
}
