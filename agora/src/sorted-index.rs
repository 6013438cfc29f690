// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of agora.
//
// agora is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// agora is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with agora.  If not,
// see <http://www.gnu.org/licenses/>.

//! # sorted-index
//!
//! A mapping from member to numeric score, ordered by score.
//!
//! Everything in agora that ranks anything is one of these: the global by-time & by-score
//! rankings, each post's vote ledger (voter to direction), and the community-scoped rankings
//! derived from the global ones.
//!
//! ## Representation
//!
//! Two structures are kept in sync: a `HashMap` from member to score, and a treap keyed on
//! `(score, member)` in which every node also records the size of its subtree. Point lookups go
//! through the map. Everything rank- or range-based walks the treap, using the subtree sizes to
//! skip whole subtrees at a time.
//!
//! The treap's nodes live in a single `Vec` & refer to one another by index; removed nodes' slots
//! go on a free list for re-use. Node priorities are drawn from a seeded RNG, so the tree is
//! balanced in expectation whatever order members arrive in, which makes insertion, removal &
//! rank lookups O(log n) and a range query O(log n + k) for a range of k members.
//!
//! ## Ties
//!
//! Members with equal scores are ordered by member, and since every public query here is
//! *descending*, a tie is broken by the *larger* member first. That's the same thing a Redis
//! `ZREVRANGE` does, and it's fixed: given unchanged data, rank `i` always names the same member,
//! so adjacent pages never overlap or leave gaps.

use std::{cmp::Ordering, collections::HashMap, hash::Hash};

use ordered_float::OrderedFloat;
use rand::{RngCore, SeedableRng, rngs::StdRng};

/// The "null" node index
const NIL: usize = usize::MAX;

const PRIORITY_SEED: u64 = 0x61676f7261;

type Key<M> = (OrderedFloat<f64>, M);

#[derive(Clone, Debug)]
struct Node<M> {
    key: Key<M>,
    /// Max-heap ordered
    priority: u64,
    /// The number of nodes in the subtree rooted here, this one included
    size: usize,
    left: usize,
    right: usize,
}

/// An ordered mapping from `M` to an `f64` score
///
/// See the module documentation for the ordering of ties.
#[derive(Clone, Debug)]
pub struct SortedIndex<M> {
    nodes: Vec<Node<M>>,
    free: Vec<usize>,
    root: usize,
    scores: HashMap<M, OrderedFloat<f64>>,
    rng: StdRng,
}

impl<M> Default for SortedIndex<M> {
    fn default() -> Self {
        SortedIndex {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NIL,
            scores: HashMap::new(),
            rng: StdRng::seed_from_u64(PRIORITY_SEED),
        }
    }
}

impl<M> SortedIndex<M>
where
    M: Copy + Eq + Hash + Ord,
{
    pub fn new() -> SortedIndex<M> {
        SortedIndex::default()
    }
    pub fn len(&self) -> usize {
        self.scores.len()
    }
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
    pub fn contains(&self, member: &M) -> bool {
        self.scores.contains_key(member)
    }
    /// Set `member`'s score, inserting it if it's not already present; return true if `member` is
    /// new.
    pub fn upsert(&mut self, member: M, score: f64) -> bool {
        let score = OrderedFloat(score);
        let added = match self.scores.insert(member, score) {
            Some(old) if old == score => return false,
            Some(old) => {
                let root = self.root;
                self.root = self.erase(root, (old, member));
                false
            }
            None => true,
        };
        let (node, root) = (self.alloc((score, member)), self.root);
        let (below, above) = self.split(root, (score, member));
        let below = self.merge(below, node);
        self.root = self.merge(below, above);
        added
    }
    pub fn score(&self, member: &M) -> Option<f64> {
        self.scores.get(member).map(|s| s.0)
    }
    /// Add `delta` to `member`'s score, treating an absent member as having score zero (which is
    /// what a Redis `ZINCRBY` does); return the new score.
    pub fn increment_score(&mut self, member: M, delta: f64) -> f64 {
        let score = self.score(&member).unwrap_or(0.0) + delta;
        self.upsert(member, score);
        score
    }
    /// Remove `member`; return true if it was present.
    pub fn remove(&mut self, member: &M) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                let root = self.root;
                self.root = self.erase(root, (score, *member));
                true
            }
            None => false,
        }
    }
    /// The 0-based rank of `member` counting from the *highest* score
    pub fn rank_desc(&self, member: &M) -> Option<usize> {
        let key = (*self.scores.get(member)?, *member);
        let mut t = self.root;
        let mut below = 0;
        while t != NIL {
            let node = &self.nodes[t];
            match key.cmp(&node.key) {
                Ordering::Less => t = node.left,
                Ordering::Equal => return Some(self.len() - 1 - (below + self.size(node.left))),
                Ordering::Greater => {
                    below += self.size(node.left) + 1;
                    t = node.right;
                }
            }
        }
        None
    }
    /// Members with ranks `start` through `stop` (inclusive), highest score first
    ///
    /// Ranks past the end of the index are silently dropped, so a range lying entirely past the
    /// end yields an empty `Vec`; so does `start > stop`.
    pub fn range_by_rank_desc(&self, start: usize, stop: usize) -> Vec<M> {
        self.range_by_rank_desc_with_scores(start, stop)
            .into_iter()
            .map(|(m, _)| m)
            .collect()
    }
    /// Like [range_by_rank_desc](SortedIndex::range_by_rank_desc), but with scores
    pub fn range_by_rank_desc_with_scores(&self, start: usize, stop: usize) -> Vec<(M, f64)> {
        let len = self.len();
        if start > stop || start >= len {
            return Vec::new();
        }
        let stop = stop.min(len - 1);
        let mut out = Vec::with_capacity(stop - start + 1);
        // Descending rank r lives at ascending position len - 1 - r
        self.collect_desc(self.root, len - 1 - stop, len - 1 - start, &mut out);
        out
    }
    /// Count the members whose scores lie in the closed interval `[min, max]`
    pub fn count_in_score_range(&self, min: f64, max: f64) -> usize {
        if min > max {
            return 0;
        }
        let (min, max) = (OrderedFloat(min), OrderedFloat(max));
        let lo = self.partition_point(|(s, _)| *s < min);
        let hi = self.partition_point(|(s, _)| *s <= max);
        hi.saturating_sub(lo)
    }
    /// All members, highest score first
    pub fn iter_desc(&self) -> impl Iterator<Item = (M, f64)> + '_ {
        Descending::new(self)
    }
    /// Build a new index containing only those members of `self` for which `keep` returns true,
    /// each with its score in `self`
    ///
    /// This is how community-scoped rankings are derived: intersect the community's post set with
    /// a global ranking, keeping the global score.
    pub fn intersect<F>(&self, keep: F) -> SortedIndex<M>
    where
        F: Fn(&M) -> bool,
    {
        self.iter_desc().filter(|(m, _)| keep(m)).collect()
    }

    fn size(&self, t: usize) -> usize {
        if t == NIL { 0 } else { self.nodes[t].size }
    }
    fn resize(&mut self, t: usize) {
        let size = 1 + self.size(self.nodes[t].left) + self.size(self.nodes[t].right);
        self.nodes[t].size = size;
    }
    fn alloc(&mut self, key: Key<M>) -> usize {
        let node = Node {
            key,
            priority: self.rng.next_u64(),
            size: 1,
            left: NIL,
            right: NIL,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }
    /// Split the subtree rooted at `t` into those keys less than `key` & the rest
    fn split(&mut self, t: usize, key: Key<M>) -> (usize, usize) {
        if t == NIL {
            return (NIL, NIL);
        }
        let Node { left, right, .. } = self.nodes[t];
        if self.nodes[t].key < key {
            let (lo, hi) = self.split(right, key);
            self.nodes[t].right = lo;
            self.resize(t);
            (t, hi)
        } else {
            let (lo, hi) = self.split(left, key);
            self.nodes[t].left = hi;
            self.resize(t);
            (lo, t)
        }
    }
    /// Join two subtrees; every key in `lo` must be less than every key in `hi`
    fn merge(&mut self, lo: usize, hi: usize) -> usize {
        if lo == NIL {
            return hi;
        }
        if hi == NIL {
            return lo;
        }
        if self.nodes[lo].priority > self.nodes[hi].priority {
            let right = self.nodes[lo].right;
            let right = self.merge(right, hi);
            self.nodes[lo].right = right;
            self.resize(lo);
            lo
        } else {
            let left = self.nodes[hi].left;
            let left = self.merge(lo, left);
            self.nodes[hi].left = left;
            self.resize(hi);
            hi
        }
    }
    /// Remove `key` from the subtree rooted at `t`; return the new root of that subtree
    fn erase(&mut self, t: usize, key: Key<M>) -> usize {
        if t == NIL {
            return NIL;
        }
        let Node { left, right, .. } = self.nodes[t];
        match key.cmp(&self.nodes[t].key) {
            Ordering::Less => {
                let left = self.erase(left, key);
                self.nodes[t].left = left;
                self.resize(t);
                t
            }
            Ordering::Greater => {
                let right = self.erase(right, key);
                self.nodes[t].right = right;
                self.resize(t);
                t
            }
            Ordering::Equal => {
                self.free.push(t);
                self.merge(left, right)
            }
        }
    }
    /// The number of keys for which `below` holds; `below` must be true for some prefix of the
    /// ascending order & false thereafter
    fn partition_point<P>(&self, below: P) -> usize
    where
        P: Fn(&Key<M>) -> bool,
    {
        let mut t = self.root;
        let mut n = 0;
        while t != NIL {
            let node = &self.nodes[t];
            if below(&node.key) {
                n += self.size(node.left) + 1;
                t = node.right;
            } else {
                t = node.left;
            }
        }
        n
    }
    /// Push the keys at ascending positions `lo..=hi` within the subtree rooted at `t` onto `out`,
    /// highest first
    fn collect_desc(&self, t: usize, lo: usize, hi: usize, out: &mut Vec<(M, f64)>) {
        if t == NIL {
            return;
        }
        let node = &self.nodes[t];
        let here = self.size(node.left);
        if hi > here {
            self.collect_desc(node.right, lo.saturating_sub(here + 1), hi - here - 1, out);
        }
        if lo <= here && here <= hi {
            out.push((node.key.1, node.key.0.0));
        }
        if lo < here {
            self.collect_desc(node.left, lo, hi.min(here - 1), out);
        }
    }
}

/// Reverse in-order walk over a [SortedIndex]
struct Descending<'a, M> {
    index: &'a SortedIndex<M>,
    stack: Vec<usize>,
}

impl<'a, M> Descending<'a, M> {
    fn new(index: &'a SortedIndex<M>) -> Descending<'a, M> {
        let mut iter = Descending {
            index,
            stack: Vec::new(),
        };
        iter.push_right_spine(index.root);
        iter
    }
    fn push_right_spine(&mut self, mut t: usize) {
        while t != NIL {
            self.stack.push(t);
            t = self.index.nodes[t].right;
        }
    }
}

impl<M: Copy> Iterator for Descending<'_, M> {
    type Item = (M, f64);
    fn next(&mut self) -> Option<Self::Item> {
        let index = self.index;
        let node = &index.nodes[self.stack.pop()?];
        self.push_right_spine(node.left);
        Some((node.key.1, node.key.0.0))
    }
}

impl<M> FromIterator<(M, f64)> for SortedIndex<M>
where
    M: Copy + Eq + Hash + Ord,
{
    fn from_iter<T: IntoIterator<Item = (M, f64)>>(iter: T) -> Self {
        let mut index = SortedIndex::new();
        iter.into_iter().for_each(|(m, s)| {
            index.upsert(m, s);
        });
        index
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::HashSet;

    fn index(pairs: &[(u64, f64)]) -> SortedIndex<u64> {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn upsert_score_remove() {
        let mut idx = SortedIndex::<u64>::new();
        assert!(idx.is_empty());
        assert!(idx.upsert(1, 10.0));
        assert!(idx.upsert(2, 20.0));
        assert!(!idx.upsert(1, 30.0));
        assert!(!idx.upsert(1, 30.0));
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.score(&1), Some(30.0));
        assert_eq!(idx.score(&3), None);
        assert_eq!(idx.range_by_rank_desc(0, 10), vec![1, 2]);
        assert!(idx.remove(&1));
        assert!(!idx.remove(&1));
        assert_eq!(idx.range_by_rank_desc(0, 10), vec![2]);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn increment() {
        let mut idx = index(&[(1, 100.0)]);
        assert_eq!(idx.increment_score(1, 432.0), 532.0);
        assert_eq!(idx.increment_score(1, -864.0), -332.0);
        // Absent members start from zero
        assert_eq!(idx.increment_score(2, 5.0), 5.0);
        assert_eq!(idx.range_by_rank_desc(0, 1), vec![2, 1]);
    }

    #[test]
    fn ranges() {
        let idx = index(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0), (5, 5.0)]);
        assert_eq!(idx.range_by_rank_desc(0, 1), vec![5, 4]);
        assert_eq!(idx.range_by_rank_desc(2, 3), vec![3, 2]);
        assert_eq!(idx.range_by_rank_desc(4, 5), vec![1]);
        assert!(idx.range_by_rank_desc(5, 9).is_empty());
        assert!(idx.range_by_rank_desc(3, 2).is_empty());
        assert_eq!(
            idx.range_by_rank_desc_with_scores(0, 0),
            vec![(5u64, 5.0)]
        );
        assert_eq!(idx.rank_desc(&5), Some(0));
        assert_eq!(idx.rank_desc(&1), Some(4));
        assert_eq!(idx.rank_desc(&9), None);

        assert!(SortedIndex::<u64>::new().range_by_rank_desc(0, 10).is_empty());
    }

    #[test]
    fn ties_break_by_member_descending() {
        let idx = index(&[(3, 7.0), (9, 7.0), (1, 7.0), (5, 8.0)]);
        assert_eq!(idx.range_by_rank_desc(0, 3), vec![5, 9, 3, 1]);
        // ...and the order is the same page-by-page
        let paged: Vec<u64> = (0..4)
            .flat_map(|i| idx.range_by_rank_desc(i, i))
            .collect();
        assert_eq!(paged, vec![5, 9, 3, 1]);
    }

    #[test]
    fn pages_never_overlap() {
        // Lots of ties, to make sure the tie-break is stable across page boundaries
        let idx: SortedIndex<u64> = (0..97u64).map(|i| (i, (i % 7) as f64)).collect();
        let mut seen = HashSet::new();
        let mut total = 0;
        for page in 0..10 {
            let members = idx.range_by_rank_desc(page * 10, page * 10 + 9);
            total += members.len();
            for m in members {
                assert!(seen.insert(m), "{m} appeared twice");
            }
        }
        assert_eq!(total, 97);
        assert_eq!(seen.len(), 97);
    }

    fn height(idx: &SortedIndex<u64>, t: usize) -> usize {
        if t == NIL {
            0
        } else {
            1 + height(idx, idx.nodes[t].left).max(height(idx, idx.nodes[t].right))
        }
    }

    #[test]
    fn stays_shallow_under_churn() {
        // Members arrive in score order, which would degenerate an unbalanced tree into a list
        const N: u64 = 100_000;
        let mut idx: SortedIndex<u64> = (1..N).map(|i| (i, i as f64)).collect();
        assert!(idx.upsert(0, 0.0));
        // Flip member zero between the bottom & the top of the index
        for i in 0..2000 {
            let (score, rank) = if i % 2 == 0 {
                (N as f64, 0)
            } else {
                (-1.0, N as usize - 1)
            };
            assert!(!idx.upsert(0, score));
            assert_eq!(idx.rank_desc(&0), Some(rank));
        }
        assert_eq!(idx.len(), N as usize);
        // Removed slots are re-used, not leaked
        assert_eq!(idx.nodes.len() - idx.free.len(), N as usize);
        assert_eq!(idx.nodes[idx.root].size, N as usize);

        let log2 = (N as f64).log2().ceil() as usize;
        let depth = height(&idx, idx.root);
        assert!(depth <= 4 * log2, "depth {depth} for {N} members");

        assert_eq!(idx.range_by_rank_desc(0, 2), vec![N - 1, N - 2, N - 3]);
        assert_eq!(idx.range_by_rank_desc(N as usize - 2, N as usize + 5), vec![1, 0]);
        assert_eq!(idx.count_in_score_range(10.0, 19.0), 10);
        assert!(idx.remove(&0));
        assert!(height(&idx, idx.root) <= 4 * log2);
        assert_eq!(
            idx.iter_desc().map(|(m, _)| m).take(3).collect::<Vec<_>>(),
            vec![N - 1, N - 2, N - 3]
        );
    }

    #[test]
    fn counting() {
        let idx = index(&[(1, 1.0), (2, 1.0), (3, -1.0), (4, 1.0), (5, -1.0)]);
        assert_eq!(idx.count_in_score_range(1.0, 1.0), 3);
        assert_eq!(idx.count_in_score_range(-1.0, -1.0), 2);
        assert_eq!(idx.count_in_score_range(-1.0, 1.0), 5);
        assert_eq!(idx.count_in_score_range(0.0, 0.0), 0);
        assert_eq!(idx.count_in_score_range(2.0, 1.0), 0);
    }

    #[test]
    fn intersection_keeps_scores() {
        let idx = index(&[(1, 10.0), (2, 20.0), (3, 30.0), (4, 40.0)]);
        let members: HashSet<u64> = [2, 4, 6].into_iter().collect();
        let scoped = idx.intersect(|m| members.contains(m));
        assert_eq!(scoped.len(), 2);
        assert_eq!(scoped.range_by_rank_desc(0, 9), vec![4, 2]);
        assert_eq!(scoped.score(&4), Some(40.0));
        assert_eq!(scoped.score(&6), None);
        assert_eq!(
            scoped.iter_desc().collect::<Vec<_>>(),
            vec![(4, 40.0), (2, 20.0)]
        );
    }
}
