//! Ordering shared by every [`crate::traits::IndexReader`] and the adapter.
//!
//! Hits rank by score descending, then sequence index ascending, then chunk
//! id. Engines that stop collecting at a limit break ties their own way, so
//! readers fetch until the tie group at the k-th slot is complete and only
//! then cut.

use std::cmp::Ordering;

use crate::types::SearchHit;

pub fn hit_order(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.sequence_index.cmp(&b.sequence_index))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Sorts `hits` with [`hit_order`] and keeps the first `k`.
pub fn cut(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(hit_order);
    hits.truncate(k);
    hits
}

/// Calls `fetch(limit)` with a growing limit until the result cannot hide a
/// hit tying the k-th best, then returns the top `k` in [`hit_order`].
///
/// A fetch is settled when it returned fewer than `limit` hits, or when its
/// weakest hit scores strictly below the k-th best.
pub fn top_k<F>(k: usize, mut fetch: F) -> anyhow::Result<Vec<SearchHit>>
where
    F: FnMut(usize) -> anyhow::Result<Vec<SearchHit>>,
{
    if k == 0 {
        return Ok(Vec::new());
    }
    // One past k shows whether the k-th hit is tied with the next.
    let mut limit = k.saturating_add(1);
    loop {
        let hits = fetch(limit)?;
        if limit == usize::MAX || is_settled(&hits, k, limit) {
            return Ok(cut(hits, k));
        }
        limit = limit.saturating_mul(2);
    }
}

fn is_settled(hits: &[SearchHit], k: usize, limit: usize) -> bool {
    if hits.len() < limit {
        return true;
    }
    let mut scores: Vec<f32> = hits.iter().map(|h| h.score).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    let kth = scores[k.min(scores.len()) - 1];
    scores.last().map_or(true, |weakest| weakest.total_cmp(&kth) == Ordering::Less)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceKind;
    use std::cell::RefCell;

    fn hit(id: &str, seq: usize, score: f32) -> SearchHit {
        SearchHit {
            chunk_id: id.into(),
            doc_id: "d".into(),
            sequence_index: seq,
            title: String::new(),
            source_url: String::new(),
            text: String::new(),
            score,
            source: SourceKind::Memory,
        }
    }

    /// Returns the first `limit` hits in insertion order among equal
    /// scores, the way a collector ordered by doc address would.
    fn engine(all: Vec<SearchHit>) -> impl Fn(usize) -> anyhow::Result<Vec<SearchHit>> {
        move |limit| {
            let mut sorted = all.clone();
            sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
            sorted.truncate(limit);
            Ok(sorted)
        }
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }

    #[test]
    fn ties_across_the_cut_follow_sequence_then_id() {
        let all = vec![hit("z:0", 0, 1.0), hit("z:1", 1, 1.0), hit("a:0", 0, 1.0), hit("m:0", 0, 0.2)];
        let top2 = top_k(2, engine(all.clone())).unwrap();
        assert_eq!(ids(&top2), ["a:0", "z:0"]);
        let every = top_k(10, engine(all)).unwrap();
        assert_eq!(ids(&every), ["a:0", "z:0", "z:1", "m:0"]);
        assert_eq!(ids(&every[..2]), ids(&top2));
    }

    #[test]
    fn fetch_grows_only_while_the_tie_is_open() {
        let all = vec![hit("c:0", 0, 1.0), hit("b:0", 0, 1.0), hit("a:0", 0, 1.0), hit("d:0", 0, 0.5), hit("e:0", 0, 0.1)];
        let limits = RefCell::new(Vec::new());
        let inner = engine(all);
        let top = top_k(1, |limit| {
            limits.borrow_mut().push(limit);
            inner(limit)
        })
        .unwrap();
        assert_eq!(ids(&top), ["a:0"]);
        assert_eq!(*limits.borrow(), [2, 4]);
    }

    #[test]
    fn distinct_scores_need_a_single_fetch() {
        let limits = RefCell::new(Vec::new());
        let inner = engine(vec![hit("a:0", 0, 0.9), hit("b:0", 0, 0.5), hit("c:0", 0, 0.1)]);
        let top = top_k(2, |limit| {
            limits.borrow_mut().push(limit);
            inner(limit)
        })
        .unwrap();
        assert_eq!(ids(&top), ["a:0", "b:0"]);
        assert_eq!(*limits.borrow(), [3]);
    }

    #[test]
    fn zero_k_fetches_nothing() {
        let top = top_k(0, |_| anyhow::bail!("not called")).unwrap();
        assert!(top.is_empty());
    }
}
