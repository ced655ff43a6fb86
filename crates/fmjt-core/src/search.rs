//! Parallel, paginated, threshold-pruned top-k ranking over store rows.
//!
//! Rows are range-partitioned across worker tasks; each worker keeps a
//! bounded heap of candidates for its partition and the partial heaps are
//! merged, re-ranked, and windowed. The heap direction depends on where
//! the requested page sits: head windows retain the best `offset + limit`
//! candidates, tail windows retain the worst `rows - offset`, keeping peak
//! auxiliary memory at `O(min(offset + limit, rows - offset))`. Both paths
//! produce exactly the ordering of a full sort under the pinned rank order
//! (better score first, ties broken by ascending position).

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::ops::Range;

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::math;
use crate::store::MatrixStore;

/// Scoring function for ranking rows against a query vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Squared Euclidean distance; smaller is closer.
    SquaredEuclidean,
    /// Dot product as unit cosine similarity; larger is closer. Assumes
    /// query and rows are pre-normalized.
    Cosine,
}

impl Metric {
    #[inline]
    pub fn score(self, query: &[f32], row: &[f32]) -> f64 {
        match self {
            Metric::SquaredEuclidean => math::squared_distance(query, row),
            Metric::Cosine => math::dot(query, row),
        }
    }

    /// Total rank order: `Less` means `a` ranks ahead of `b`. Ties on
    /// score resolve by ascending position, making every ranking
    /// reproducible regardless of partitioning.
    #[inline]
    fn rank(self, a: &Candidate, b: &Candidate) -> Ordering {
        let by_score = match self {
            Metric::SquaredEuclidean => a.score.total_cmp(&b.score),
            Metric::Cosine => b.score.total_cmp(&a.score),
        };
        by_score.then(a.position.cmp(&b.position))
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "l2" | "euclidean" => Ok(Metric::SquaredEuclidean),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown metric {other:?}")),
        }
    }
}

/// Error type produced by caller-supplied row filters.
pub type PredicateError = Box<dyn std::error::Error + Send + Sync>;

/// A candidate row handed to a row filter.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    pub position: usize,
    pub id: u32,
    pub values: &'a [f32],
}

/// One ranked row of a search response.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub position: usize,
    pub id: u32,
    pub score: f64,
    /// Copy of the row data, present when requested via
    /// [`SearchOptions::with_values`].
    pub values: Option<Vec<f32>>,
}

/// Search configuration. Filters and parallelism are explicit values here
/// rather than process-wide state.
pub struct SearchOptions<'a> {
    pub metric: Metric,
    /// Rows of the final ranking to skip.
    pub offset: usize,
    /// Maximum rows returned.
    pub limit: usize,
    /// Skip rows bitwise-equal to the query (trivial self-results).
    pub exclude_exact: bool,
    /// Copy row data into each result.
    pub with_values: bool,
    /// Number of row partitions scanned in parallel; 0 means available
    /// hardware concurrency.
    pub parallelism: usize,
    /// Cheap predicate on the score alone, evaluated first.
    pub score_filter: Option<&'a (dyn Fn(f64) -> bool + Sync)>,
    /// Expensive predicate on the candidate row, evaluated after the score
    /// filter. An error aborts the whole search.
    pub row_filter:
        Option<&'a (dyn Fn(&RowRef<'_>) -> std::result::Result<bool, PredicateError> + Sync)>,
}

impl<'a> SearchOptions<'a> {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            offset: 0,
            limit: 10,
            exclude_exact: false,
            with_values: false,
            parallelism: 0,
            score_filter: None,
            row_filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    position: usize,
    score: f64,
}

/// Heap entry ordered by the pinned rank order; the heap's maximum is the
/// worst retained candidate.
struct Ranked(Candidate, Metric);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.1.rank(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Retain the best `offset + limit` candidates.
    Head,
    /// Retain the worst `rows - offset` candidates and realign by rank.
    Tail,
}

/// Rank all rows of `store` against `query` and return the requested page.
///
/// The call blocks until every partition finishes; the first filter error
/// encountered aborts the search and no partial results are returned.
pub fn search(
    store: &MatrixStore,
    query: &[f32],
    opts: &SearchOptions<'_>,
) -> Result<Vec<SearchResult>> {
    if query.len() != store.cols() {
        return Err(Error::Mismatch(format!(
            "query has {} dimensions, store has {}",
            query.len(),
            store.cols()
        )));
    }

    let rows = store.rows();
    if opts.limit == 0 || opts.offset >= rows {
        return Ok(Vec::new());
    }

    let head_cap = opts.offset.saturating_add(opts.limit).min(rows);
    let tail_cap = rows - opts.offset;
    let (strategy, cap) = if tail_cap < head_cap {
        (Strategy::Tail, tail_cap)
    } else {
        (Strategy::Head, head_cap)
    };

    let partitions = effective_parallelism(opts.parallelism, rows);
    tracing::debug!(
        "search over {} rows: {:?} window (cap {}), {} partitions",
        rows,
        strategy,
        cap,
        partitions
    );

    let scans: Vec<PartitionScan> = split_ranges(rows, partitions)
        .into_par_iter()
        .map(|range| scan_partition(store, query, opts, strategy, cap, range))
        .collect::<Result<_>>()?;

    let mut eligible = 0usize;
    let mut merged: Vec<Candidate> = Vec::new();
    for scan in scans {
        eligible += scan.eligible;
        merged.extend(scan.retained);
    }
    merged.sort_unstable_by(|a, b| opts.metric.rank(a, b));

    let window: &[Candidate] = match strategy {
        Strategy::Head => {
            merged.truncate(cap);
            if merged.len() <= opts.offset {
                &[]
            } else {
                let end = (opts.offset + opts.limit).min(merged.len());
                &merged[opts.offset..end]
            }
        }
        Strategy::Tail => {
            // Retained candidates are the worst `k`, covering global ranks
            // [eligible - k, eligible).
            let start = merged.len().saturating_sub(cap);
            let retained = &merged[start..];
            if opts.offset >= eligible {
                &[]
            } else {
                let skip = opts.offset - (eligible - retained.len());
                let end = (skip + opts.limit).min(retained.len());
                &retained[skip..end]
            }
        }
    };

    window
        .iter()
        .map(|cand| {
            let values = if opts.with_values {
                Some(store.row(cand.position)?.to_vec())
            } else {
                None
            };
            Ok(SearchResult {
                position: cand.position,
                id: store.row_id_at(cand.position)?,
                score: cand.score,
                values,
            })
        })
        .collect()
}

struct PartitionScan {
    retained: Vec<Candidate>,
    /// Rows passing exclusion and filters; only counted by the tail
    /// strategy, which needs it for rank realignment.
    eligible: usize,
}

fn scan_partition(
    store: &MatrixStore,
    query: &[f32],
    opts: &SearchOptions<'_>,
    strategy: Strategy,
    cap: usize,
    range: Range<usize>,
) -> Result<PartitionScan> {
    match strategy {
        Strategy::Head => scan_head(store, query, opts, cap, range),
        Strategy::Tail => scan_tail(store, query, opts, cap, range),
    }
}

/// Best-retaining scan. The score prune runs before the exclusion check
/// and both filters: a row that cannot outrank the worst retained
/// candidate costs nothing beyond its score.
fn scan_head(
    store: &MatrixStore,
    query: &[f32],
    opts: &SearchOptions<'_>,
    cap: usize,
    range: Range<usize>,
) -> Result<PartitionScan> {
    let mut heap: BinaryHeap<Ranked> = BinaryHeap::with_capacity(cap.min(range.len()) + 1);

    for position in range {
        let row = store.row(position)?;
        let cand = Candidate {
            position,
            score: opts.metric.score(query, row),
        };

        if heap.len() >= cap {
            if let Some(worst) = heap.peek() {
                if opts.metric.rank(&cand, &worst.0) != Ordering::Less {
                    continue;
                }
            }
        }
        if !passes_filters(store, query, opts, &cand, row)? {
            continue;
        }

        if heap.len() >= cap {
            heap.pop();
        }
        heap.push(Ranked(cand, opts.metric));
    }

    Ok(PartitionScan {
        retained: heap.into_iter().map(|ranked| ranked.0).collect(),
        eligible: 0,
    })
}

/// Worst-retaining scan for tail windows. Filters run for every row, even
/// ones too good to retain, because the eligible count drives the final
/// rank alignment.
fn scan_tail(
    store: &MatrixStore,
    query: &[f32],
    opts: &SearchOptions<'_>,
    cap: usize,
    range: Range<usize>,
) -> Result<PartitionScan> {
    let mut heap: BinaryHeap<Reverse<Ranked>> =
        BinaryHeap::with_capacity(cap.min(range.len()) + 1);
    let mut eligible = 0usize;

    for position in range {
        let row = store.row(position)?;
        let cand = Candidate {
            position,
            score: opts.metric.score(query, row),
        };

        if !passes_filters(store, query, opts, &cand, row)? {
            continue;
        }
        eligible += 1;

        if heap.len() >= cap {
            if let Some(Reverse(best)) = heap.peek() {
                if opts.metric.rank(&cand, &best.0) == Ordering::Less {
                    continue;
                }
            }
            heap.pop();
        }
        heap.push(Reverse(Ranked(cand, opts.metric)));
    }

    Ok(PartitionScan {
        retained: heap.into_iter().map(|ranked| ranked.0 .0).collect(),
        eligible,
    })
}

fn passes_filters(
    store: &MatrixStore,
    query: &[f32],
    opts: &SearchOptions<'_>,
    cand: &Candidate,
    row: &[f32],
) -> Result<bool> {
    if opts.exclude_exact && query.iter().zip(row).all(|(a, b)| a == b) {
        return Ok(false);
    }
    if let Some(filter) = opts.score_filter {
        if !filter(cand.score) {
            return Ok(false);
        }
    }
    if let Some(filter) = opts.row_filter {
        let row_ref = RowRef {
            position: cand.position,
            id: store.row_id_at(cand.position)?,
            values: row,
        };
        if !filter(&row_ref).map_err(Error::Predicate)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn effective_parallelism(requested: usize, rows: usize) -> usize {
    let degree = if requested == 0 {
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    } else {
        requested
    };
    degree.clamp(1, rows.max(1))
}

/// Split `0..rows` into `parts` contiguous ranges covering every row; the
/// first `rows % parts` ranges take one extra row.
fn split_ranges(rows: usize, parts: usize) -> Vec<Range<usize>> {
    let base = rows / parts;
    let extra = rows % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_with_rows(dir: &std::path::Path, rows: &[&[f32]]) -> MatrixStore {
        let cols = rows.first().map_or(0, |r| r.len());
        let mut store =
            MatrixStore::create(dir.join("s.fmjt"), rows.len() as u64, cols as u64).unwrap();
        for (i, id) in store.row_ids_mut().iter_mut().enumerate() {
            *id = i as u32;
        }
        for (i, values) in rows.iter().enumerate() {
            store.row_mut(i).unwrap().copy_from_slice(values);
        }
        store
    }

    #[test]
    fn split_ranges_covers_all_rows() {
        let ranges = split_ranges(10, 3);
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
        assert_eq!(split_ranges(2, 2), vec![0..1, 1..2]);
        assert_eq!(split_ranges(0, 1), vec![0..0]);
    }

    #[test]
    fn squared_distance_ranks_ascending() {
        let dir = tempdir().unwrap();
        let store = store_with_rows(
            dir.path(),
            &[&[0.0, 5.0], &[0.0, 1.0], &[0.0, 3.0]],
        );

        let mut opts = SearchOptions::new(Metric::SquaredEuclidean);
        opts.limit = 3;
        opts.parallelism = 2;
        let results = search(&store, &[0.0, 0.0], &opts).unwrap();
        let positions: Vec<usize> = results.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 0]);
        assert_eq!(results[0].score, 1.0);
    }

    #[test]
    fn equal_scores_order_by_position() {
        let dir = tempdir().unwrap();
        let row: &[f32] = &[1.0, 2.0];
        let store = store_with_rows(dir.path(), &[row, row, row, row]);

        let mut opts = SearchOptions::new(Metric::SquaredEuclidean);
        opts.limit = 4;
        opts.parallelism = 3;
        let results = search(&store, &[0.0, 0.0], &opts).unwrap();
        let positions: Vec<usize> = results.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn query_dimension_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let store = store_with_rows(dir.path(), &[&[1.0, 2.0]]);
        let opts = SearchOptions::new(Metric::Cosine);
        assert!(matches!(
            search(&store, &[1.0], &opts),
            Err(Error::Mismatch(_))
        ));
    }

    #[test]
    fn exclude_exact_drops_self_match() {
        let dir = tempdir().unwrap();
        let store = store_with_rows(dir.path(), &[&[1.0, 0.0], &[0.0, 1.0]]);

        let mut opts = SearchOptions::new(Metric::Cosine);
        opts.exclude_exact = true;
        opts.limit = 2;
        let results = search(&store, &[1.0, 0.0], &opts).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].position, 1);
    }

    #[test]
    fn row_filter_error_aborts_search() {
        let dir = tempdir().unwrap();
        let store = store_with_rows(dir.path(), &[&[1.0], &[2.0], &[3.0]]);

        let failing = |row: &RowRef<'_>| -> std::result::Result<bool, PredicateError> {
            if row.position == 1 {
                Err("metadata lookup failed".into())
            } else {
                Ok(true)
            }
        };
        let mut opts = SearchOptions::new(Metric::SquaredEuclidean);
        opts.limit = 3;
        opts.row_filter = Some(&failing);
        assert!(matches!(
            search(&store, &[0.0], &opts),
            Err(Error::Predicate(_))
        ));
    }

    #[test]
    fn with_values_copies_rows_out() {
        let dir = tempdir().unwrap();
        let store = store_with_rows(dir.path(), &[&[1.0, 2.0], &[3.0, 4.0]]);

        let mut opts = SearchOptions::new(Metric::SquaredEuclidean);
        opts.limit = 1;
        opts.with_values = true;
        let results = search(&store, &[1.0, 2.0], &opts).unwrap();
        assert_eq!(results[0].values.as_deref(), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn cosine_scenario_from_normalized_rows() {
        let dir = tempdir().unwrap();
        let mut store = store_with_rows(
            dir.path(),
            &[&[1.0, 0.0], &[0.0, 1.0], &[1.0, 1.0]],
        );
        store.row_ids_mut().copy_from_slice(&[10, 20, 30]);
        store.col_ids_mut().copy_from_slice(&[100, 200]);
        store.normalize_rows();

        let mut opts = SearchOptions::new(Metric::Cosine);
        opts.limit = 2;
        let results = search(&store, &[1.0, 0.0], &opts).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 10);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[1].id, 30);
        assert!((results[1].score - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    }
}
