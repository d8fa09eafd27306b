//! # Similarity and Leverage
//!
//! Pure numerical routines that place a query fragment vector relative to a model's
//! training set.
//!
//! ## Overview
//!
//! - **Fragment similarity** - a continuous Tanimoto coefficient in which fragments whose
//!   counts differ still contribute a partial match, weighted through a normal CDF of the
//!   count difference scaled by the fragment's training standard deviation.
//! - **Chemical Similarity Score (CSS)** - a geometric mean over the closest training
//!   chemicals that also penalizes neighbors whose experimental values disagree.
//! - **Leverage** - the hat-matrix projection `x (X'X)^-1 x'`.
//! - **Readacross** - fold-wise nearest-neighbor averaging.
//!
//! Nothing here allocates per training row beyond the retained top-N list, and nothing
//! mutates shared state; the functions are safe to call from parallel iterators.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::ops::Range;

/// Number of nearest training chemicals contributing to the CSS.
pub const CSS_TOP_N: usize = 5;

/// Logistic approximation of the standard normal CDF.
#[inline]
pub fn normcdf_approx(x: f64) -> f64 {
    1.0 / ((-x * 358.0 / 23.0 + 111.0 * (x * 37.0 / 294.0).atan()).exp() + 1.0)
}

/// Continuous Tanimoto similarity between two fragment-count vectors.
///
/// `floor` enables early termination: when the optimistic bound `a1 / b` is already below
/// it the exact value cannot reach it either, and 0 is returned.
pub fn fragment_similarity(query: &[f64], train: &[f64], stdev: &[f64], floor: Option<f64>) -> f64 {
    debug_assert_eq!(query.len(), train.len());
    debug_assert_eq!(query.len(), stdev.len());

    let mut b = 0usize;
    let mut a1 = 0usize;
    for (&q, &t) in query.iter().zip(train) {
        if q != 0.0 || t != 0.0 {
            b += 1;
        }
        if q != 0.0 && t != 0.0 {
            a1 += 1;
        }
    }
    if b == 0 {
        return 0.0;
    }
    let b = b as f64;
    if let Some(floor) = floor {
        if (a1 as f64) / b < floor {
            return 0.0;
        }
    }

    let mut exact = a1 as f64;
    let mut soft_sum = 0.0;
    let mut soft_sq_sum = 0.0;
    for ((&q, &t), &s) in query.iter().zip(train).zip(stdev) {
        if q != 0.0 && t != 0.0 && q != t {
            exact -= 1.0;
            // Differences in fragments without spread contribute nothing.
            if s != 0.0 {
                let z = (q - t).abs() / s;
                let soft = 1.0 - (2.0 * normcdf_approx(z) - 1.0);
                soft_sum += soft;
                soft_sq_sum += soft * soft;
            }
        }
    }

    let numerator = exact + soft_sum;
    numerator / ((exact + soft_sq_sum) + b - numerator)
}

/// A retained neighbor: similarity to the query and `1 - value similarity`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub similarity: f64,
    pub dissimilarity: f64,
}

impl Neighbor {
    fn descending(a: &Neighbor, b: &Neighbor) -> Ordering {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| b.dissimilarity.total_cmp(&a.dissimilarity))
    }
}

/// Scans the training rows and keeps the `top_n` most similar, plus every row tied with
/// the `top_n`-th similarity.
///
/// Once `top_n` rows are held, the `top_n`-th similarity becomes the floor for the next
/// row, so rows that cannot enter the list are pruned cheaply.
pub fn nearest_neighbors<'a, I>(
    query: &[f64],
    rows: I,
    stdev: &[f64],
    top_n: usize,
) -> Vec<Neighbor>
where
    I: IntoIterator<Item = (&'a [f64], f64)>,
{
    let top_n = top_n.max(1);
    let mut top: Vec<Neighbor> = Vec::with_capacity(top_n + 1);
    let mut floor = 0.0;

    for (row, value_similarity) in rows {
        let similarity = fragment_similarity(query, row, stdev, Some(floor));
        top.push(Neighbor {
            similarity,
            dissimilarity: 1.0 - value_similarity,
        });
        top.sort_by(Neighbor::descending);
        if top.len() > top_n {
            let boundary = top[top_n - 1].similarity;
            let mut index = 0;
            top.retain(|n| {
                let keep = index < top_n || n.similarity == boundary;
                index += 1;
                keep
            });
        }
        if top.len() >= top_n {
            floor = top[top_n - 1].similarity;
        }
    }
    top
}

/// Chemical Similarity Score of a query against a training set.
///
/// The geometric mean runs over exactly `top_n` terms `sqrt(sim * (1 - dissim))`. When the
/// boundary similarity is tied, the sort order puts the neighbor with the worst value
/// agreement first; when fewer than `top_n` rows exist the boundary pair is reused.
pub fn chemical_similarity_score<'a, I>(query: &[f64], rows: I, stdev: &[f64], top_n: usize) -> f64
where
    I: IntoIterator<Item = (&'a [f64], f64)>,
{
    let top_n = top_n.max(1);
    let top = nearest_neighbors(query, rows, stdev, top_n);
    let Some(boundary) = top.get(top_n.min(top.len()).saturating_sub(1)).copied() else {
        return 0.0;
    };

    let product: f64 = (0..top_n)
        .map(|i| {
            let n = top.get(i).copied().unwrap_or(boundary);
            (n.similarity * (1.0 - n.dissimilarity)).sqrt()
        })
        .product();
    product.powf(1.0 / top_n as f64)
}

/// Computes `(X'X)^-1` over the given column range of the training rows.
///
/// Returns `None` when the Gram matrix is singular.
pub fn gram_inverse(rows: &[Vec<f64>], columns: Range<usize>) -> Option<DMatrix<f64>> {
    let width = columns.len();
    let x = DMatrix::from_fn(rows.len(), width, |r, c| rows[r][columns.start + c]);
    (x.transpose() * x).try_inverse()
}

/// Statistical leverage `x (X'X)^-1 x'` of a query slice.
pub fn leverage(query: &[f64], xtx_inverse: &DMatrix<f64>) -> f64 {
    let x = DVector::from_column_slice(query);
    (x.transpose() * xtx_inverse * &x)[(0, 0)]
}

/// Fold-wise nearest-neighbor readacross.
///
/// For every fold, the training rows with the highest similarity to the query are found
/// and their values averaged; the fold means are then averaged. Folds are scanned in
/// parallel but summed in the order given, so the result is deterministic.
pub fn readacross(query: &[f64], folds: &[Vec<(&[f64], f64)>], stdev: &[f64]) -> Option<f64> {
    if folds.is_empty() {
        return None;
    }

    let fold_means: Vec<Option<f64>> = folds
        .par_iter()
        .map(|fold| {
            let mut best = f64::NEG_INFINITY;
            let mut total = 0.0;
            let mut count = 0usize;
            for &(row, value) in fold {
                let similarity = fragment_similarity(query, row, stdev, None);
                match similarity.total_cmp(&best) {
                    Ordering::Greater => {
                        best = similarity;
                        total = value;
                        count = 1;
                    }
                    Ordering::Equal => {
                        total += value;
                        count += 1;
                    }
                    Ordering::Less => {}
                }
            }
            (count > 0).then(|| total / count as f64)
        })
        .collect();

    let num_folds = folds.len() as f64;
    fold_means
        .into_iter()
        .try_fold(0.0, |acc, mean| mean.map(|m| acc + m / num_folds))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn normcdf_is_centered_and_monotone() {
        assert!(f64_approx_equal(normcdf_approx(0.0), 0.5));
        assert!(normcdf_approx(1.0) > 0.84 && normcdf_approx(1.0) < 0.85);
        assert!(normcdf_approx(3.0) > normcdf_approx(2.0));
    }

    #[test]
    fn similarity_of_empty_vectors_is_zero() {
        assert_eq!(fragment_similarity(&[0.0, 0.0], &[0.0, 0.0], &[1.0, 1.0], None), 0.0);
    }

    #[test]
    fn similarity_with_itself_is_one() {
        let q = [1.0, 0.0, 3.0, 2.0];
        let s = [0.5, 1.0, 1.2, 0.0];
        assert!(f64_approx_equal(fragment_similarity(&q, &q, &s, None), 1.0));
    }

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        let s = [0.7, 1.1, 0.0, 2.0, 0.3];
        let vectors = [
            [1.0, 0.0, 2.0, 0.0, 4.0],
            [2.0, 1.0, 2.0, 0.0, 1.0],
            [0.0, 0.0, 1.0, 3.0, 0.0],
            [5.0, 2.0, 0.0, 1.0, 1.0],
        ];
        for a in &vectors {
            for b in &vectors {
                let ab = fragment_similarity(a, b, &s, None);
                let ba = fragment_similarity(b, a, &s, None);
                assert!(f64_approx_equal(ab, ba));
                assert!((0.0..=1.0).contains(&ab), "similarity {} out of bounds", ab);
            }
        }
    }

    #[test]
    fn differing_counts_give_partial_credit() {
        let s = [1.0, 1.0];
        let exact = fragment_similarity(&[1.0, 1.0], &[1.0, 1.0], &s, None);
        let close = fragment_similarity(&[1.0, 1.0], &[1.0, 2.0], &s, None);
        let far = fragment_similarity(&[1.0, 1.0], &[1.0, 6.0], &s, None);
        assert!(exact > close && close > far);
    }

    #[test]
    fn floor_prunes_only_when_bound_is_below_it() {
        let s = [1.0, 1.0, 1.0];
        let q = [1.0, 1.0, 0.0];
        let t = [1.0, 0.0, 1.0];
        // a1 / b = 1 / 3
        assert_eq!(fragment_similarity(&q, &t, &s, Some(0.5)), 0.0);
        assert!(fragment_similarity(&q, &t, &s, Some(0.2)) > 0.0);
    }

    #[test]
    fn css_of_identical_training_rows_is_one() {
        let q = vec![1.0, 2.0, 0.0];
        let s = [1.0, 1.0, 1.0];
        let rows: Vec<Vec<f64>> = vec![q.clone(); 6];
        let css = chemical_similarity_score(
            &q,
            rows.iter().map(|r| (r.as_slice(), 1.0)),
            &s,
            CSS_TOP_N,
        );
        assert!(f64_approx_equal(css, 1.0));
    }

    #[test]
    fn css_pads_short_training_sets_with_the_boundary_pair() {
        let q = [1.0, 1.0];
        let s = [1.0, 1.0];
        let rows = [vec![1.0, 1.0], vec![1.0, 0.0]];
        let css = chemical_similarity_score(
            &q,
            rows.iter().map(|r| (r.as_slice(), 1.0)),
            &s,
            CSS_TOP_N,
        );
        // One neighbor at similarity 1, four copies of the boundary at 0.5.
        let expected = (1.0f64 * 0.5f64.sqrt().powi(4)).powf(1.0 / 5.0);
        assert!(f64_approx_equal(css, expected));
        assert_eq!(
            chemical_similarity_score(&q, std::iter::empty(), &s, CSS_TOP_N),
            0.0
        );
    }

    #[test]
    fn css_is_invariant_to_order_of_tied_rows() {
        let q = [1.0, 1.0, 1.0];
        let s = [1.0, 1.0, 1.0];
        let mut rows = vec![
            (vec![1.0, 1.0, 1.0], 0.9),
            (vec![1.0, 1.0, 0.0], 0.8),
            (vec![1.0, 0.0, 1.0], 0.4),
            (vec![0.0, 1.0, 1.0], 0.7),
            (vec![1.0, 0.0, 0.0], 1.0),
            (vec![0.0, 1.0, 0.0], 0.2),
            (vec![0.0, 0.0, 1.0], 0.6),
        ];
        let forward = chemical_similarity_score(
            &q,
            rows.iter().map(|(r, v)| (r.as_slice(), *v)),
            &s,
            CSS_TOP_N,
        );
        rows.reverse();
        let backward = chemical_similarity_score(
            &q,
            rows.iter().map(|(r, v)| (r.as_slice(), *v)),
            &s,
            CSS_TOP_N,
        );
        assert!(f64_approx_equal(forward, backward));
    }

    #[test]
    fn css_tie_break_prefers_worst_value_agreement() {
        let q = [1.0, 1.0];
        let s = [1.0, 1.0];
        let base: Vec<(Vec<f64>, f64)> = vec![(vec![1.0, 1.0], 1.0); 4];

        let mut good = base.clone();
        good.push((vec![1.0, 0.0], 1.0));
        good.push((vec![0.0, 1.0], 1.0));
        let mut mixed = base;
        mixed.push((vec![1.0, 0.0], 1.0));
        mixed.push((vec![0.0, 1.0], 0.2));

        let css = |rows: &Vec<(Vec<f64>, f64)>| {
            chemical_similarity_score(
                &q,
                rows.iter().map(|(r, v)| (r.as_slice(), *v)),
                &s,
                CSS_TOP_N,
            )
        };
        assert!(css(&mixed) < css(&good));
    }

    #[test]
    fn leverage_is_non_negative() {
        let rows = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![2.0, 1.0],
        ];
        let xtxi = gram_inverse(&rows, 0..2).unwrap();
        for q in [[0.0, 0.0], [1.0, 0.0], [3.0, -2.0], [10.0, 10.0]] {
            assert!(leverage(&q, &xtxi) >= 0.0);
        }
    }

    #[test]
    fn gram_inverse_detects_singular_training_matrix() {
        let rows = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(gram_inverse(&rows, 0..2).is_none());
    }

    #[test]
    fn readacross_averages_ties_within_folds() {
        let s = [1.0, 1.0];
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let fold1: Vec<(&[f64], f64)> = vec![(&a[..], 2.0), (&a[..], 4.0), (&b[..], 100.0)];
        let fold2: Vec<(&[f64], f64)> = vec![(&a[..], 6.0), (&b[..], -5.0)];
        let value = readacross(&[1.0, 0.0], &[fold1, fold2], &s).unwrap();
        // Fold means 3 and 6.
        assert!(f64_approx_equal(value, 4.5));
        assert_eq!(readacross(&a, &[], &s), None);
    }
}
