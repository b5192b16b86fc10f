//! 2-D Haar-style wavelet decomposition and top-coefficient selection.
//!
//! One 1-D pass over a window of length `2k` replaces its first half with
//! pairwise averages and its second half with the differences between each
//! average and the second element of its pair. The 2-D decomposition runs
//! row passes at halving column widths until the working width is one,
//! then column passes at halving row heights over the remaining working
//! width. The upper-left element ends up holding the coarsest
//! approximation, with detail coefficients at decreasing resolution
//! filling the rest of the matrix. Fingerprints are built from this exact
//! traversal order, so it must not change.

/// Decompose `image` in place, running `cols_log2` row passes followed by
/// `rows_log2` column passes.
///
/// The matrix must have at least `2^rows_log2` rows of at least
/// `2^cols_log2` elements each.
pub fn decompose(image: &mut [Vec<f64>], rows_log2: u32, cols_log2: u32) {
    let mut cols_log2 = cols_log2;
    while cols_log2 > 0 {
        let rows = 1usize << rows_log2;
        for row in 0..rows {
            decompose_row(&mut image[row], cols_log2);
        }
        cols_log2 -= 1;
    }

    let mut rows_log2 = rows_log2;
    while rows_log2 > 0 {
        let cols = 1usize << cols_log2;
        for col in 0..cols {
            decompose_col(image, rows_log2, col);
        }
        rows_log2 -= 1;
    }
}

fn decompose_row(row: &mut [f64], cols_log2: u32) {
    let half_cols = 1usize << (cols_log2 - 1);
    let mut details = vec![0.0; half_cols];
    for i in 0..half_cols {
        row[i] = (row[i * 2] + row[i * 2 + 1]) * 0.5;
        details[i] = row[i] - row[i * 2 + 1];
    }
    row[half_cols..half_cols * 2].copy_from_slice(&details);
}

fn decompose_col(image: &mut [Vec<f64>], rows_log2: u32, col: usize) {
    let half_rows = 1usize << (rows_log2 - 1);
    let mut details = vec![0.0; half_rows];
    for i in 0..half_rows {
        image[i][col] = (image[i * 2][col] + image[i * 2 + 1][col]) * 0.5;
        details[i] = image[i][col] - image[i * 2 + 1][col];
    }
    for i in 0..half_rows {
        image[half_rows + i][col] = details[i];
    }
}

/// Picks the indices of the largest-magnitude wavelet coefficients.
#[derive(Debug, Clone)]
pub struct TopWaveletSelector {
    count: usize,
}

impl TopWaveletSelector {
    /// Create a selector returning the top `count` coefficients.
    pub fn new(count: usize) -> Self {
        Self { count }
    }

    /// Return the flat indices (`row * width + col`) of the `count`
    /// largest coefficients by absolute value.
    ///
    /// Ordering is deterministic: descending magnitude, ties broken by
    /// ascending flat index.
    pub fn select(&self, coefficients: &[Vec<f64>]) -> Vec<usize> {
        let width = coefficients.first().map_or(0, Vec::len);
        let mut indexed: Vec<(f64, usize)> = Vec::with_capacity(coefficients.len() * width);
        for (i, row) in coefficients.iter().enumerate() {
            for (j, &coefficient) in row.iter().enumerate() {
                indexed.push((coefficient.abs(), i * width + j));
            }
        }

        indexed.sort_unstable_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        indexed
            .into_iter()
            .take(self.count)
            .map(|(_, index)| index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_row_decomposition() {
        let mut image = vec![vec![9.0, 7.0, 3.0, 5.0]];
        decompose(&mut image, 0, 2);
        assert_eq!(image, vec![vec![6.0, 2.0, 1.0, -1.0]]);
    }

    #[test]
    fn single_column_decomposition() {
        let mut image = vec![vec![9.0], vec![7.0], vec![3.0], vec![5.0]];
        decompose(&mut image, 2, 0);
        assert_eq!(image, vec![vec![6.0], vec![2.0], vec![1.0], vec![-1.0]]);
    }

    #[test]
    fn square_decomposition_runs_columns_over_the_collapsed_width() {
        let mut image = vec![vec![9.0, 7.0], vec![3.0, 5.0]];
        decompose(&mut image, 1, 1);
        // row passes leave [[8, 1], [4, -1]]; by the time column passes
        // run, the working width is a single column
        assert_eq!(image, vec![vec![6.0, 1.0], vec![2.0, -1.0]]);
    }

    #[test]
    fn selector_orders_by_magnitude() {
        let selector = TopWaveletSelector::new(3);
        let coefficients = vec![vec![1.0, -9.0, 2.0], vec![0.5, 7.0, -3.0]];
        assert_eq!(selector.select(&coefficients), vec![1, 4, 5]);
    }

    #[test]
    fn selector_breaks_ties_by_ascending_index() {
        let selector = TopWaveletSelector::new(4);
        let coefficients = vec![vec![2.0, -2.0], vec![2.0, 1.0]];
        assert_eq!(selector.select(&coefficients), vec![0, 1, 2, 3]);
    }

    #[test]
    fn selector_takes_at_most_the_matrix_size() {
        let selector = TopWaveletSelector::new(10);
        let coefficients = vec![vec![1.0, 2.0]];
        assert_eq!(selector.select(&coefficients), vec![1, 0]);
    }
}
