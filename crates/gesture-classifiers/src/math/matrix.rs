use std::error::Error;
use std::fmt;
use std::ops::{Index, IndexMut};

/// Owned, row-major dense matrix with explicit row and column counts.
///
/// Time-series samples, HMM transition/emission matrices and cluster
/// centres all live in this type. Indexing is bounds checked by the
/// underlying `Vec`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Array2<T> {
    data: Vec<T>,
    rows: usize,
    cols: usize,
}

impl<T> Array2<T> {
    /// Element count of a `rows x cols` matrix, or `None` when the buffer
    /// could not be addressed.
    pub fn checked_len(rows: usize, cols: usize) -> Option<usize> {
        let len = rows.checked_mul(cols)?;
        let bytes = len.checked_mul(std::mem::size_of::<T>().max(1))?;
        (bytes <= isize::MAX as usize).then_some(len)
    }

    pub fn from_shape_vec(shape: (usize, usize), data: Vec<T>) -> Result<Self, ShapeError> {
        let (rows, cols) = shape;
        if Self::checked_len(rows, cols) != Some(data.len()) {
            return Err(ShapeError {
                rows,
                cols,
                len: data.len(),
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// An empty matrix with a fixed column count, ready for `push_row`.
    pub fn with_cols(cols: usize) -> Self {
        Self {
            data: Vec::new(),
            rows: 0,
            cols,
        }
    }

    pub fn nrows(&self) -> usize {
        self.rows
    }

    pub fn ncols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    #[inline]
    fn offset(&self, row: usize, col: usize) -> usize {
        assert!(
            row < self.rows && col < self.cols,
            "index ({}, {}) out of bounds for shape ({}, {})",
            row,
            col,
            self.rows,
            self.cols
        );
        row * self.cols + col
    }

    pub fn row(&self, row: usize) -> &[T] {
        assert!(row < self.rows, "row index out of bounds");
        let start = row * self.cols;
        &self.data[start..start + self.cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        assert!(row < self.rows, "row index out of bounds");
        let start = row * self.cols;
        &mut self.data[start..start + self.cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        (0..self.rows).map(move |r| self.row(r))
    }

    pub fn column(&self, col: usize) -> Vec<T>
    where
        T: Clone,
    {
        assert!(col < self.cols, "column index out of bounds");
        (0..self.rows).map(|row| self[(row, col)].clone()).collect()
    }

    /// Appends one row; fails when its length differs from the column count.
    pub fn push_row(&mut self, row: &[T]) -> Result<(), ShapeError>
    where
        T: Clone,
    {
        if row.len() != self.cols {
            return Err(ShapeError {
                rows: 1,
                cols: self.cols,
                len: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        self.rows += 1;
        Ok(())
    }

    pub fn select_rows(&self, indices: &[usize]) -> Array2<T>
    where
        T: Clone,
    {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &row in indices {
            data.extend_from_slice(self.row(row));
        }
        Array2 {
            data,
            rows: indices.len(),
            cols: self.cols,
        }
    }

    pub fn mapv<U, F>(&self, mut f: F) -> Array2<U>
    where
        F: FnMut(&T) -> U,
    {
        Array2 {
            data: self.data.iter().map(|v| f(v)).collect(),
            rows: self.rows,
            cols: self.cols,
        }
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.data.clone()
    }
}

impl<T: Clone + Default> Array2<T> {
    /// Callers pass sizes derived from data already in memory or checked
    /// with [`checked_len`](Array2::checked_len).
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![T::default(); rows * cols],
            rows,
            cols,
        }
    }

    /// Builds a matrix from equally sized rows.
    pub fn from_rows(rows: &[Vec<T>]) -> Result<Self, ShapeError> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut out = Self::with_cols(cols);
        for row in rows {
            out.push_row(row)?;
        }
        Ok(out)
    }
}

impl Array2<f64> {
    pub fn row_sums(&self) -> Vec<f64> {
        self.rows().map(|r| r.iter().sum()).collect()
    }

    /// Rescales every row to sum to one. Rows summing to zero become uniform
    /// over the columns where `mask` allows mass (or over all columns when
    /// no mask is given).
    pub fn normalize_rows(&mut self, mask: Option<&dyn Fn(usize, usize) -> bool>) {
        for r in 0..self.rows {
            let sum: f64 = self.row(r).iter().sum();
            let cols = self.cols;
            let row = self.row_mut(r);
            if sum > 0.0 && sum.is_finite() {
                row.iter_mut().for_each(|v| *v /= sum);
                continue;
            }
            let allowed: Vec<bool> = (0..cols)
                .map(|c| mask.map_or(true, |m| m(r, c)))
                .collect();
            let n = allowed.iter().filter(|&&a| a).count().max(1) as f64;
            for (v, ok) in row.iter_mut().zip(allowed) {
                *v = if ok { 1.0 / n } else { 0.0 };
            }
        }
    }

    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// True when every row sums to one within `tolerance`.
    pub fn is_row_stochastic(&self, tolerance: f64) -> bool {
        self.row_sums().iter().all(|s| (s - 1.0).abs() <= tolerance)
    }
}

impl<T> Index<(usize, usize)> for Array2<T> {
    type Output = T;

    fn index(&self, index: (usize, usize)) -> &Self::Output {
        let offset = self.offset(index.0, index.1);
        &self.data[offset]
    }
}

impl<T> IndexMut<(usize, usize)> for Array2<T> {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut Self::Output {
        let offset = self.offset(index.0, index.1);
        &mut self.data[offset]
    }
}

#[derive(Debug, Clone)]
pub struct ShapeError {
    rows: usize,
    cols: usize,
    len: usize,
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid shape ({}, {}) for buffer of length {}",
            self.rows, self.cols, self.len
        )
    }
}

impl Error for ShapeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_row_rejects_wrong_width() {
        let mut m = Array2::<f64>::with_cols(2);
        m.push_row(&[1.0, 2.0]).unwrap();
        assert!(m.push_row(&[1.0]).is_err());
        assert_eq!(m.shape(), (1, 2));
    }

    #[test]
    fn normalize_rows_handles_zero_rows_with_mask() {
        let mut m = Array2::from_shape_vec((2, 3), vec![1.0, 1.0, 2.0, 0.0, 0.0, 0.0]).unwrap();
        let upper = |r: usize, c: usize| c >= r;
        m.normalize_rows(Some(&upper));
        assert_eq!(m.row(0), &[0.25, 0.25, 0.5]);
        assert_eq!(m.row(1), &[0.0, 0.5, 0.5]);
        assert!(m.is_row_stochastic(1e-12));
    }

    #[test]
    fn unaddressable_shapes_are_rejected() {
        assert_eq!(Array2::<f64>::checked_len(3, 4), Some(12));
        assert_eq!(Array2::<f64>::checked_len(usize::MAX, 2), None);
        assert_eq!(Array2::<f64>::checked_len(1 << 32, 1 << 32), None);
        assert!(Array2::from_shape_vec((usize::MAX, 2), vec![0.0; 2]).is_err());
    }

    #[test]
    #[should_panic]
    fn index_out_of_bounds_panics() {
        let m = Array2::<f64>::zeros(2, 2);
        let _ = m[(0, 2)];
    }
}
