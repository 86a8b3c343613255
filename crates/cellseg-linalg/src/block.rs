use faer::{Mat, MatRef};

/// Repeat a matrix along the diagonal of a larger zero matrix.
///
/// For a `r x c` base matrix and `repeat = n` the result is `(n * r) x (n * c)` with block
/// `(i, i)` equal to `base` and every other block zero.
///
/// # Example
///
/// ```
/// use cellseg_linalg::block::block_diagonal;
///
/// let base = faer::mat![[1.0, 2.0], [3.0, 4.0]];
/// let blocks = block_diagonal(base.as_ref(), 2);
///
/// assert_eq!(blocks.nrows(), 4);
/// assert_eq!(blocks.read(2, 3), 2.0);
/// assert_eq!(blocks.read(0, 3), 0.0);
/// ```
pub fn block_diagonal(base: MatRef<'_, f64>, repeat: usize) -> Mat<f64> {
    let (rows, cols) = (base.nrows(), base.ncols());
    if rows == 0 || cols == 0 {
        return Mat::zeros(rows * repeat, cols * repeat);
    }

    Mat::from_fn(rows * repeat, cols * repeat, |i, j| {
        if i / rows == j / cols {
            base.read(i % rows, j % cols)
        } else {
            0.0
        }
    })
}

/// Stack matrices side by side, `[m_1 m_2 ... m_n]`.
///
/// Returns `None` if the list is empty or the row counts differ.
pub fn hstack(blocks: &[MatRef<'_, f64>]) -> Option<Mat<f64>> {
    let rows = blocks.first()?.nrows();
    if blocks.iter().any(|b| b.nrows() != rows) {
        return None;
    }

    let cols = blocks.iter().map(|b| b.ncols()).sum();
    let mut out = Mat::<f64>::zeros(rows, cols);
    let mut offset = 0;
    for block in blocks {
        for j in 0..block.ncols() {
            for i in 0..rows {
                out.write(i, offset + j, block.read(i, j));
            }
        }
        offset += block.ncols();
    }

    Some(out)
}

/// Stack matrices on top of each other, `[m_1; m_2; ...; m_n]`.
///
/// Returns `None` if the list is empty or the column counts differ.
pub fn vstack(blocks: &[MatRef<'_, f64>]) -> Option<Mat<f64>> {
    let transposed = blocks.iter().map(|b| b.transpose()).collect::<Vec<_>>();
    hstack(&transposed).map(|m| m.transpose().to_owned())
}
