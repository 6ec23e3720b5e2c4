use common::{Error, GridShape, Result};

/// A price window projected onto a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoding {
    pub grid: GridShape,
    /// Row index per column; row 0 holds the window's highest price.
    pub pic: Vec<usize>,
    /// Flattened row-major M×N matrix with a 1 at `(pic[i], i)`.
    pub indicator: Vec<f64>,
}

/// Maps price windows of exactly `grid.cols` observations onto `grid.rows`
/// price bands.
///
/// Highest price lands on row 0 and lowest on row `rows - 1`, the same
/// top-down orientation the stored templates were authored with.
#[derive(Debug, Clone, Copy)]
pub struct GridEncoder {
    grid: GridShape,
}

impl GridEncoder {
    pub fn new(grid: GridShape) -> Result<Self> {
        if grid.is_empty() {
            return Err(Error::InvalidGrid(grid));
        }
        Ok(Self { grid })
    }

    pub fn grid(&self) -> GridShape {
        self.grid
    }

    /// Compute the Pattern Identification Code for `window` (oldest first).
    ///
    /// A flat window maps every column to the middle row `(rows - 1) / 2`.
    pub fn pic(&self, window: &[f64]) -> Result<Vec<usize>> {
        let GridShape { rows, cols } = self.grid;
        if window.is_empty() {
            return Err(Error::EmptyWindow);
        }
        if window.len() != cols {
            return Err(Error::WindowLengthMismatch {
                expected: cols,
                got: window.len(),
            });
        }
        if let Some(index) = window.iter().position(|v| !v.is_finite()) {
            return Err(Error::NonFiniteValue { index });
        }

        let (min, max) = window
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        let bottom = rows - 1;
        if max == min {
            return Ok(vec![bottom / 2; cols]);
        }

        let range = max - min;
        Ok(window
            .iter()
            .map(|&price| {
                let normalized = (price - min) / range;
                // Truncation, not rounding: a price only reaches row 0 at the max.
                let row = ((1.0 - normalized) * bottom as f64) as usize;
                row.min(bottom)
            })
            .collect())
    }

    pub fn encode(&self, window: &[f64]) -> Result<Encoding> {
        let pic = self.pic(window)?;
        let indicator = indicator_matrix(&pic, self.grid);
        Ok(Encoding {
            grid: self.grid,
            pic,
            indicator,
        })
    }
}

/// One-hot M×N matrix for a PIC, flattened row-major.
///
/// Rows outside the grid are skipped; callers validate the PIC first.
pub fn indicator_matrix(pic: &[usize], grid: GridShape) -> Vec<f64> {
    let mut cells = vec![0.0; grid.cells()];
    for (col, &row) in pic.iter().enumerate().take(grid.cols) {
        if row < grid.rows {
            cells[row * grid.cols + col] = 1.0;
        }
    }
    cells
}

/// Percent change from the first to the last observation.
pub fn trend_pct(window: &[f64]) -> f64 {
    match (window.first(), window.last()) {
        (Some(&first), Some(&last)) if window.len() >= 2 && first != 0.0 => {
            (last - first) / first * 100.0
        }
        _ => 0.0,
    }
}
