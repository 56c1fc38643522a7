use super::error::ConfigError;

/// The closed range [min, max] a box covers along one dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min: f64,
    pub max: f64,
}

impl Extent {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// NaN is never contained
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Position of boundary `index` when this extent is cut into `n_cells` cells.
    ///
    /// Boundary 0 is exactly `min` and boundary `n_cells` is exactly `max`, so the
    /// outer edges of the cells never drift away from the parent's edges.
    pub fn boundary(&self, index: usize, n_cells: usize) -> f64 {
        if index == 0 {
            self.min
        } else if index >= n_cells {
            self.max
        } else {
            self.min + self.width() * (index as f64 / n_cells as f64)
        }
    }

    /// The extent of cell `index` out of `n_cells`
    pub fn cell(&self, index: usize, n_cells: usize) -> Self {
        Self {
            min: self.boundary(index, n_cells),
            max: self.boundary(index + 1, n_cells),
        }
    }

    /// Find the cell which holds `value`.
    ///
    /// Cells are half-open `[lo, hi)` except the last, which is closed. Values outside
    /// the extent are clamped into the first or last cell. The initial guess from the
    /// cell width is corrected against `boundary` so the result always agrees with the
    /// extents handed out by `cell`.
    pub fn cell_index(&self, value: f64, n_cells: usize) -> usize {
        let last = n_cells.saturating_sub(1);
        let guess = ((value - self.min) / self.width() * n_cells as f64).floor();
        let mut index = if guess.is_nan() || guess < 0.0 {
            0
        } else if guess >= last as f64 {
            last
        } else {
            guess as usize
        };
        while index > 0 && value < self.boundary(index, n_cells) {
            index -= 1;
        }
        while index < last && value >= self.boundary(index + 1, n_cells) {
            index += 1;
        }
        index
    }

    /// Turn a flat min,max,min,max,... list into per dimension extents
    pub fn from_flat<const ND: usize>(flat: &[f64]) -> Result<[Extent; ND], ConfigError> {
        if flat.len() != ND * 2 {
            return Err(ConfigError::InvalidConfiguration(format!(
                "{} extents were given; expected a min and max for each of the {} dimensions",
                flat.len(),
                ND
            )));
        }
        let mut extents = [Extent::new(0.0, 0.0); ND];
        for (dim, extent) in extents.iter_mut().enumerate() {
            *extent = Extent::new(flat[dim * 2], flat[dim * 2 + 1]);
        }
        validate_extents(&extents)?;
        Ok(extents)
    }
}

pub fn validate_extents(extents: &[Extent]) -> Result<(), ConfigError> {
    for (dim, extent) in extents.iter().enumerate() {
        if !extent.min.is_finite() || !extent.max.is_finite() || extent.min >= extent.max {
            return Err(ConfigError::InvalidConfiguration(format!(
                "Extent of dimension {dim} must have finite min < max, found [{}, {}]",
                extent.min, extent.max
            )));
        }
        if !extent.width().is_finite() {
            return Err(ConfigError::InvalidConfiguration(format!(
                "Extent of dimension {dim} is too wide, found [{}, {}]",
                extent.min, extent.max
            )));
        }
    }
    Ok(())
}
