use crate::error::{AutodeError, Result};
use nalgebra::{DMatrix, RowDVector};

/// An observed trajectory: `times` (length T) and a T×N observation matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    times: Vec<f64>,
    observations: DMatrix<f64>,
}

impl Dataset {
    pub fn new(times: Vec<f64>, observations: DMatrix<f64>) -> Result<Self> {
        if times.len() != observations.nrows() {
            return Err(AutodeError::shape(format!(
                "{} timestamps but {} observation rows",
                times.len(),
                observations.nrows()
            )));
        }
        if times.is_empty() {
            return Err(AutodeError::shape("a dataset needs at least one observation"));
        }
        if observations.ncols() == 0 {
            return Err(AutodeError::shape("observations need at least one state column"));
        }
        if let Some(bad) = times.iter().position(|t| !t.is_finite()) {
            return Err(AutodeError::shape(format!("timestamp {bad} is not finite")));
        }
        if let Some(i) = times.windows(2).position(|w| w[1] <= w[0]) {
            return Err(AutodeError::shape(format!(
                "timestamps must be strictly increasing (t[{}] = {} >= t[{}] = {})",
                i,
                times[i],
                i + 1,
                times[i + 1]
            )));
        }
        Ok(Self {
            times,
            observations,
        })
    }

    /// Builds the observation matrix from one row per timestamp.
    pub fn from_rows(times: Vec<f64>, rows: &[Vec<f64>]) -> Result<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if let Some(i) = rows.iter().position(|r| r.len() != width) {
            return Err(AutodeError::shape(format!(
                "observation row {i} has {} entries, expected {width}",
                rows[i].len()
            )));
        }
        let observations = DMatrix::from_fn(rows.len(), width, |r, c| rows[r][c]);
        Self::new(times, observations)
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn observations(&self) -> &DMatrix<f64> {
        &self.observations
    }

    /// Number of state dimensions N.
    pub fn dimension(&self) -> usize {
        self.observations.ncols()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// The first observed state, used as the integration start.
    pub fn initial_state(&self) -> Vec<f64> {
        self.observations.row(0).iter().copied().collect()
    }

    pub fn row(&self, index: usize) -> RowDVector<f64> {
        self.observations.row(index).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_lengths_are_a_shape_error() {
        let times = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let observations = DMatrix::zeros(4, 2);
        let err = Dataset::new(times, observations).unwrap_err();
        assert!(matches!(err, AutodeError::Shape { .. }));
        assert!(err.to_string().contains("5 timestamps but 4 observation rows"));
    }

    #[test]
    fn rejects_degenerate_datasets() {
        assert!(Dataset::new(Vec::new(), DMatrix::zeros(0, 2)).is_err());
        assert!(Dataset::new(vec![0.0], DMatrix::zeros(1, 0)).is_err());
        assert!(Dataset::new(vec![0.0, 0.0], DMatrix::zeros(2, 1)).is_err());
        assert!(Dataset::new(vec![1.0, 0.5], DMatrix::zeros(2, 1)).is_err());
        assert!(Dataset::new(vec![0.0, f64::NAN], DMatrix::zeros(2, 1)).is_err());
    }

    #[test]
    fn builds_from_rows() {
        let data = Dataset::from_rows(
            vec![0.0, 0.5, 1.0],
            &[vec![25.0, 0.0], vec![24.0, 0.9], vec![23.1, 1.7]],
        )
        .expect("valid dataset");
        assert_eq!(data.len(), 3);
        assert_eq!(data.dimension(), 2);
        assert_eq!(data.initial_state(), vec![25.0, 0.0]);
        assert_eq!(data.observations()[(2, 1)], 1.7);
        assert_eq!(data.row(1)[0], 24.0);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Dataset::from_rows(vec![0.0, 1.0], &[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }
}
