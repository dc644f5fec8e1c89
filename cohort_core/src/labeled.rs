//! Name-indexed vectors and matrices over a fixed state space.
//!
//! Thin wrappers around nalgebra storage: named accessors for authoring
//! impacts and transition matrices, plus the raw array for bulk algebra.

use cohort_env::{CohortError, CohortResult, StateSpace};
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

/// Length-N vector addressed by state name.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledVector {
    data: DVector<f64>,
    states: Arc<StateSpace>,
}

impl LabeledVector {
    /// Wraps `data`, failing with a shape error if its length is not N.
    pub fn new(data: DVector<f64>, states: Arc<StateSpace>) -> CohortResult<Self> {
        if data.len() != states.len() {
            return Err(CohortError::shape(format!(
                "vector has {} entries but the state space has {} names",
                data.len(),
                states.len()
            )));
        }
        Ok(Self { data, states })
    }

    /// Builds the name table from `names` (must be unique) and wraps `data`.
    pub fn from_names(data: DVector<f64>, names: &[String]) -> CohortResult<Self> {
        let states = StateSpace::new(names.iter().cloned())?;
        Self::new(data, Arc::new(states))
    }

    /// All-zero vector.
    pub fn zeros(states: &Arc<StateSpace>) -> Self {
        Self {
            data: DVector::zeros(states.len()),
            states: Arc::clone(states),
        }
    }

    pub fn get(&self, state: &str) -> CohortResult<f64> {
        Ok(self.data[self.states.index_of(state)?])
    }

    pub fn set(&mut self, state: &str, value: f64) -> CohortResult<()> {
        let i = self.states.index_of(state)?;
        self.data[i] = value;
        Ok(())
    }

    /// Adds `value` to the entry for `state`.
    pub fn add(&mut self, state: &str, value: f64) -> CohortResult<()> {
        let i = self.states.index_of(state)?;
        self.data[i] += value;
        Ok(())
    }

    /// Direct access to the backing storage (no copy).
    pub fn as_array(&self) -> &DVector<f64> {
        &self.data
    }

    pub fn as_array_mut(&mut self) -> &mut DVector<f64> {
        &mut self.data
    }

    pub fn states(&self) -> &Arc<StateSpace> {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.data.sum()
    }

    /// (state, value) pairs in state order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.states.iter().zip(self.data.iter().copied())
    }
}

/// N x N matrix addressed by (origin, destination) state names.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    data: DMatrix<f64>,
    states: Arc<StateSpace>,
}

impl LabeledMatrix {
    /// Wraps `data`, failing with a shape error unless it is N x N.
    pub fn new(data: DMatrix<f64>, states: Arc<StateSpace>) -> CohortResult<Self> {
        let n = states.len();
        if data.nrows() != n || data.ncols() != n {
            return Err(CohortError::shape(format!(
                "matrix is {}x{} but the state space has {} names",
                data.nrows(),
                data.ncols(),
                n
            )));
        }
        Ok(Self { data, states })
    }

    pub fn from_names(data: DMatrix<f64>, names: &[String]) -> CohortResult<Self> {
        let states = StateSpace::new(names.iter().cloned())?;
        Self::new(data, Arc::new(states))
    }

    /// Builds a matrix from row-major nested rows.
    pub fn from_rows(rows: &[Vec<f64>], states: &Arc<StateSpace>) -> CohortResult<Self> {
        let n = states.len();
        if rows.len() != n || rows.iter().any(|r| r.len() != n) {
            return Err(CohortError::shape(format!(
                "expected {} rows of {} entries",
                n, n
            )));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::new(DMatrix::from_row_slice(n, n, &flat), Arc::clone(states))
    }

    pub fn zeros(states: &Arc<StateSpace>) -> Self {
        let n = states.len();
        Self {
            data: DMatrix::zeros(n, n),
            states: Arc::clone(states),
        }
    }

    pub fn get(&self, from: &str, to: &str) -> CohortResult<f64> {
        let (i, j) = self.position(from, to)?;
        Ok(self.data[(i, j)])
    }

    pub fn set(&mut self, from: &str, to: &str, value: f64) -> CohortResult<()> {
        let (i, j) = self.position(from, to)?;
        self.data[(i, j)] = value;
        Ok(())
    }

    pub fn add(&mut self, from: &str, to: &str, value: f64) -> CohortResult<()> {
        let (i, j) = self.position(from, to)?;
        self.data[(i, j)] += value;
        Ok(())
    }

    /// Sum of the entries in the row of `from`.
    pub fn row_sum(&self, from: &str) -> CohortResult<f64> {
        let i = self.states.index_of(from)?;
        Ok(self.data.row(i).sum())
    }

    pub fn as_array(&self) -> &DMatrix<f64> {
        &self.data
    }

    pub fn as_array_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.data
    }

    /// Consumes the wrapper and returns the raw matrix.
    pub fn into_array(self) -> DMatrix<f64> {
        self.data
    }

    pub fn states(&self) -> &Arc<StateSpace> {
        &self.states
    }

    fn position(&self, from: &str, to: &str) -> CohortResult<(usize, usize)> {
        Ok((self.states.index_of(from)?, self.states.index_of(to)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states() -> Arc<StateSpace> {
        Arc::new(StateSpace::new(["PFS", "PPS", "Death"]).unwrap())
    }

    #[test]
    fn test_vector_shape_mismatch() {
        let err = LabeledVector::new(DVector::zeros(2), states()).unwrap_err();
        assert!(matches!(err, CohortError::Shape(_)));

        let names = vec!["A".to_string(), "B".to_string()];
        assert!(LabeledVector::from_names(DVector::zeros(3), &names).is_err());
        assert!(LabeledVector::from_names(DVector::zeros(2), &names).is_ok());
    }

    #[test]
    fn test_vector_named_access() {
        let mut v = LabeledVector::zeros(&states());
        v.set("PFS", 0.7).unwrap();
        v.add("PFS", 0.1).unwrap();
        v.add("PPS", 0.2).unwrap();

        assert!((v.get("PFS").unwrap() - 0.8).abs() < 1e-12);
        assert_eq!(v.as_array()[1], 0.2);
        assert!(matches!(
            v.get("Progressed"),
            Err(CohortError::UnknownName { kind: "state", .. })
        ));

        let pairs: Vec<(&str, f64)> = v.iter().collect();
        assert_eq!(pairs[2], ("Death", 0.0));
    }

    #[test]
    fn test_as_array_is_not_a_copy() {
        let mut v = LabeledVector::zeros(&states());
        v.as_array_mut()[2] += 5.0;
        assert_eq!(v.get("Death").unwrap(), 5.0);
    }

    #[test]
    fn test_matrix_shape_mismatch() {
        assert!(LabeledMatrix::new(DMatrix::zeros(3, 2), states()).is_err());
        assert!(LabeledMatrix::new(DMatrix::zeros(2, 2), states()).is_err());
        assert!(LabeledMatrix::from_rows(&[vec![1.0, 0.0]], &states()).is_err());
    }

    #[test]
    fn test_matrix_named_access() {
        let mut m = LabeledMatrix::zeros(&states());
        m.set("PFS", "PPS", 0.3).unwrap();
        m.set("PFS", "PFS", 0.6).unwrap();
        m.add("PFS", "Death", 0.1).unwrap();

        assert_eq!(m.get("PFS", "PPS").unwrap(), 0.3);
        assert_eq!(m.as_array()[(0, 2)], 0.1);
        assert!((m.row_sum("PFS").unwrap() - 1.0).abs() < 1e-12);
        assert!(m.set("PFS", "Nowhere", 1.0).is_err());
    }

    #[test]
    fn test_matrix_from_rows_is_row_major() {
        let m = LabeledMatrix::from_rows(
            &[
                vec![0.5, 0.25, 0.25],
                vec![0.0, 0.9, 0.1],
                vec![0.0, 0.0, 1.0],
            ],
            &states(),
        )
        .unwrap();

        assert_eq!(m.get("PFS", "PPS").unwrap(), 0.25);
        assert_eq!(m.get("PPS", "Death").unwrap(), 0.1);
        assert_eq!(m.get("Death", "PFS").unwrap(), 0.0);
    }
}
