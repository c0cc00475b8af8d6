//! Named-tensor state dict backing the weights artifact.
//!
//! Every learned tensor is persisted under a structural name such as
//! `encoder.layers.0.mha.w_q.weight`. Loading takes entries out of the
//! map so the caller can detect leftovers from a mismatched architecture.

use crate::error::{ModelError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TensorRecord {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

pub type StateDict = BTreeMap<String, TensorRecord>;

pub fn insert1(state: &mut StateDict, name: String, tensor: &Array1<f32>) {
    state.insert(
        name,
        TensorRecord {
            shape: tensor.shape().to_vec(),
            data: tensor.to_vec(),
        },
    );
}

pub fn insert2(state: &mut StateDict, name: String, tensor: &Array2<f32>) {
    state.insert(
        name,
        TensorRecord {
            shape: tensor.shape().to_vec(),
            data: tensor.iter().copied().collect(),
        },
    );
}

pub fn take1(state: &mut StateDict, name: &str, len: usize) -> Result<Array1<f32>> {
    let record = remove(state, name)?;
    if record.shape != [len] {
        return Err(ModelError::TensorShape {
            name: name.to_string(),
            got: record.shape,
            expected: vec![len],
        });
    }
    if record.data.len() != len {
        return Err(ModelError::TensorShape {
            name: name.to_string(),
            got: vec![record.data.len()],
            expected: vec![len],
        });
    }
    Ok(Array1::from_vec(record.data))
}

pub fn take2(state: &mut StateDict, name: &str, rows: usize, cols: usize) -> Result<Array2<f32>> {
    let record = remove(state, name)?;
    if record.shape != [rows, cols] {
        return Err(ModelError::TensorShape {
            name: name.to_string(),
            got: record.shape,
            expected: vec![rows, cols],
        });
    }
    Ok(Array2::from_shape_vec((rows, cols), record.data)?)
}

fn remove(state: &mut StateDict, name: &str) -> Result<TensorRecord> {
    state.remove(name).ok_or_else(|| ModelError::MissingTensor {
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{insert2, take2, StateDict};
    use crate::error::ModelError;
    use ndarray::array;

    #[test]
    fn round_trips_a_matrix() -> Result<(), ModelError> {
        let mut state = StateDict::new();
        let w = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        insert2(&mut state, "w".to_string(), &w);
        let back = take2(&mut state, "w", 3, 2)?;
        assert_eq!(back, w);
        assert!(state.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_shape_mismatch() {
        let mut state = StateDict::new();
        insert2(&mut state, "w".to_string(), &array![[1.0, 2.0]]);
        assert!(matches!(
            take2(&mut state, "w", 2, 2),
            Err(ModelError::TensorShape { .. })
        ));
    }

    #[test]
    fn reports_missing_tensor_by_name() {
        let mut state = StateDict::new();
        assert!(matches!(
            take2(&mut state, "absent", 1, 1),
            Err(ModelError::MissingTensor { .. })
        ));
    }
}
