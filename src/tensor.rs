//! Numeric backend boundary.
//!
//! The runner batches observations and recurrent state as
//! `ndarray::ArrayD<f32>` and hands them to an `RlModule` through its
//! `TensorBackend`. `NdarrayBackend` passes arrays through unchanged; the
//! `nalgebra` feature adds a matrix backend for 2-D payloads.
//!
//! `ToArray` / `FromArray` connect typed observations and actions with that
//! array representation.

use ndarray::{Array, ArrayD, ArrayViewD, Axis, arr0};

use crate::core::{Result, RunnerError};

/// Converts between the runner's arrays and a framework-specific tensor.
pub trait TensorBackend {
    type Tensor: Clone;

    fn to_tensor(array: &ArrayD<f32>) -> Result<Self::Tensor>;
    fn from_tensor(tensor: &Self::Tensor) -> Result<ArrayD<f32>>;
}

/// Identity backend: modules consume `ArrayD<f32>` directly.
#[derive(Clone, Copy, Debug, Default)]
pub struct NdarrayBackend;

impl TensorBackend for NdarrayBackend {
    type Tensor = ArrayD<f32>;

    fn to_tensor(array: &ArrayD<f32>) -> Result<Self::Tensor> { Ok(array.clone()) }
    fn from_tensor(tensor: &Self::Tensor) -> Result<ArrayD<f32>> { Ok(tensor.clone()) }
}

#[cfg(feature = "nalgebra")]
pub mod nalgebra_impl {
    use super::*;
    use nalgebra::DMatrix;
    use ndarray::IxDyn;

    /// Backend for modules written against `nalgebra::DMatrix<f32>`.
    ///
    /// Arrays of rank 0..=2 are accepted; a rank-1 array becomes a column.
    /// A single-column matrix comes back as rank 1, so batched vectors
    /// round-trip. The runner restores the rank of recurrent state itself.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct NalgebraBackend;

    impl TensorBackend for NalgebraBackend {
        type Tensor = DMatrix<f32>;

        fn to_tensor(array: &ArrayD<f32>) -> Result<Self::Tensor> {
            let (rows, cols) = match array.shape() {
                [] => (1, 1),
                [r] => (*r, 1),
                [r, c] => (*r, *c),
                other => {
                    return Err(RunnerError::NotSupported(format!(
                        "nalgebra backend takes rank <= 2, got shape {other:?}"
                    )));
                }
            };
            Ok(DMatrix::from_row_iterator(rows, cols, array.iter().copied()))
        }

        fn from_tensor(tensor: &Self::Tensor) -> Result<ArrayD<f32>> {
            let (rows, cols) = tensor.shape();
            let data: Vec<f32> = (0..rows).flat_map(|i| (0..cols).map(move |j| tensor[(i, j)])).collect();
            let shape = if cols == 1 { vec![rows] } else { vec![rows, cols] };
            Ok(Array::from_shape_vec(IxDyn(&shape), data)?)
        }
    }

}

/// A value that can be laid out as one row of a batch.
pub trait ToArray {
    fn to_array(&self) -> ArrayD<f32>;
}

/// A value that can be read back from one row of a batch.
pub trait FromArray: Sized {
    fn from_array(row: ArrayViewD<'_, f32>) -> Result<Self>;
}

impl ToArray for f32 {
    fn to_array(&self) -> ArrayD<f32> { arr0(*self).into_dyn() }
}

impl ToArray for i32 {
    fn to_array(&self) -> ArrayD<f32> { arr0(*self as f32).into_dyn() }
}

impl ToArray for u32 {
    fn to_array(&self) -> ArrayD<f32> { arr0(*self as f32).into_dyn() }
}

impl ToArray for Vec<f32> {
    fn to_array(&self) -> ArrayD<f32> { Array::from_vec(self.clone()).into_dyn() }
}

impl<const N: usize> ToArray for [f32; N] {
    fn to_array(&self) -> ArrayD<f32> { Array::from_vec(self.to_vec()).into_dyn() }
}

impl ToArray for ArrayD<f32> {
    fn to_array(&self) -> ArrayD<f32> { self.clone() }
}

fn scalar(row: &ArrayViewD<'_, f32>) -> Result<f32> {
    if row.ndim() > 1 || row.len() != 1 {
        return Err(RunnerError::InvalidAction(format!("expected a scalar, got shape {:?}", row.shape())));
    }
    row.iter()
        .next()
        .copied()
        .ok_or_else(|| RunnerError::InvalidAction("empty action row".into()))
}

impl FromArray for f32 {
    fn from_array(row: ArrayViewD<'_, f32>) -> Result<Self> { scalar(&row) }
}

impl FromArray for u32 {
    fn from_array(row: ArrayViewD<'_, f32>) -> Result<Self> {
        let v = scalar(&row)?;
        if v < 0.0 || v.fract() != 0.0 {
            return Err(RunnerError::InvalidAction(format!("{v} is not a discrete action")));
        }
        Ok(v as u32)
    }
}

impl FromArray for Vec<f32> {
    fn from_array(row: ArrayViewD<'_, f32>) -> Result<Self> { Ok(row.iter().copied().collect()) }
}

impl<const N: usize> FromArray for [f32; N] {
    fn from_array(row: ArrayViewD<'_, f32>) -> Result<Self> {
        let v: Vec<f32> = row.iter().copied().collect();
        let len = v.len();
        v.try_into()
            .map_err(|_| RunnerError::InvalidAction(format!("expected {N} values, got {len}")))
    }
}

impl FromArray for ArrayD<f32> {
    fn from_array(row: ArrayViewD<'_, f32>) -> Result<Self> { Ok(row.to_owned()) }
}

/// Stack per-slot rows along a new leading batch axis.
pub fn stack_rows(rows: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
    let views: Vec<ArrayViewD<'_, f32>> = rows.iter().map(|r| r.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

/// Stack the array form of each observation.
pub fn stack_observations<O: ToArray>(observations: &[O]) -> Result<ArrayD<f32>> {
    let rows: Vec<ArrayD<f32>> = observations.iter().map(ToArray::to_array).collect();
    stack_rows(&rows)
}

/// Row `index` of a batched array.
pub fn row(batch: &ArrayD<f32>, index: usize) -> Result<ArrayD<f32>> {
    if batch.ndim() == 0 || batch.len_of(Axis(0)) <= index {
        return Err(RunnerError::InvalidObservation(format!(
            "row {index} out of range for batch of shape {:?}",
            batch.shape()
        )));
    }
    Ok(batch.index_axis(Axis(0), index).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stacking_adds_a_batch_axis() {
        let batch = stack_observations(&[[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]]).unwrap();
        assert_eq!(batch.shape(), &[3, 2]);
        assert_eq!(row(&batch, 1).unwrap().as_slice().unwrap(), &[3.0, 4.0]);
    }

    #[test]
    fn scalar_observations_stack_into_a_vector() {
        let batch = stack_observations(&[1i32, 2, 3]).unwrap();
        assert_eq!(batch.shape(), &[3]);
        assert_eq!(row(&batch, 2).unwrap().into_raw_vec(), vec![3.0]);
    }

    #[test]
    fn mismatched_rows_fail_to_stack() {
        let err = stack_rows(&[Array::from_vec(vec![1.0f32]).into_dyn(), Array::from_vec(vec![1.0f32, 2.0]).into_dyn()]);
        assert!(matches!(err, Err(RunnerError::Shape(_))));
    }

    #[test]
    fn discrete_actions_round_from_whole_numbers_only() {
        assert_eq!(u32::from_array(arr0(2.0f32).into_dyn().view()).unwrap(), 2);
        assert!(u32::from_array(arr0(1.5f32).into_dyn().view()).is_err());
        assert!(u32::from_array(arr0(-1.0f32).into_dyn().view()).is_err());
    }

    #[test]
    fn fixed_size_actions_check_length() {
        let ok = <[f32; 2]>::from_array(Array::from_vec(vec![0.5f32, -0.5]).into_dyn().view()).unwrap();
        assert_eq!(ok, [0.5, -0.5]);
        assert!(<[f32; 3]>::from_array(Array::from_vec(vec![0.5f32]).into_dyn().view()).is_err());
    }

    #[test]
    fn row_out_of_range_is_an_error() {
        let batch = stack_observations(&[1.0f32]).unwrap();
        assert!(row(&batch, 1).is_err());
    }
}
