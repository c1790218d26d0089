//! Client trait bound shared by every generic implementation in the crate.

use numr::ops::{
    AdvancedRandomOps, CompareOps, ConditionalOps, IndexingOps, MatmulOps, RandomOps, ReduceOps,
    ScalarOps, ShapeOps, TensorOps, TypeConversionOps, UnaryOps, UtilityOps,
};
use numr::runtime::{Runtime, RuntimeClient};

/// Trait bounds needed by the mixture trainers and predictors.
pub trait CbmClient<R: Runtime>:
    TensorOps<R>
    + ScalarOps<R>
    + ReduceOps<R>
    + UnaryOps<R>
    + CompareOps<R>
    + ConditionalOps<R>
    + IndexingOps<R>
    + ShapeOps<R>
    + MatmulOps<R>
    + TypeConversionOps<R>
    + UtilityOps<R>
    + RandomOps<R>
    + AdvancedRandomOps<R>
    + RuntimeClient<R>
{
}

impl<R, C> CbmClient<R> for C
where
    R: Runtime,
    C: TensorOps<R>
        + ScalarOps<R>
        + ReduceOps<R>
        + UnaryOps<R>
        + CompareOps<R>
        + ConditionalOps<R>
        + IndexingOps<R>
        + ShapeOps<R>
        + MatmulOps<R>
        + TypeConversionOps<R>
        + UtilityOps<R>
        + RandomOps<R>
        + AdvancedRandomOps<R>
        + RuntimeClient<R>,
{
}
