//! Typed columns and the type registry
//!
//! A [`Data`] is one typed column of a batch. Every concrete column family
//! implements the same capability set and registers its [`Type`] by name, so
//! new column kinds are added without touching the runners that move them.

pub mod column;
pub mod types;

pub use column::{
    BooleanType, Column, DoubleType, IntegerType, Primitive, PrimitiveType, StringType,
};
pub use types::{
    Type, TypeRef, TypeRegistry, WildcardType, are_equal_types, boolean, describe, double, integer,
    string, types, wildcard,
};

use ferry_common::Result;
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Shared, immutable handle to a column.
pub type DataRef = Arc<dyn Data>;

/// Outcome of comparing one row of two columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Less,
    Equal,
    Greater,
    /// Exactly one side is null
    Null,
    /// Both sides are null
    BothNull,
}

/// A single typed column: an ordered, fixed-length sequence of nullable values.
///
/// Row indexes passed to any method must be `< len()`. Methods taking another
/// column fail with [`ferry_common::FerryError::TypeMismatch`] when the other
/// column has a different declared type.
pub trait Data: Send + Sync + Debug + Any {
    /// The declared type of every value in this column.
    fn data_type(&self) -> TypeRef;

    /// Number of rows.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether row `i` sorts before row `j`. Nulls sort first.
    fn less(&self, i: usize, j: usize) -> bool;

    /// Swap two rows in place.
    fn swap(&mut self, i: usize, j: usize);

    /// Whether `row` of this column sorts before `other_row` of `other`.
    fn less_other(&self, row: usize, other: &dyn Data, other_row: usize) -> Result<bool>;

    /// The contiguous rows `[start, end)`, sharing the underlying buffer.
    fn slice(&self, start: usize, end: usize) -> DataRef;

    /// A new column holding this column's rows followed by `other`'s.
    fn append(&self, other: &dyn Data) -> Result<DataRef>;

    /// This column repeated `times` times end to end.
    fn duplicate(&self, times: usize) -> DataRef;

    fn is_null(&self, row: usize) -> bool;

    fn mark_null(&mut self, row: usize);

    /// Null flag of every row.
    fn nulls(&self) -> Vec<bool>;

    /// Overwrite `to_row` with the value at `from_row` of `from`.
    fn copy_row(&mut self, from: &dyn Data, from_row: usize, to_row: usize) -> Result<()>;

    /// Identity check: true when both columns view the same rows of the same buffer.
    fn same_buffer(&self, other: &dyn Data) -> bool;

    /// Row-wise comparison against a column of the same type and length.
    fn compare(&self, other: &dyn Data) -> Result<Vec<Comparison>>;

    /// Render every value. Nulls render as `null`.
    fn strings(&self) -> Vec<String>;

    /// Render every value as a routing key. Rows that compare equal get equal
    /// keys, so they hash to the same place.
    fn keys(&self) -> Vec<String>;

    /// An owned, independently mutable copy.
    fn boxed_clone(&self) -> Box<dyn Data>;

    /// Serialize the values for the wire. Decoded by [`Type::decode`].
    fn encode(&self) -> Result<Vec<u8>>;

    fn as_any(&self) -> &dyn Any;
}
