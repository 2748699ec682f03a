//! Built-in nullable primitive columns.

use super::types::Type;
use super::{Comparison, Data, DataRef, TypeRef};
use bincode::{Decode, Encode};
use ferry_common::{FerryError, Result};
use std::any::Any;
use std::cmp::Ordering;
use std::fmt::{self, Debug, Display};
use std::marker::PhantomData;
use std::sync::Arc;

/// A scalar value storable in a [`Column`].
pub trait Primitive:
    Clone + Default + PartialOrd + Display + Debug + Send + Sync + Encode + Decode<()> + 'static
{
    /// Name the column type is registered under
    const TYPE_NAME: &'static str;
    /// Nominal width of one value in bytes
    const SIZE: usize;

    /// Rendering used for routing. Values that compare equal render equally.
    fn key(&self) -> String {
        self.to_string()
    }
}

impl Primitive for i64 {
    const TYPE_NAME: &'static str = "integer";
    const SIZE: usize = 8;
}

impl Primitive for f64 {
    const TYPE_NAME: &'static str = "double";
    const SIZE: usize = 8;

    fn key(&self) -> String {
        // -0.0 == 0.0
        if *self == 0.0 {
            "0".to_string()
        } else {
            self.to_string()
        }
    }
}

impl Primitive for String {
    const TYPE_NAME: &'static str = "string";
    const SIZE: usize = 16;
}

impl Primitive for bool {
    const TYPE_NAME: &'static str = "boolean";
    const SIZE: usize = 1;
}

/// Type descriptor of [`Column<P>`].
#[derive(Debug)]
pub struct PrimitiveType<P> {
    _marker: PhantomData<fn() -> P>,
}

pub type IntegerType = PrimitiveType<i64>;
pub type DoubleType = PrimitiveType<f64>;
pub type StringType = PrimitiveType<String>;
pub type BooleanType = PrimitiveType<bool>;

impl<P> PrimitiveType<P> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<P> Default for PrimitiveType<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Primitive> Display for PrimitiveType<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(P::TYPE_NAME)
    }
}

impl<P: Primitive> Type for PrimitiveType<P> {
    fn name(&self) -> &str {
        P::TYPE_NAME
    }

    fn size(&self) -> usize {
        P::SIZE
    }

    fn data(&self, rows: usize) -> Result<Box<dyn Data>> {
        Ok(Box::new(Column::from_options(vec![Some(P::default()); rows])))
    }

    fn data_empty(&self, capacity: usize) -> Result<Box<dyn Data>> {
        Ok(Box::new(Column::<P>::from_options(Vec::with_capacity(capacity))))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Data>> {
        let (values, _): (Vec<Option<P>>, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard()).map_err(|e| {
                FerryError::codec_error(format!("failed to decode {} column: {}", P::TYPE_NAME, e))
            })?;
        Ok(Box::new(Column::from_options(values)))
    }
}

/// A window over a shared buffer of nullable values.
///
/// Slicing shares the buffer; mutation copies the visible rows first when the
/// buffer is shared or wider than the window.
#[derive(Debug, Clone)]
pub struct Column<P: Primitive> {
    values: Arc<Vec<Option<P>>>,
    offset: usize,
    len: usize,
}

impl<P: Primitive> Column<P> {
    /// A column without nulls.
    pub fn from_values(values: Vec<P>) -> Self {
        Self::from_options(values.into_iter().map(Some).collect())
    }

    pub fn from_options(values: Vec<Option<P>>) -> Self {
        let len = values.len();
        Self {
            values: Arc::new(values),
            offset: 0,
            len,
        }
    }

    /// The visible rows.
    pub fn values(&self) -> &[Option<P>] {
        &self.values[self.offset..self.offset + self.len]
    }

    pub fn get(&self, row: usize) -> Option<&P> {
        self.values()[row].as_ref()
    }

    pub fn into_data(self) -> DataRef {
        Arc::new(self)
    }

    fn values_mut(&mut self) -> &mut Vec<Option<P>> {
        if self.offset != 0 || self.len != self.values.len() {
            self.values = Arc::new(self.values().to_vec());
            self.offset = 0;
        }
        Arc::make_mut(&mut self.values)
    }

    fn downcast(other: &dyn Data) -> Result<&Column<P>> {
        other
            .as_any()
            .downcast_ref::<Column<P>>()
            .ok_or_else(|| FerryError::type_mismatch(P::TYPE_NAME, other.data_type().name()))
    }
}

impl<P: Primitive> From<Vec<P>> for Column<P> {
    fn from(values: Vec<P>) -> Self {
        Self::from_values(values)
    }
}

impl<P: Primitive> From<Vec<Option<P>>> for Column<P> {
    fn from(values: Vec<Option<P>>) -> Self {
        Self::from_options(values)
    }
}

impl<P: Primitive> Data for Column<P> {
    fn data_type(&self) -> TypeRef {
        Arc::new(PrimitiveType::<P>::new())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn less(&self, i: usize, j: usize) -> bool {
        let values = self.values();
        values[i] < values[j]
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.values_mut().swap(i, j);
    }

    fn less_other(&self, row: usize, other: &dyn Data, other_row: usize) -> Result<bool> {
        let other = Self::downcast(other)?;
        Ok(self.values()[row] < other.values()[other_row])
    }

    fn slice(&self, start: usize, end: usize) -> DataRef {
        assert!(
            start <= end && end <= self.len,
            "slice [{start}, {end}) out of range for {} rows",
            self.len
        );
        Arc::new(Column {
            values: Arc::clone(&self.values),
            offset: self.offset + start,
            len: end - start,
        })
    }

    fn append(&self, other: &dyn Data) -> Result<DataRef> {
        let other = Self::downcast(other)?;
        let mut values = Vec::with_capacity(self.len + other.len);
        values.extend_from_slice(self.values());
        values.extend_from_slice(other.values());
        Ok(Arc::new(Column::from_options(values)))
    }

    fn duplicate(&self, times: usize) -> DataRef {
        let mut values = Vec::with_capacity(self.len * times);
        for _ in 0..times {
            values.extend_from_slice(self.values());
        }
        Arc::new(Column::from_options(values))
    }

    fn is_null(&self, row: usize) -> bool {
        self.values()[row].is_none()
    }

    fn mark_null(&mut self, row: usize) {
        self.values_mut()[row] = None;
    }

    fn nulls(&self) -> Vec<bool> {
        self.values().iter().map(Option::is_none).collect()
    }

    fn copy_row(&mut self, from: &dyn Data, from_row: usize, to_row: usize) -> Result<()> {
        let value = Self::downcast(from)?.values()[from_row].clone();
        self.values_mut()[to_row] = value;
        Ok(())
    }

    fn same_buffer(&self, other: &dyn Data) -> bool {
        match Self::downcast(other) {
            Ok(other) => {
                Arc::ptr_eq(&self.values, &other.values)
                    && self.offset == other.offset
                    && self.len == other.len
            }
            Err(_) => false,
        }
    }

    fn compare(&self, other: &dyn Data) -> Result<Vec<Comparison>> {
        let other = Self::downcast(other)?;
        if other.len != self.len {
            return Err(FerryError::invalid_data(format!(
                "cannot compare columns of {} and {} rows",
                self.len, other.len
            )));
        }

        let res = self
            .values()
            .iter()
            .zip(other.values())
            .map(|pair| match pair {
                (None, None) => Comparison::BothNull,
                (None, _) | (_, None) => Comparison::Null,
                (Some(a), Some(b)) => match a.partial_cmp(b) {
                    Some(Ordering::Less) => Comparison::Less,
                    Some(Ordering::Greater) => Comparison::Greater,
                    _ => Comparison::Equal,
                },
            })
            .collect();
        Ok(res)
    }

    fn strings(&self) -> Vec<String> {
        self.values()
            .iter()
            .map(|v| match v {
                Some(v) => v.to_string(),
                None => "null".to_string(),
            })
            .collect()
    }

    fn boxed_clone(&self) -> Box<dyn Data> {
        Box::new(Column::from_options(self.values().to_vec()))
    }

    fn keys(&self) -> Vec<String> {
        self.values()
            .iter()
            .map(|v| match v {
                Some(v) => v.key(),
                None => "null".to_string(),
            })
            .collect()
    }

    fn encode(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self.values(), bincode::config::standard()).map_err(|e| {
            FerryError::codec_error(format!("failed to encode {} column: {}", P::TYPE_NAME, e))
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
