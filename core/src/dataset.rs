//! Row batches exchanged between runners.

use crate::data::{DataRef, TypeRef};
use ferry_common::{FerryError, Result};
use std::fmt::{self, Debug};
use std::sync::Arc;

/// An immutable, ordered collection of equal-length columns.
///
/// Cloning is cheap: columns are shared. A runner that needs to modify a
/// column copies it first with [`crate::data::Data::boxed_clone`].
#[derive(Clone, Default)]
pub struct Dataset {
    columns: Vec<DataRef>,
}

impl Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("width", &self.width())
            .field("rows", &self.len())
            .finish()
    }
}

impl Dataset {
    /// Build a dataset, failing if the columns differ in length.
    pub fn new(columns: Vec<DataRef>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.len();
            if let Some((i, col)) = columns.iter().enumerate().find(|(_, c)| c.len() != rows) {
                return Err(FerryError::invalid_data(format!(
                    "column {} has {} rows, expected {}",
                    i,
                    col.len(),
                    rows
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column(&self, index: usize) -> Option<&DataRef> {
        self.columns.get(index)
    }

    pub fn columns(&self) -> &[DataRef] {
        &self.columns
    }

    pub fn types(&self) -> Vec<TypeRef> {
        self.columns.iter().map(|c| c.data_type()).collect()
    }

    /// The rows `[start, end)` of every column, sharing buffers.
    pub fn slice(&self, start: usize, end: usize) -> Dataset {
        Dataset {
            columns: self.columns.iter().map(|c| c.slice(start, end)).collect(),
        }
    }

    /// Concatenate the rows of `other` after the rows of this dataset.
    pub fn append(&self, other: &Dataset) -> Result<Dataset> {
        if self.width() != other.width() {
            return Err(FerryError::invalid_data(format!(
                "cannot append a dataset of width {} to one of width {}",
                other.width(),
                self.width()
            )));
        }
        let columns = self
            .columns
            .iter()
            .zip(&other.columns)
            .map(|(a, b)| a.append(b.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Dataset { columns })
    }

    /// A new dataset made of the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Dataset> {
        if rows.is_empty() {
            return Ok(self.slice(0, 0));
        }
        let picks: Vec<(&Dataset, usize)> = rows.iter().map(|&row| (self, row)).collect();
        Dataset::gather_rows(&picks)
    }

    /// Materialize rows drawn from several datasets of identical shape.
    ///
    /// The column types of the first dataset drive allocation; every other
    /// dataset must match them.
    pub fn gather_rows(rows: &[(&Dataset, usize)]) -> Result<Dataset> {
        let Some((first, _)) = rows.first() else {
            return Ok(Dataset::default());
        };

        for (ds, row) in rows {
            if ds.width() != first.width() {
                return Err(FerryError::invalid_data(format!(
                    "cannot gather rows from datasets of width {} and {}",
                    first.width(),
                    ds.width()
                )));
            }
            if *row >= ds.len() {
                return Err(FerryError::invalid_data(format!(
                    "row {} out of range for {} rows",
                    row,
                    ds.len()
                )));
            }
        }

        let mut columns = Vec::with_capacity(first.width());
        for (c, template) in first.columns.iter().enumerate() {
            let mut column = template.data_type().data(rows.len())?;
            for (to_row, (ds, from_row)) in rows.iter().enumerate() {
                column.copy_row(ds.columns[c].as_ref(), *from_row, to_row)?;
            }
            let column: DataRef = Arc::from(column);
            columns.push(column);
        }
        Ok(Dataset { columns })
    }

    /// Render every row, for diagnostics and tests.
    pub fn strings(&self) -> Vec<Vec<String>> {
        let rendered: Vec<Vec<String>> = self.columns.iter().map(|c| c.strings()).collect();
        (0..self.len())
            .map(|row| rendered.iter().map(|col| col[row].clone()).collect())
            .collect()
    }
}

impl TryFrom<Vec<DataRef>> for Dataset {
    type Error = FerryError;

    fn try_from(columns: Vec<DataRef>) -> Result<Self> {
        Dataset::new(columns)
    }
}
