//! Light-pollution map on the canonical grid.
//!
//! Stored as one byte per cell in grid order: a Bortle class 1..=9, or 0
//! where the class is unknown.

use std::path::Path;

use crate::error::{ClimatologyError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BortleTable {
    classes: Vec<u8>,
}

impl BortleTable {
    /// A table with every class unknown.
    pub fn unknown(cells: usize) -> Self {
        Self {
            classes: vec![0; cells],
        }
    }

    pub fn from_bytes(classes: Vec<u8>, cells: usize) -> Result<Self> {
        if classes.len() != cells {
            return Err(ClimatologyError::Bortle(format!(
                "{} bytes for {} cells",
                classes.len(),
                cells
            )));
        }
        if let Some((cell, class)) = classes.iter().enumerate().find(|(_, &c)| c > 9) {
            return Err(ClimatologyError::Bortle(format!(
                "class {} at cell {}",
                class, cell
            )));
        }
        Ok(Self { classes })
    }

    pub async fn load(path: &Path, cells: usize) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| ClimatologyError::Read {
                path: path.to_path_buf(),
                source: e,
            })?;
        Self::from_bytes(data, cells)
    }

    pub fn class(&self, cell: usize) -> Option<u8> {
        self.classes.get(cell).copied().filter(|&c| c != 0)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
