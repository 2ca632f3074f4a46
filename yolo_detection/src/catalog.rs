use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read class names: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid class line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },
    #[error("Class catalog is empty")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Stable pseudo-random color for a class id.
    pub fn for_class(class_id: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(class_id as u64);
        Self::new(rng.random(), rng.random(), rng.random())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassLabel {
    pub name: String,
    pub color: Color,
}

/// Ordered class names, indexed by class id.
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    classes: Vec<ClassLabel>,
}

impl ClassCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let file = File::open(path)?;
        let catalog = Self::parse(io::BufReader::new(file))?;
        tracing::info!("Loaded {} classes from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    /// Reads one class per line, either `name` or `name,red,green,blue`.
    pub fn parse(reader: impl BufRead) -> Result<Self, CatalogError> {
        let mut classes = Vec::new();

        for (index, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            let label = match parts.as_slice() {
                [name] => ClassLabel {
                    name: name.to_string(),
                    color: Color::for_class(classes.len()),
                },
                [name, red, green, blue] => ClassLabel {
                    name: name.to_string(),
                    color: Color::new(
                        parse_channel(red, index + 1)?,
                        parse_channel(green, index + 1)?,
                        parse_channel(blue, index + 1)?,
                    ),
                },
                _ => {
                    return Err(CatalogError::InvalidLine {
                        line: index + 1,
                        reason: format!("expected `name` or `name,r,g,b`, got `{}`", line),
                    })
                }
            };
            classes.push(label);
        }

        if classes.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { classes })
    }

    pub fn from_names<I, S>(names: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let classes: Vec<ClassLabel> = names
            .into_iter()
            .enumerate()
            .map(|(id, name)| ClassLabel {
                name: name.into(),
                color: Color::for_class(id),
            })
            .collect();
        if classes.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { classes })
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn get(&self, class_id: usize) -> Option<&ClassLabel> {
        self.classes.get(class_id)
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.get(class_id).map(|label| label.name.as_str())
    }
}

fn parse_channel(value: &str, line: usize) -> Result<u8, CatalogError> {
    value.parse().map_err(|_| CatalogError::InvalidLine {
        line,
        reason: format!("invalid color value `{}`", value),
    })
}
