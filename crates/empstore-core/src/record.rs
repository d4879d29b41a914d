//! Employee record model.

use crate::config::StoreConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bounded employee name.
///
/// Construction is lossy: input is cut at the first NUL and then to at most
/// [`StoreConfig::NAME_MAX_LEN`] bytes on a UTF-8 character boundary, so the
/// value always fits the NUL-padded wire field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EmployeeName(String);

impl EmployeeName {
    pub fn new(name: &str) -> Self {
        let name = name.split('\0').next().unwrap_or_default();
        let mut end = name.len().min(StoreConfig::NAME_MAX_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self(name[..end].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `name` would be shortened by [`EmployeeName::new`].
    pub fn would_truncate(name: &str) -> bool {
        Self::new(name).0.len() != name.len()
    }

    /// The NUL-padded wire field.
    pub fn to_field(&self) -> [u8; StoreConfig::NAME_FIELD_WIDTH] {
        let mut field = [0u8; StoreConfig::NAME_FIELD_WIDTH];
        field[..self.0.len()].copy_from_slice(self.0.as_bytes());
        field
    }

    /// Decode a wire field. Bytes after the first NUL are ignored.
    pub fn from_field(field: &[u8]) -> Self {
        let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
        Self::new(&String::from_utf8_lossy(&field[..end]))
    }
}

impl From<String> for EmployeeName {
    fn from(name: String) -> Self {
        Self::new(&name)
    }
}

impl From<&str> for EmployeeName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<EmployeeName> for String {
    fn from(name: EmployeeName) -> Self {
        name.0
    }
}

impl fmt::Display for EmployeeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One employee row, the unit of storage and locking.
///
/// `id == 0` marks an empty record; stored records have positive ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i32,
    pub name: EmployeeName,
    pub hours: f64,
}

impl Record {
    pub fn new(id: i32, name: &str, hours: f64) -> Self {
        Self {
            id,
            name: EmployeeName::new(name),
            hours,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id == 0
    }

    pub fn is_valid(&self) -> bool {
        self.id > 0
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID: {}, Name: {}, Hours: {}", self.id, self.name, self.hours)
    }
}
