//! Query Sort Orders
//!
//! Sort orders define how query results should be ordered.

use std::fmt;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Ascending order (A-Z, 1-9, oldest first)
    #[default]
    Asc,
    /// Descending order (Z-A, 9-1, newest first)
    Desc,
}

impl SortDirection {
    /// SQL keyword
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A single sort criterion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortCriterion {
    /// The field to sort by, in external naming
    pub field: String,
    /// The sort direction
    pub direction: SortDirection,
}

impl SortCriterion {
    /// Create a new sort criterion
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_direction_is_ascending() {
        assert_eq!(SortDirection::default(), SortDirection::Asc);
        assert_eq!(SortDirection::Desc.to_string(), "DESC");
    }

    #[test]
    fn test_sort_criterion() {
        let criterion = SortCriterion::new("createdAt", SortDirection::Desc);
        assert_eq!(criterion.field, "createdAt");
        assert_eq!(criterion.direction.as_sql(), "DESC");
    }
}
