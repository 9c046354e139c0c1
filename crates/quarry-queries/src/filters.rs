//! Query Filters
//!
//! A filter is one predicate of a WHERE clause: a field in external
//! (camelCase) naming, a comparison operator, and its operand.

use std::fmt;

use quarry_core::Value;

/// Comparison operators supported in WHERE clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    /// Equals (=)
    Equals,
    /// Not equals (!=)
    NotEquals,
    /// Greater than (>)
    GreaterThan,
    /// Less than (<)
    LessThan,
    /// Greater than or equal (>=)
    GreaterThanOrEqual,
    /// Less than or equal (<=)
    LessThanOrEqual,
    /// Case-sensitive pattern match
    Like,
    /// Case-insensitive pattern match
    ILike,
    /// Member of a list
    In,
    /// Not a member of a list
    NotIn,
    IsNull,
    IsNotNull,
}

impl FilterOperator {
    /// SQL spelling of the operator
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::NotEquals => "!=",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThanOrEqual => "<=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// Check if this operator takes a list operand
    pub fn takes_list(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// Check if this operator ignores its operand
    pub fn is_null_check(&self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Right-hand side of a predicate
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Operand {
    /// No operand (null checks)
    #[default]
    None,
    /// Single bound value
    Value(Value),
    /// Ordered list of bound values (IN / NOT IN)
    List(Vec<Value>),
}

impl Operand {
    /// Values this operand binds, in order
    pub fn values(&self) -> Vec<Value> {
        match self {
            Operand::None => vec![],
            Operand::Value(v) => vec![v.clone()],
            Operand::List(vs) => vs.clone(),
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl From<Vec<Value>> for Operand {
    fn from(values: Vec<Value>) -> Self {
        Operand::List(values)
    }
}

impl<T: Into<Value>> FromIterator<T> for Operand {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Operand::List(iter.into_iter().map(Into::into).collect())
    }
}

/// A single filter condition
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// The field being filtered, in external naming (e.g. `authorId`)
    pub field: String,
    /// The operator to apply
    pub operator: FilterOperator,
    /// The operand, ignored for null checks
    pub operand: Operand,
}

impl Filter {
    /// Create a new filter
    pub fn new(field: impl Into<String>, operator: FilterOperator, operand: Operand) -> Self {
        Self {
            field: field.into(),
            operator,
            operand,
        }
    }

    /// Create an equals filter
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Equals, Operand::Value(value.into()))
    }

    /// Create an IN filter
    pub fn in_list<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::new(field, FilterOperator::In, values.into_iter().collect())
    }

    /// Create a NOT IN filter
    pub fn not_in_list<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::new(field, FilterOperator::NotIn, values.into_iter().collect())
    }

    /// Create an is null filter
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNull, Operand::None)
    }

    /// Create an is not null filter
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNotNull, Operand::None)
    }

    /// Values bound by this filter, in placeholder order
    pub fn bound_values(&self) -> Vec<Value> {
        if self.operator.is_null_check() {
            return vec![];
        }
        match (&self.operand, self.operator.takes_list()) {
            // A scalar given to IN binds as a one-element list
            (Operand::Value(v), true) => vec![v.clone()],
            (operand, _) => operand.values(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_sql_spelling() {
        assert_eq!(FilterOperator::NotEquals.as_sql(), "!=");
        assert_eq!(FilterOperator::GreaterThanOrEqual.to_string(), ">=");
        assert_eq!(FilterOperator::ILike.as_sql(), "ILIKE");
        assert_eq!(FilterOperator::NotIn.as_sql(), "NOT IN");
        assert!(FilterOperator::In.takes_list());
        assert!(!FilterOperator::Equals.takes_list());
        assert!(FilterOperator::IsNotNull.is_null_check());
    }

    #[test]
    fn test_filter_creation() {
        let filter = Filter::equals("statusId", 1);
        assert_eq!(filter.field, "statusId");
        assert_eq!(filter.operator, FilterOperator::Equals);
        assert_eq!(filter.bound_values(), vec![Value::Int(1)]);
    }

    #[test]
    fn test_in_list_binds_every_value() {
        let filter = Filter::in_list("id", [1, 2, 3]);
        assert_eq!(
            filter.bound_values(),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
    }

    #[test]
    fn test_null_check_ignores_operand() {
        let filter = Filter::new(
            "deletedAt",
            FilterOperator::IsNull,
            Operand::Value(Value::Int(5)),
        );
        assert!(filter.bound_values().is_empty());
    }
}
