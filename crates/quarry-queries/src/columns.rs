//! Projected columns
//!
//! A query either selects every column or an explicit ordered list of
//! fields given in external naming.

/// SELECT list of a query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    /// `SELECT *`
    #[default]
    All,
    /// Explicit fields, in selection order
    Fields(Vec<String>),
}

impl Projection {
    /// Build a projection from field names; an empty list selects everything
    pub fn fields<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            Self::All
        } else {
            Self::Fields(fields)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_field_list_selects_all() {
        assert!(Projection::fields(Vec::<String>::new()).is_all());
    }

    #[test]
    fn test_fields_keep_order() {
        let projection = Projection::fields(["title", "authorId"]);
        assert_eq!(
            projection,
            Projection::Fields(vec!["title".to_string(), "authorId".to_string()])
        );
    }
}
