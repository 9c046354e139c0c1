//! Relationship definitions and batch resolution
//!
//! A registry maps relationship names to descriptors. The resolver attaches
//! related rows to an already-fetched collection with one `IN` query per
//! requested relationship, whatever the size of the collection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use quarry_core::{record_to_external, Record, Value};
use quarry_queries::QueryDescriptor;
use tracing::{debug, warn};

use crate::error::{DataError, DataResult};
use crate::gateway::Executor;

/// Relationship kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Many-to-one through a foreign key on this table
    BelongsTo,
    /// One-to-many through a foreign key on the target
    HasMany,
    /// One-to-one through a foreign key on the target
    HasOne,
}

impl RelationKind {
    /// Value a record receives when nothing matches
    pub fn empty_value(&self) -> Value {
        match self {
            RelationKind::BelongsTo | RelationKind::HasOne => Value::Null,
            RelationKind::HasMany => Value::Records(Vec::new()),
        }
    }
}

/// How one table reaches another
///
/// Keys are field names in external naming.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub kind: RelationKind,
    pub target_table: String,
    /// Field read from the records being resolved
    pub local_key: String,
    /// Field matched on the target table
    pub target_key: String,
}

impl Relation {
    /// `posts.authorId -> users.id`
    pub fn belongs_to(target_table: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::BelongsTo,
            target_table: target_table.into(),
            local_key: foreign_key.into(),
            target_key: "id".to_string(),
        }
    }

    /// `users.id -> posts.authorId`
    pub fn has_many(target_table: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::HasMany,
            target_table: target_table.into(),
            local_key: "id".to_string(),
            target_key: foreign_key.into(),
        }
    }

    /// `users.id -> profiles.userId`
    pub fn has_one(target_table: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::HasOne,
            ..Self::has_many(target_table, foreign_key)
        }
    }

    pub fn with_local_key(mut self, field: impl Into<String>) -> Self {
        self.local_key = field.into();
        self
    }

    pub fn with_target_key(mut self, field: impl Into<String>) -> Self {
        self.target_key = field.into();
        self
    }
}

/// Named relationships of one table, fixed once built
#[derive(Debug, Clone, Default)]
pub struct RelationRegistry {
    relations: IndexMap<String, Relation>,
}

impl RelationRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> RelationRegistryBuilder {
        RelationRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// Collects relationships and validates them on [`build`](Self::build)
#[derive(Debug, Default)]
pub struct RelationRegistryBuilder {
    entries: Vec<(String, Relation)>,
}

impl RelationRegistryBuilder {
    pub fn relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        self.entries.push((name.into(), relation));
        self
    }

    pub fn belongs_to(
        self,
        name: impl Into<String>,
        target_table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relation(name, Relation::belongs_to(target_table, foreign_key))
    }

    pub fn has_many(
        self,
        name: impl Into<String>,
        target_table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relation(name, Relation::has_many(target_table, foreign_key))
    }

    pub fn has_one(
        self,
        name: impl Into<String>,
        target_table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relation(name, Relation::has_one(target_table, foreign_key))
    }

    pub fn build(self) -> DataResult<RelationRegistry> {
        let mut relations = IndexMap::with_capacity(self.entries.len());
        for (name, relation) in self.entries {
            if name.trim().is_empty() {
                return Err(DataError::Relation("relationship name is empty".into()));
            }
            if relation.target_table.is_empty()
                || relation.local_key.is_empty()
                || relation.target_key.is_empty()
            {
                return Err(DataError::Relation(format!(
                    "relationship {} has an empty table or key",
                    name
                )));
            }
            if relations.contains_key(&name) {
                return Err(DataError::Relation(format!(
                    "relationship {} is defined twice",
                    name
                )));
            }
            relations.insert(name, relation);
        }
        Ok(RelationRegistry { relations })
    }
}

/// Hashable form of a key value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LookupKey {
    Int(i64),
    Text(String),
    Other(String),
}

impl LookupKey {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null | Value::Record(_) | Value::Records(_) => None,
            Value::Int(i) => Some(LookupKey::Int(*i)),
            // Drivers may hand back integral keys as floats
            Value::Float(f) if f.fract() == 0.0 => Some(LookupKey::Int(*f as i64)),
            Value::Float(f) => Some(LookupKey::Other(f.to_string())),
            Value::Text(s) => Some(LookupKey::Text(s.clone())),
            // Keys read back as text still match native uuids
            Value::Uuid(u) => Some(LookupKey::Text(u.to_string())),
            Value::Date(d) => Some(LookupKey::Other(d.to_string())),
            Value::Bool(b) => Some(LookupKey::Other(b.to_string())),
            Value::Timestamp(t) => Some(LookupKey::Other(t.to_rfc3339())),
            Value::Json(j) => Some(LookupKey::Other(j.to_string())),
        }
    }
}

/// Resolves relationships through an executor
#[derive(Clone)]
pub struct RelationResolver {
    executor: Arc<dyn Executor>,
}

impl RelationResolver {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Attach each named relationship to every record, in the order given
    ///
    /// Names missing from the registry are skipped with a warning.
    pub async fn resolve(
        &self,
        records: &mut [Record],
        registry: &RelationRegistry,
        names: &[String],
    ) -> DataResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        for name in names {
            match registry.get(name) {
                Some(relation) => self.resolve_one(records, name, relation).await?,
                None => warn!(relation = %name, "unknown relationship, skipping"),
            }
        }
        Ok(())
    }

    async fn resolve_one(
        &self,
        records: &mut [Record],
        name: &str,
        relation: &Relation,
    ) -> DataResult<()> {
        let keys = distinct_keys(records, &relation.local_key);
        if keys.is_empty() {
            debug!(relation = name, "no keys to resolve, skipping query");
            for record in records.iter_mut() {
                record.insert(name, relation.kind.empty_value());
            }
            return Ok(());
        }

        let stmt = QueryDescriptor::new(relation.target_table.as_str())
            .where_in(relation.target_key.as_str(), keys)
            .to_sql();
        let output = self.executor.execute(&stmt.sql, &stmt.params).await?;
        let related = output.rows.into_iter().map(record_to_external);

        match relation.kind {
            RelationKind::BelongsTo | RelationKind::HasOne => {
                let mut lookup: HashMap<LookupKey, Record> = HashMap::new();
                for row in related {
                    if let Some(key) = row.get(&relation.target_key).and_then(LookupKey::of) {
                        lookup.entry(key).or_insert(row);
                    }
                }
                for record in records.iter_mut() {
                    let value = record
                        .get(&relation.local_key)
                        .and_then(LookupKey::of)
                        .and_then(|key| lookup.get(&key).cloned())
                        .map(Value::Record)
                        .unwrap_or(Value::Null);
                    record.insert(name, value);
                }
            }
            RelationKind::HasMany => {
                let mut lookup: HashMap<LookupKey, Vec<Record>> = HashMap::new();
                for row in related {
                    if let Some(key) = row.get(&relation.target_key).and_then(LookupKey::of) {
                        lookup.entry(key).or_default().push(row);
                    }
                }
                for record in records.iter_mut() {
                    let children = record
                        .get(&relation.local_key)
                        .and_then(LookupKey::of)
                        .and_then(|key| lookup.get(&key).cloned())
                        .unwrap_or_default();
                    record.insert(name, Value::Records(children));
                }
            }
        }
        Ok(())
    }
}

/// Distinct non-null values of `field`, in first-seen order
fn distinct_keys(records: &[Record], field: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|record| record.get(field))
        .filter(|value| LookupKey::of(value).is_some_and(|key| seen.insert(key)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::QueryOutput;
    use crate::memory::MemoryGateway;
    use quarry_core::record;

    fn registry() -> RelationRegistry {
        RelationRegistry::builder()
            .belongs_to("author", "users", "authorId")
            .has_many("comments", "comments", "postId")
            .has_one("stats", "post_stats", "postId")
            .build()
            .unwrap()
    }

    fn posts() -> Vec<Record> {
        vec![
            record! { "id" => 1, "authorId" => 10 },
            record! { "id" => 2, "authorId" => 10 },
            record! { "id" => 3, "authorId" => 11 },
        ]
    }

    #[test]
    fn test_registry_rejects_duplicates_and_empty_names() {
        let duplicate = RelationRegistry::builder()
            .belongs_to("author", "users", "authorId")
            .belongs_to("author", "users", "editorId")
            .build();
        assert!(matches!(duplicate, Err(DataError::Relation(_))));

        let unnamed = RelationRegistry::builder()
            .has_many(" ", "comments", "postId")
            .build();
        assert!(matches!(unnamed, Err(DataError::Relation(_))));
    }

    #[test]
    fn test_default_keys() {
        let belongs = Relation::belongs_to("users", "authorId");
        assert_eq!((belongs.local_key.as_str(), belongs.target_key.as_str()), ("authorId", "id"));

        let has_one = Relation::has_one("profiles", "userId").with_local_key("uuid");
        assert_eq!(has_one.kind, RelationKind::HasOne);
        assert_eq!((has_one.local_key.as_str(), has_one.target_key.as_str()), ("uuid", "userId"));
    }

    #[tokio::test]
    async fn test_belongs_to_uses_one_query_with_distinct_keys() {
        let gateway = MemoryGateway::with_responder(|_, _| {
            Ok(QueryOutput::rows(vec![
                record! { "id" => 10, "display_name" => "Ada" },
                record! { "id" => 11, "display_name" => "Grace" },
            ]))
        });
        let resolver = RelationResolver::new(Arc::new(gateway.clone()));
        let mut records = posts();

        resolver
            .resolve(&mut records, &registry(), &["author".to_string()])
            .await
            .unwrap();

        let statements = gateway.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].sql,
            r#"SELECT * FROM "users" WHERE "id" IN ($1, $2)"#
        );
        assert_eq!(statements[0].params, vec![Value::Int(10), Value::Int(11)]);

        let author = records[1].get("author").and_then(Value::as_record).unwrap();
        assert_eq!(author.get("displayName"), Some(&Value::from("Ada")));
        let author = records[2].get("author").and_then(Value::as_record).unwrap();
        assert_eq!(author.get("displayName"), Some(&Value::from("Grace")));
    }

    #[tokio::test]
    async fn test_uuid_keys_bind_natively_and_match() {
        let team = uuid::Uuid::from_u128(0x2a);
        let gateway = MemoryGateway::with_responder(move |_, _| {
            Ok(QueryOutput::rows(vec![record! { "id" => team, "name" => "core" }]))
        });
        let registry = RelationRegistry::builder()
            .belongs_to("team", "teams", "teamId")
            .build()
            .unwrap();
        let resolver = RelationResolver::new(Arc::new(gateway.clone()));
        let mut records = vec![
            record! { "id" => 1, "teamId" => team },
            record! { "id" => 2, "teamId" => team.to_string() },
        ];

        resolver
            .resolve(&mut records, &registry, &["team".to_string()])
            .await
            .unwrap();

        let statements = gateway.statements();
        assert_eq!(statements[0].params[0], Value::Uuid(team));
        for record in &records {
            let joined = record.get("team").and_then(Value::as_record).unwrap();
            assert_eq!(joined.get("name"), Some(&Value::from("core")));
        }
    }

    #[tokio::test]
    async fn test_query_count_does_not_grow_with_input() {
        let gateway = MemoryGateway::new();
        let resolver = RelationResolver::new(Arc::new(gateway.clone()));
        let mut records: Vec<Record> = (0..2000)
            .map(|i| record! { "id" => i, "authorId" => i % 7 })
            .collect();

        resolver
            .resolve(&mut records, &registry(), &["author".to_string()])
            .await
            .unwrap();

        assert_eq!(gateway.statements().len(), 1);
        assert_eq!(gateway.statements()[0].params.len(), 7);
        assert!(records.iter().all(|r| r.get("author") == Some(&Value::Null)));
    }

    #[tokio::test]
    async fn test_all_null_foreign_keys_skip_the_query() {
        let gateway = MemoryGateway::new();
        let resolver = RelationResolver::new(Arc::new(gateway.clone()));
        let mut records = vec![
            record! { "id" => 1, "authorId" => Value::Null },
            record! { "id" => 2 },
        ];

        resolver
            .resolve(&mut records, &registry(), &["author".to_string()])
            .await
            .unwrap();

        assert!(gateway.statements().is_empty());
        assert!(records.iter().all(|r| r.get("author") == Some(&Value::Null)));
    }

    #[tokio::test]
    async fn test_has_many_groups_children_and_defaults_to_empty() {
        let gateway = MemoryGateway::with_responder(|_, _| {
            Ok(QueryOutput::rows(vec![
                record! { "id" => 100, "post_id" => 1 },
                record! { "id" => 101, "post_id" => 1 },
                record! { "id" => 102, "post_id" => 3 },
            ]))
        });
        let resolver = RelationResolver::new(Arc::new(gateway.clone()));
        let mut records = posts();

        resolver
            .resolve(&mut records, &registry(), &["comments".to_string()])
            .await
            .unwrap();

        assert_eq!(
            gateway.statements()[0].sql,
            r#"SELECT * FROM "comments" WHERE "post_id" IN ($1, $2, $3)"#
        );
        let counts: Vec<usize> = records
            .iter()
            .map(|r| r.get("comments").and_then(Value::as_records).unwrap().len())
            .collect();
        assert_eq!(counts, vec![2, 0, 1]);
        let first = &records[0].get("comments").and_then(Value::as_records).unwrap()[0];
        assert_eq!(first.get("id"), Some(&Value::Int(100)));
    }

    #[tokio::test]
    async fn test_has_one_first_occurrence_wins() {
        let gateway = MemoryGateway::with_responder(|_, _| {
            Ok(QueryOutput::rows(vec![
                record! { "id" => 1, "post_id" => 2, "views" => 5 },
                record! { "id" => 2, "post_id" => 2, "views" => 9 },
            ]))
        });
        let resolver = RelationResolver::new(Arc::new(gateway));
        let mut records = posts();

        resolver
            .resolve(&mut records, &registry(), &["stats".to_string()])
            .await
            .unwrap();

        assert_eq!(records[0].get("stats"), Some(&Value::Null));
        let stats = records[1].get("stats").and_then(Value::as_record).unwrap();
        assert_eq!(stats.get("views"), Some(&Value::Int(5)));
    }

    #[tokio::test]
    async fn test_unknown_names_are_skipped_in_order() {
        let gateway = MemoryGateway::new();
        let resolver = RelationResolver::new(Arc::new(gateway.clone()));
        let mut records = posts();

        resolver
            .resolve(
                &mut records,
                &registry(),
                &["comments".to_string(), "tags".to_string(), "author".to_string()],
            )
            .await
            .unwrap();

        let log = gateway.sql_log();
        assert_eq!(log.len(), 2);
        assert!(log[0].contains(r#"FROM "comments""#));
        assert!(log[1].contains(r#"FROM "users""#));
        assert!(!records[0].contains("tags"));
    }

    #[tokio::test]
    async fn test_empty_input_issues_nothing() {
        let gateway = MemoryGateway::new();
        let resolver = RelationResolver::new(Arc::new(gateway.clone()));
        let mut records: Vec<Record> = vec![];

        resolver
            .resolve(&mut records, &registry(), &["author".to_string()])
            .await
            .unwrap();
        assert!(gateway.statements().is_empty());
    }
}
