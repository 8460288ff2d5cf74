//! Schema catalog
//!
//! Introspects the live database into human-readable schema snippets - one
//! per table, one per foreign-key relation - that ground SQL generation.
//! The live schema is the source of truth: the catalog is rebuilt from
//! `information_schema` at startup and fingerprinted so unchanged schemas
//! rebuild as a no-op.

use crate::error::AppError;
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// What a snippet describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnippetKind {
    Table,
    Relation,
}

/// One retrievable fragment of schema description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnippet {
    pub id: String,
    pub kind: SnippetKind,
    pub text: String,
}

/// Column facts needed to describe a table
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Table facts gathered from introspection
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// A foreign-key edge between two tables
#[derive(Debug, Clone)]
pub struct RelationInfo {
    pub source_table: String,
    pub source_column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// The full snippet catalog plus a fingerprint of the schema it was built from
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    pub snippets: Vec<SchemaSnippet>,
    pub checksum: String,
}

impl SchemaCatalog {
    /// Introspect the database and render the snippet catalog
    pub async fn build(pool: &Pool) -> Result<Self, AppError> {
        let client = pool.get().await?;

        let tables = introspect_tables(&client).await?;
        let relations = introspect_relations(&client).await?;

        let checksum = compute_checksum(&tables, &relations);
        let snippets = render_snippets(&tables, &relations);

        debug!(
            "Built schema catalog: {} tables, {} relations, checksum {}",
            tables.len(),
            relations.len(),
            &checksum[..12.min(checksum.len())]
        );

        Ok(Self { snippets, checksum })
    }

    /// Build a catalog from already-known tables and relations (tests, fixtures)
    #[allow(dead_code)]
    pub fn from_parts(tables: &[TableInfo], relations: &[RelationInfo]) -> Self {
        Self {
            checksum: compute_checksum(tables, relations),
            snippets: render_snippets(tables, relations),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }
}

async fn introspect_tables(
    client: &deadpool_postgres::Client,
) -> Result<Vec<TableInfo>, AppError> {
    let table_query = r#"
        SELECT t.table_schema, t.table_name
        FROM information_schema.tables t
        WHERE t.table_schema NOT IN ('pg_catalog', 'information_schema')
          AND t.table_type = 'BASE TABLE'
        ORDER BY t.table_schema, t.table_name
    "#;

    let column_query = r#"
        SELECT c.column_name, c.data_type, c.is_nullable
        FROM information_schema.columns c
        WHERE c.table_schema = $1 AND c.table_name = $2
        ORDER BY c.ordinal_position
    "#;

    let table_rows = client.query(table_query, &[]).await?;
    let mut tables = Vec::new();

    for row in table_rows {
        let schema: String = row.get("table_schema");
        let name: String = row.get("table_name");

        let column_rows = client.query(column_query, &[&schema, &name]).await?;
        let columns = column_rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                nullable: row.get::<_, String>("is_nullable") == "YES",
            })
            .collect();

        tables.push(TableInfo {
            schema,
            name,
            columns,
        });
    }

    Ok(tables)
}

async fn introspect_relations(
    client: &deadpool_postgres::Client,
) -> Result<Vec<RelationInfo>, AppError> {
    let query = r#"
        SELECT
            tc.table_name AS source_table,
            kcu.column_name AS source_column,
            ccu.table_name AS referenced_table,
            ccu.column_name AS referenced_column
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage ccu
            ON tc.constraint_name = ccu.constraint_name
            AND tc.table_schema = ccu.constraint_schema
        WHERE tc.constraint_type = 'FOREIGN KEY'
            AND tc.table_schema NOT IN ('pg_catalog', 'information_schema')
        ORDER BY tc.table_name, kcu.column_name
    "#;

    let rows = client.query(query, &[]).await?;

    Ok(rows
        .iter()
        .map(|row| RelationInfo {
            source_table: row.get("source_table"),
            source_column: row.get("source_column"),
            referenced_table: row.get("referenced_table"),
            referenced_column: row.get("referenced_column"),
        })
        .collect())
}

/// Render one descriptive snippet per table and per relation
fn render_snippets(tables: &[TableInfo], relations: &[RelationInfo]) -> Vec<SchemaSnippet> {
    let mut snippets = Vec::with_capacity(tables.len() + relations.len());

    for table in tables {
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                if c.nullable {
                    format!("{} ({}, nullable)", c.name, c.data_type)
                } else {
                    format!("{} ({})", c.name, c.data_type)
                }
            })
            .collect();

        snippets.push(SchemaSnippet {
            id: format!("table:{}", table.name),
            kind: SnippetKind::Table,
            text: format!(
                "Table {}: contains columns {}.",
                table.name,
                columns.join(", ")
            ),
        });
    }

    for relation in relations {
        snippets.push(SchemaSnippet {
            id: format!(
                "relation:{}.{}",
                relation.source_table, relation.source_column
            ),
            kind: SnippetKind::Relation,
            text: format!(
                "Relation: {}.{} refers to {}.{}.",
                relation.source_table,
                relation.source_column,
                relation.referenced_table,
                relation.referenced_column
            ),
        });
    }

    snippets
}

/// Fingerprint the schema content; sorted so the hash is order-independent
fn compute_checksum(tables: &[TableInfo], relations: &[RelationInfo]) -> String {
    let mut hasher = Sha256::new();

    let mut table_strs: Vec<String> = tables
        .iter()
        .map(|t| {
            let cols: Vec<String> = t
                .columns
                .iter()
                .map(|c| format!("{}:{}", c.name, c.data_type))
                .collect();
            format!("{}.{}({})", t.schema, t.name, cols.join(","))
        })
        .collect();
    table_strs.sort();
    for t in &table_strs {
        hasher.update(t.as_bytes());
    }

    let mut relation_strs: Vec<String> = relations
        .iter()
        .map(|r| {
            format!(
                "FK:{}.{}->{}.{}",
                r.source_table, r.source_column, r.referenced_table, r.referenced_column
            )
        })
        .collect();
    relation_strs.sort();
    for r in &relation_strs {
        hasher.update(r.as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tables() -> Vec<TableInfo> {
        vec![TableInfo {
            schema: "public".to_string(),
            name: "products".to_string(),
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    data_type: "integer".to_string(),
                    nullable: false,
                },
                ColumnInfo {
                    name: "category".to_string(),
                    data_type: "text".to_string(),
                    nullable: true,
                },
            ],
        }]
    }

    fn sample_relations() -> Vec<RelationInfo> {
        vec![RelationInfo {
            source_table: "sales".to_string(),
            source_column: "product_id".to_string(),
            referenced_table: "products".to_string(),
            referenced_column: "id".to_string(),
        }]
    }

    #[test]
    fn test_table_snippet_rendering() {
        let catalog = SchemaCatalog::from_parts(&sample_tables(), &[]);
        assert_eq!(catalog.snippets.len(), 1);
        assert_eq!(
            catalog.snippets[0].text,
            "Table products: contains columns id (integer), category (text, nullable)."
        );
        assert_eq!(catalog.snippets[0].kind, SnippetKind::Table);
    }

    #[test]
    fn test_relation_snippet_rendering() {
        let catalog = SchemaCatalog::from_parts(&[], &sample_relations());
        assert_eq!(catalog.snippets.len(), 1);
        assert_eq!(
            catalog.snippets[0].text,
            "Relation: sales.product_id refers to products.id."
        );
    }

    #[test]
    fn test_checksum_is_stable_and_order_independent() {
        let a = SchemaCatalog::from_parts(&sample_tables(), &sample_relations());
        let b = SchemaCatalog::from_parts(&sample_tables(), &sample_relations());
        assert_eq!(a.checksum, b.checksum);

        let mut two_tables = sample_tables();
        two_tables.push(TableInfo {
            schema: "public".to_string(),
            name: "suppliers".to_string(),
            columns: vec![],
        });
        let c = SchemaCatalog::from_parts(&two_tables, &sample_relations());
        assert_ne!(a.checksum, c.checksum);

        two_tables.reverse();
        let d = SchemaCatalog::from_parts(&two_tables, &sample_relations());
        assert_eq!(c.checksum, d.checksum);
    }
}
