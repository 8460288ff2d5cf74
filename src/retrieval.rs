//! Schema context retrieval
//!
//! The retriever seam: given a question, return the most relevant schema
//! snippets for grounding SQL generation. The in-process implementation
//! ranks catalog snippets by keyword overlap; an embedding-backed service
//! can slot in behind the same trait.

use crate::catalog::{SchemaCatalog, SchemaSnippet};
use crate::error::AppError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Words too common to signal relevance
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "of", "in", "on", "for", "to", "and", "or", "is", "are", "was", "were",
        "do", "does", "did", "how", "what", "which", "who", "show", "me", "all", "many", "much",
        "per", "by", "with", "from", "give", "list", "number", "each",
    ]
    .into_iter()
    .collect()
});

/// External collaborator contract: rank schema snippets for a question
#[async_trait]
pub trait SchemaRetriever: Send + Sync {
    async fn retrieve(&self, question: &str) -> Result<Vec<SchemaSnippet>, AppError>;
}

/// Lowercased, lightly-stemmed terms ("products" and "product" unify)
fn terms_of(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_end_matches('s').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Keyword-overlap retriever over an in-memory snippet catalog
pub struct KeywordRetriever {
    entries: Vec<(SchemaSnippet, HashSet<String>)>,
    top_k: usize,
}

impl KeywordRetriever {
    pub fn new(catalog: &SchemaCatalog, top_k: usize) -> Self {
        let entries = catalog
            .snippets
            .iter()
            .map(|snippet| {
                let term_set: HashSet<String> = terms_of(&snippet.text).into_iter().collect();
                (snippet.clone(), term_set)
            })
            .collect();
        Self {
            entries,
            top_k: top_k.max(1),
        }
    }
}

#[async_trait]
impl SchemaRetriever for KeywordRetriever {
    async fn retrieve(&self, question: &str) -> Result<Vec<SchemaSnippet>, AppError> {
        let question_terms: Vec<String> = terms_of(question)
            .into_iter()
            .filter(|t| !STOPWORDS.contains(t.as_str()))
            .collect();
        if question_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, &SchemaSnippet)> = self
            .entries
            .iter()
            .map(|(snippet, term_set)| {
                let score = question_terms
                    .iter()
                    .filter(|term| term_set.contains(term.as_str()))
                    .count();
                (score, snippet)
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        // stable sort keeps catalog order for ties (tables before relations)
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(self.top_k)
            .map(|(_, snippet)| snippet.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnInfo, RelationInfo, SchemaCatalog, TableInfo};

    fn catalog() -> SchemaCatalog {
        let tables = vec![
            TableInfo {
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
            },
            TableInfo {
                schema: "public".to_string(),
                name: "suppliers".to_string(),
                columns: vec![ColumnInfo {
                    name: "city".to_string(),
                    data_type: "text".to_string(),
                    nullable: true,
                }],
            },
        ];
        let relations = vec![RelationInfo {
            source_table: "sales".to_string(),
            source_column: "product_id".to_string(),
            referenced_table: "products".to_string(),
            referenced_column: "id".to_string(),
        }];
        SchemaCatalog::from_parts(&tables, &relations)
    }

    #[tokio::test]
    async fn test_ranks_matching_table_first() {
        let retriever = KeywordRetriever::new(&catalog(), 5);
        let results = retriever
            .retrieve("How many products per category?")
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].id, "table:products");
    }

    #[tokio::test]
    async fn test_respects_top_k() {
        let retriever = KeywordRetriever::new(&catalog(), 1);
        let results = retriever
            .retrieve("products sold by suppliers")
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_unrelated_question_yields_nothing() {
        let retriever = KeywordRetriever::new(&catalog(), 5);
        let results = retriever
            .retrieve("weather tomorrow in berlin?")
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_relation_snippets_are_retrievable() {
        let retriever = KeywordRetriever::new(&catalog(), 5);
        let results = retriever
            .retrieve("sales totals for each product")
            .await
            .unwrap();
        assert!(results.iter().any(|s| s.id.starts_with("relation:")));
    }
}
