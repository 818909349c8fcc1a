//! Self-query: deriving metadata constraints from a natural-language query.
//!
//! The [`SelfQueryParser`] shows a [`LanguageModel`] the filterable metadata
//! fields and asks for a JSON object with the residual search text and a list
//! of constraints:
//!
//! ```json
//! {"query": "thermal conductivity", "filter": [{"field": "year", "value": 2021}]}
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, RetrievalError};
use crate::expander::LanguageModel;
use crate::filter::{FieldConstraint, FieldValue};

/// A metadata field the model may constrain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeInfo {
    /// Field name as stored in chunk metadata.
    pub name: String,
    /// What the field holds, shown to the model.
    pub description: String,
    /// Value type shown to the model, e.g. `integer` or `string`.
    pub kind: String,
}

impl AttributeInfo {
    /// Describe a field.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self { name: name.into(), description: description.into(), kind: kind.into() }
    }

    /// The fields carried by every indexed chunk.
    pub fn literature_defaults() -> Vec<Self> {
        vec![
            Self::new("year", "The year the paper was published", "integer"),
            Self::new("doi", "The Digital Object Identifier of the paper", "string"),
            Self::new("title", "The title of the paper", "string"),
            Self::new("section", "The section of the paper the passage comes from", "string"),
        ]
    }
}

/// The output of a self-query: search text plus constraints, in model order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    /// Text to search for once the constraints are removed.
    pub query: String,
    /// Metadata constraints.
    pub constraints: Vec<FieldConstraint>,
}

#[derive(Deserialize)]
struct RawStructuredQuery {
    #[serde(default)]
    query: String,
    #[serde(default)]
    filter: Vec<RawConstraint>,
}

#[derive(Deserialize)]
struct RawConstraint {
    field: String,
    value: Value,
}

/// Turns a raw query into a [`StructuredQuery`] using a [`LanguageModel`].
#[derive(Clone)]
pub struct SelfQueryParser {
    model: Arc<dyn LanguageModel>,
    attributes: Vec<AttributeInfo>,
}

impl SelfQueryParser {
    /// Create a parser over the [default literature fields](AttributeInfo::literature_defaults).
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model, attributes: AttributeInfo::literature_defaults() }
    }

    /// Replace the filterable fields.
    pub fn with_attributes(mut self, attributes: Vec<AttributeInfo>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Render the prompt for `query`.
    pub fn prompt(&self, query: &str) -> String {
        let fields: String = self
            .attributes
            .iter()
            .map(|a| format!("- {} ({}): {}\n", a.name, a.kind, a.description))
            .collect();
        format!(
            "Rewrite the user question into a structured search request.\n\
             Extract constraints only on these metadata fields:\n{fields}\n\
             Answer with ONLY a JSON object of the form \
             {{\"query\": \"<text to search for>\", \
             \"filter\": [{{\"field\": \"<name>\", \"value\": <value>}}]}}. \
             Use an empty filter list when the question names no constraint.\n\n\
             User question: {query}"
        )
    }

    /// Ask the model for a structured version of `query`.
    ///
    /// Constraints on unknown fields are dropped. An empty residual query
    /// falls back to `query`.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::StructuredQuery`] if the model fails or its
    /// answer holds no parseable JSON object, and
    /// [`RetrievalError::InvalidFilter`] for unsupported constraint values.
    pub async fn parse(&self, query: &str) -> Result<StructuredQuery> {
        let completion = self
            .model
            .complete(&self.prompt(query))
            .await
            .map_err(|e| RetrievalError::StructuredQuery(format!("model call failed: {e}")))?;

        let raw = extract_object(&completion).ok_or_else(|| {
            RetrievalError::StructuredQuery(format!("no JSON object in model answer: {completion}"))
        })?;
        let raw: RawStructuredQuery = serde_json::from_str(raw)
            .map_err(|e| {
                RetrievalError::StructuredQuery(format!("malformed structured query: {e}"))
            })?;

        let mut constraints = Vec::with_capacity(raw.filter.len());
        for RawConstraint { field, value } in raw.filter {
            if !self.attributes.iter().any(|a| a.name == field) {
                warn!(field = %field, "dropping constraint on unknown field");
                continue;
            }
            constraints.push(FieldConstraint { field, value: FieldValue::try_from(&value)? });
        }

        let residual = raw.query.trim();
        let structured = StructuredQuery {
            query: if residual.is_empty() { query.to_string() } else { residual.to_string() },
            constraints,
        };
        debug!(
            query = %structured.query,
            constraint_count = structured.constraints.len(),
            "parsed structured query"
        );
        Ok(structured)
    }
}

fn extract_object(completion: &str) -> Option<&str> {
    let start = completion.find('{')?;
    let end = completion.rfind('}')?;
    (start < end).then(|| &completion[start..=end])
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct Canned(&'static str);

    #[async_trait]
    impl LanguageModel for Canned {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn parses_query_and_constraints_in_order() {
        let parser = SelfQueryParser::new(Arc::new(Canned(
            "```json\n{\"query\": \"thermal conductivity\", \"filter\": [\
             {\"field\": \"year\", \"value\": 2021}, \
             {\"field\": \"doi\", \"value\": \"10.1/x\"}]}\n```",
        )));

        let structured =
            parser.parse("thermal conductivity papers from 2021 in 10.1/x").await.unwrap();
        assert_eq!(structured.query, "thermal conductivity");
        assert_eq!(
            structured.constraints,
            vec![FieldConstraint::new("year", 2021), FieldConstraint::new("doi", "10.1/x")]
        );
    }

    #[tokio::test]
    async fn unknown_fields_are_dropped_and_empty_query_falls_back() {
        let parser = SelfQueryParser::new(Arc::new(Canned(
            r#"{"query": "", "filter": [{"field": "journal", "value": "Nature"}]}"#,
        )));
        let structured = parser.parse("papers in Nature").await.unwrap();
        assert_eq!(structured.query, "papers in Nature");
        assert!(structured.constraints.is_empty());
    }

    #[tokio::test]
    async fn unparseable_answer_is_an_error() {
        let parser = SelfQueryParser::new(Arc::new(Canned("I cannot help with that.")));
        let err = parser.parse("q").await.unwrap_err();
        assert!(matches!(err, RetrievalError::StructuredQuery(_)));
    }

    #[test]
    fn prompt_lists_fields() {
        let parser = SelfQueryParser::new(Arc::new(Canned("")))
            .with_attributes(vec![AttributeInfo::new("year", "Publication year", "integer")]);
        let prompt = parser.prompt("recent work");
        assert!(prompt.contains("- year (integer): Publication year"));
        assert!(prompt.ends_with("User question: recent work"));
    }
}
