//! Multi-query expansion.
//!
//! A [`QueryExpansionChain`] asks an external model for alternative
//! phrasings; the [`QueryExpander`] wraps it so that expansion can never fail
//! a request: on any chain error it logs and falls back to the original query.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::document::QueryVariant;
use crate::error::{Result, RetrievalError};

/// Alternative phrasings requested unless configured otherwise.
pub const DEFAULT_MAX_ALTERNATIVES: usize = 3;

/// Instruction template for the expansion model. `{n}` and `{question}` are substituted.
pub const EXPANSION_TEMPLATE: &str = "You are an AI research assistant for a scientific \
literature search engine. Your task is to generate {n} different versions of the user \
question to retrieve relevant passages from a vector database. By generating multiple \
perspectives on the question, you help the user overcome some of the limitations of \
distance-based similarity search. Write every version in the language the question is \
predominantly written in. Respond with ONLY a JSON array of strings, no explanation.\n\n\
Original question: {question}";

/// A text-completion model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Return the model's completion of `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Produces alternative phrasings of a query.
#[async_trait]
pub trait QueryExpansionChain: Send + Sync {
    /// Return alternative phrasings of `query`, not including `query` itself.
    async fn invoke(&self, query: &str) -> Result<Vec<String>>;
}

/// A [`QueryExpansionChain`] that prompts a [`LanguageModel`] with [`EXPANSION_TEMPLATE`].
#[derive(Clone)]
pub struct LlmExpansionChain {
    model: Arc<dyn LanguageModel>,
    max_alternatives: usize,
}

impl LlmExpansionChain {
    /// Create a chain requesting [`DEFAULT_MAX_ALTERNATIVES`] phrasings.
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model, max_alternatives: DEFAULT_MAX_ALTERNATIVES }
    }

    /// Set how many phrasings to request and keep.
    pub fn with_max_alternatives(mut self, n: usize) -> Self {
        self.max_alternatives = n;
        self
    }

    /// Render the prompt for `query`.
    pub fn prompt(&self, query: &str) -> String {
        EXPANSION_TEMPLATE
            .replace("{n}", &self.max_alternatives.to_string())
            .replace("{question}", query)
    }
}

#[async_trait]
impl QueryExpansionChain for LlmExpansionChain {
    async fn invoke(&self, query: &str) -> Result<Vec<String>> {
        let completion = self
            .model
            .complete(&self.prompt(query))
            .await
            .map_err(|e| RetrievalError::QueryExpansion(e.to_string()))?;
        let mut alternatives = parse_alternatives(&completion);
        alternatives.truncate(self.max_alternatives);
        Ok(alternatives)
    }
}

/// Parse a model answer into phrasings.
///
/// Accepts a JSON array of strings anywhere in the answer; otherwise one
/// phrasing per non-blank line with list markers stripped.
pub fn parse_alternatives(completion: &str) -> Vec<String> {
    if let (Some(start), Some(end)) = (completion.find('['), completion.rfind(']')) {
        if start < end {
            if let Ok(items) = serde_json::from_str::<Vec<String>>(&completion[start..=end]) {
                return items
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }
    }

    completion
        .lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
    }
    line.trim_matches('"').trim()
}

/// Expands a query into [`QueryVariant`]s without ever failing.
#[derive(Clone)]
pub struct QueryExpander {
    chain: Arc<dyn QueryExpansionChain>,
    max_alternatives: usize,
}

impl QueryExpander {
    /// Wrap `chain`, keeping at most [`DEFAULT_MAX_ALTERNATIVES`] phrasings.
    pub fn new(chain: Arc<dyn QueryExpansionChain>) -> Self {
        Self { chain, max_alternatives: DEFAULT_MAX_ALTERNATIVES }
    }

    /// Set how many alternatives to keep.
    pub fn with_max_alternatives(mut self, n: usize) -> Self {
        self.max_alternatives = n;
        self
    }

    /// Return the alternatives followed by the original query.
    ///
    /// Alternatives that repeat the original or each other (ignoring case and
    /// surrounding whitespace) are dropped. If the chain fails, the failure is
    /// logged and only the original query is returned.
    pub async fn expand(&self, query: &str) -> Vec<QueryVariant> {
        let alternatives = match self.chain.invoke(query).await {
            Ok(alternatives) => alternatives,
            Err(e) => {
                warn!(query, error = %e, "query expansion failed, using original query only");
                Vec::new()
            }
        };

        let mut seen: HashSet<String> = HashSet::from([normalize(query)]);
        let mut variants: Vec<QueryVariant> = alternatives
            .into_iter()
            .filter(|alt| !alt.trim().is_empty() && seen.insert(normalize(alt)))
            .take(self.max_alternatives)
            .map(|alt| QueryVariant::alternative(alt.trim()))
            .collect();
        variants.push(QueryVariant::original(query));

        debug!(query, variant_count = variants.len(), "expanded query");
        variants
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct CannedModel {
        answer: Result<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedModel {
        fn answering(answer: &str) -> Self {
            Self { answer: Ok(answer.to_string()), prompts: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.answer {
                Ok(answer) => Ok(answer.clone()),
                Err(e) => Err(RetrievalError::QueryExpansion(e.to_string())),
            }
        }
    }

    struct FailingChain;

    #[async_trait]
    impl QueryExpansionChain for FailingChain {
        async fn invoke(&self, _query: &str) -> Result<Vec<String>> {
            Err(RetrievalError::QueryExpansion("model timed out".into()))
        }
    }

    #[test]
    fn parses_json_array_inside_prose() {
        let parsed = parse_alternatives(
            r#"Sure! Here you go:
["graphene electron mobility", " ", "carrier mobility in graphene"]"#,
        );
        assert_eq!(parsed, ["graphene electron mobility", "carrier mobility in graphene"]);
    }

    #[test]
    fn parses_numbered_lines() {
        let parsed =
            parse_alternatives("1. first phrasing\n\n2) second phrasing\n- third phrasing\n");
        assert_eq!(parsed, ["first phrasing", "second phrasing", "third phrasing"]);
    }

    #[tokio::test]
    async fn chain_renders_template_and_truncates() {
        let model = Arc::new(CannedModel::answering(r#"["a", "b", "c", "d"]"#));
        let chain = LlmExpansionChain::new(model.clone());

        let alternatives = chain.invoke("How stable are perovskite cells?").await.unwrap();
        assert_eq!(alternatives, ["a", "b", "c"]);

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("generate 3 different versions"));
        assert!(prompts[0].ends_with("Original question: How stable are perovskite cells?"));
    }

    #[tokio::test]
    async fn original_query_is_appended_last() {
        let model = Arc::new(CannedModel::answering(
            r#"["perovskite degradation", "Perovskite Stability ", "perovskite degradation"]"#,
        ));
        let expander = QueryExpander::new(Arc::new(LlmExpansionChain::new(model)));

        let variants = expander.expand("perovskite stability").await;
        assert_eq!(
            variants,
            vec![
                QueryVariant::alternative("perovskite degradation"),
                QueryVariant::original("perovskite stability"),
            ]
        );
    }

    #[tokio::test]
    async fn chain_failure_degrades_to_original() {
        let expander = QueryExpander::new(Arc::new(FailingChain));
        let variants = expander.expand("q").await;
        assert_eq!(variants, vec![QueryVariant::original("q")]);
    }

    #[tokio::test]
    async fn model_failure_surfaces_as_expansion_error() {
        let model = Arc::new(CannedModel {
            answer: Err(RetrievalError::Config("unused".into())),
            prompts: Mutex::new(Vec::new()),
        });
        let err = LlmExpansionChain::new(model).invoke("q").await.unwrap_err();
        assert!(matches!(err, RetrievalError::QueryExpansion(_)));
    }
}
