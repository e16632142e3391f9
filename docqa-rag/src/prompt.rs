//! Prompt construction for retrieval-augmented answers

use docqa_retriever::ConfigError;

pub const CONTEXT_PLACEHOLDER: &str = "{context}";
pub const QUESTION_PLACEHOLDER: &str = "{question}";

/// Default template. It keeps the model to the supplied context and tells it
/// to admit when the answer is not there.
pub const RAG_PROMPT_TEMPLATE: &str = "Use the following context to answer the user's question.
If you don't know the answer, honestly say that you don't know; do not make up an answer.
Keep the answer concise and grounded in the provided context.

Context:
{context}

Question: {question}

Answer:";

/// A template with `{context}` and `{question}` slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: RAG_PROMPT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, ConfigError> {
        let template = template.into();
        for placeholder in [CONTEXT_PLACEHOLDER, QUESTION_PLACEHOLDER] {
            if !template.contains(placeholder) {
                return Err(ConfigError::new(
                    "prompt_template",
                    format!("template must contain {placeholder}"),
                ));
            }
        }
        Ok(Self { template })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Fill both slots in one left-to-right pass.
    ///
    /// Substituted text is never scanned again, so a document that happens to
    /// contain `{question}` is passed through literally.
    pub fn render(&self, context: &str, question: &str) -> String {
        let mut output =
            String::with_capacity(self.template.len() + context.len() + question.len());
        let mut rest = self.template.as_str();

        while let Some(pos) = rest.find('{') {
            output.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix(CONTEXT_PLACEHOLDER) {
                output.push_str(context);
                rest = after;
            } else if let Some(after) = tail.strip_prefix(QUESTION_PLACEHOLDER) {
                output.push_str(question);
                rest = after;
            } else {
                output.push('{');
                rest = &tail[1..];
            }
        }
        output.push_str(rest);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_renders_both_slots() {
        let prompt = PromptTemplate::default().render("Wind is variable.", "Is wind steady?");

        assert!(prompt.starts_with("Use the following context to answer the user's question.\n"));
        assert!(prompt.contains(
            "If you don't know the answer, honestly say that you don't know; do not make up an answer."
        ));
        assert!(prompt.contains("Context:\nWind is variable.\n\nQuestion: Is wind steady?\n\nAnswer:"));
    }

    #[test]
    fn test_placeholders_in_context_are_not_resubstituted() {
        let template = PromptTemplate::new("[{context}] [{question}]").unwrap();
        let prompt = template.render("see {question} and {context}", "why?");
        assert_eq!(prompt, "[see {question} and {context}] [why?]");
    }

    #[test]
    fn test_other_braces_are_kept() {
        let template = PromptTemplate::new("{a} {context} {{question}} {").unwrap();
        assert_eq!(template.render("ctx", "q"), "{a} ctx {q} {");
    }

    #[test]
    fn test_template_requires_both_placeholders() {
        let err = PromptTemplate::new("Only {context}").unwrap_err();
        assert!(err.message.contains("{question}"));
        assert!(PromptTemplate::new("Only {question}").is_err());
    }
}
