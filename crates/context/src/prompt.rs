//! Grounded prompt assembly

use kbqa_common::llm::ChatMessage;
use kbqa_search::RetrievedPassage;

/// Reply the model is told to give when the context has no answer
pub const NOT_FOUND_MESSAGE: &str = "Sorry, I couldn't find that information.";

/// Role and scope of the assistant
pub const SYSTEM_INSTRUCTION: &str = "You are the company's AI assistant. \
Answer the question using only the given context.";

/// Separator between passages in the context block
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Passage texts joined into one context block, in retrieval order
pub fn format_context(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| p.text())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// System message with instruction, fallback and context, then the question.
pub fn build_messages(question: &str, passages: &[RetrievedPassage]) -> Vec<ChatMessage> {
    let system = format!(
        "{}\nIf the context does not contain the relevant information, answer \"{}\".\n\nContext: {}",
        SYSTEM_INSTRUCTION,
        NOT_FOUND_MESSAGE,
        format_context(passages)
    );

    vec![ChatMessage::system(system), ChatMessage::user(question)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbqa_common::llm::Role;
    use kbqa_ingestion::Passage;

    fn retrieved(ordinal: usize, text: &str) -> RetrievedPassage {
        RetrievedPassage {
            passage: Passage {
                text: text.to_string(),
                ordinal,
                source: "knowledge.md".to_string(),
                start: 0,
                end: text.len(),
            },
            score: 0.5,
        }
    }

    #[test]
    fn test_messages_are_system_then_user() {
        let passages = vec![
            retrieved(2, "Refunds are accepted within 30 days."),
            retrieved(0, "Returns require a receipt."),
        ];
        let messages = build_messages("What is the refund period?", &passages);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "What is the refund period?");

        let system = &messages[0].content;
        assert!(system.starts_with(SYSTEM_INSTRUCTION));
        assert!(system.contains(NOT_FOUND_MESSAGE));
        assert!(system.ends_with(
            "Context: Refunds are accepted within 30 days.\n\nReturns require a receipt."
        ));
    }

    #[test]
    fn test_empty_context() {
        let messages = build_messages("Anything?", &[]);
        assert!(messages[0].content.ends_with("Context: "));
        assert_eq!(format_context(&[]), "");
    }
}
