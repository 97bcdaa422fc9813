use indoc::formatdoc;

use crate::index::Payload;

const ANSWER_MARKER: &str = "Answer:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Builds a plain two-message prompt: a fixed system instruction followed by
/// the user's input.
#[must_use]
pub fn build_prompt(input: &str) -> Vec<Message> {
    vec![
        Message::system("You are a helpful assistant. Answer clearly and concisely."),
        Message::user(input),
    ]
}

/// Builds a few-shot prompt classifying how many digits of a number are even.
///
/// The worked examples pin the model to a single-line reply of the form
/// `Answer: The number <N> consists of <count> even digits.`
#[must_use]
pub fn build_prompt_few_shot(number: &str) -> Vec<Message> {
    let instruction = formatdoc!(
        "You count the even digits of a number. Reply with a single line in exactly this format,
        spelling the count out in words:
        Answer: The number <number> consists of <count> even digits.

        Examples:
        Number: 2468
        Answer: The number 2468 consists of four even digits.
        Number: 1234
        Answer: The number 1234 consists of two even digits.
        Number: 86420
        Answer: The number 86420 consists of five even digits."
    );

    vec![
        Message::system(instruction),
        Message::user(format!("Number: {number}")),
    ]
}

/// Builds a grounded question-answering prompt from retrieved document
/// sections.
#[must_use]
pub fn build_context_prompt(question: &str, sources: &[Payload]) -> Vec<Message> {
    let extracts = sources
        .iter()
        .map(|source| {
            format!(
                "[{} — {}]({})\n{}",
                source.page_title, source.title, source.path, source.text
            )
        })
        .collect::<Vec<String>>()
        .join("\n\n");

    let instruction = formatdoc!(
        "Given the following extracts of a project's documents and a question, create a helpful answer based only on the extracts.
        If the extracts don't contain the answer, just answer that you don't know. Don't try to make up an answer.

        EXTRACTS:
        {extracts}"
    );

    vec![Message::system(instruction), Message::user(question)]
}

/// Returns the suffix of `text` starting at the **last** `Answer:` marker.
///
/// When the marker is absent the full text is returned unchanged.
#[must_use]
pub fn extract_answer(text: &str) -> &str {
    text.rfind(ANSWER_MARKER)
        .map_or(text, |position| &text[position..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_build_two_part_prompt() {
        // When
        let prompt = build_prompt("Hello!");

        // Then
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].role, Role::System);
        assert_eq!(prompt[1], Message::user("Hello!"));
    }

    #[test]
    fn should_place_examples_before_the_query() {
        // When
        let prompt = build_prompt_few_shot("11223344");

        // Then
        assert!(prompt.len() >= 2);
        assert_eq!(prompt[0].role, Role::System);
        assert!(prompt[0].content.contains("Answer: The number 2468"));

        let last = prompt.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.content.contains("11223344"));
    }

    #[test]
    fn should_serialize_roles_in_lowercase() {
        // When
        let serialized = serde_json::to_string(&Message::system("hi")).unwrap();

        // Then
        assert_eq!(serialized, r#"{"role":"system","content":"hi"}"#);
    }

    #[test]
    fn should_extract_from_the_last_marker() {
        // When
        let answer = extract_answer("Answer: draft.\nLet me redo that.\nAnswer: final.");

        // Then
        assert_eq!(answer, "Answer: final.");
    }

    #[test]
    fn should_return_text_without_marker_unchanged() {
        // When
        let answer = extract_answer("no marker here");

        // Then
        assert_eq!(answer, "no marker here");
    }

    #[test]
    fn should_embed_sources_into_context_prompt() {
        // Given
        let sources = vec![Payload {
            text: "The lazy dog naps.".to_owned(),
            path: "/animals/dogs".to_owned(),
            title: "Napping".to_owned(),
            page_title: "Dogs".to_owned(),
        }];

        // When
        let prompt = build_context_prompt("What does the dog do?", &sources);

        // Then
        assert_eq!(prompt.len(), 2);
        assert!(prompt[0].content.contains("The lazy dog naps."));
        assert!(prompt[0].content.contains("/animals/dogs"));
        assert_eq!(prompt[1], Message::user("What does the dog do?"));
    }
}
