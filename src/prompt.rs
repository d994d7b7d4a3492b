//! Prompt construction for consistency evaluation requests.

use std::collections::BTreeMap;

use crate::types::SentenceItem;

/// Citation excerpts beyond this many chars are elided in the prompt.
const CITATION_EXCERPT_CHARS: usize = 500;

/// Render one evaluation request for a set of sentences sharing a rank,
/// together with the source passages they cite.
pub fn render_evaluation_prompt(
    rank: u32,
    items: &[SentenceItem],
    citations: &BTreeMap<u32, String>,
) -> String {
    let citation_block = citations
        .iter()
        .map(|(number, text)| format!("Citation {number}: {}", excerpt(text)))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut sentence_block = String::new();
    for (index, item) in items.iter().enumerate() {
        let numbers = item
            .citation_numbers
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        sentence_block.push_str(&format!(
            "{}. Annotated sentence: {}\n   Cited citation numbers: [{}]\n",
            index + 1,
            item.topic,
            numbers
        ));
    }

    format!(
        r#"You are a rigorous fact-checking analyst. For search result rank {rank},
evaluate whether each annotated sentence below is factually supported by the
citation passages it references.

Citation passages:

{citation_block}

Annotated sentences to evaluate:

{sentence_block}
For EVERY sentence above, compare it only against the passages it cites and
judge factual consistency. A sentence is consistent when the cited passages
support its claims; it is inconsistent when they contradict it, do not mention
its claims, or are missing.

Respond with ONLY a JSON array, one object per sentence, in this exact shape:

[
  {{
    "topic": "<the annotated sentence, verbatim>",
    "citation_topic": "<short summary of what the cited passages say>",
    "consistency": "consistent" or "inconsistent",
    "reason": "<concise justification>",
    "qualitative_analysis": "<one-line quality note>",
    "rank": {rank},
    "citation_numbers": [<the cited numbers>]
  }}
]

Do not wrap the array in markdown fences and do not add any text before or
after it."#
    )
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= CITATION_EXCERPT_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(CITATION_EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(topic: &str, numbers: Vec<u32>) -> SentenceItem {
        SentenceItem {
            rank: 4,
            topic: topic.to_string(),
            citation_numbers: numbers,
        }
    }

    #[test]
    fn prompt_contains_every_sentence_and_citation() {
        let mut citations = BTreeMap::new();
        citations.insert(1, "passage one".to_string());
        citations.insert(3, "passage three".to_string());
        let items = vec![item("first claim", vec![1]), item("second claim", vec![1, 3])];

        let prompt = render_evaluation_prompt(4, &items, &citations);
        assert!(prompt.contains("rank 4"));
        assert!(prompt.contains("Citation 1: passage one"));
        assert!(prompt.contains("Citation 3: passage three"));
        assert!(prompt.contains("1. Annotated sentence: first claim"));
        assert!(prompt.contains("2. Annotated sentence: second claim"));
        assert!(prompt.contains("[1, 3]"));
    }

    #[test]
    fn long_citations_are_excerpted() {
        let mut citations = BTreeMap::new();
        citations.insert(1, "x".repeat(2000));
        let items = vec![item("claim", vec![1])];

        let prompt = render_evaluation_prompt(1, &items, &citations);
        assert!(prompt.contains(&format!("{}...", "x".repeat(500))));
        assert!(!prompt.contains(&"x".repeat(501)));
    }

    #[test]
    fn prompt_states_the_output_contract() {
        let prompt = render_evaluation_prompt(1, &[item("c", vec![1])], &BTreeMap::new());
        for field in ["topic", "citation_topic", "consistency", "reason", "citation_numbers"] {
            assert!(prompt.contains(field), "missing field {field}");
        }
        assert!(prompt.contains("JSON array"));
    }
}
