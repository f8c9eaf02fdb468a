//! Image-turn detection and prompt derivation.
//!
//! A documented, literal rule set rather than a classifier: command prefixes
//! force image mode; otherwise the latest user text must pair an image noun
//! with an action verb. Known false positives ("make a picture of your
//! reasoning") are accepted. A turn whose input already carries an image
//! attachment is never an image turn — that is vision input.

use chatrelay_core::provider::{ContentPart, Role, TurnInput};

const COMMAND_PREFIXES: &[&str] = &["!image", "image:"];

const IMAGE_NOUNS: &[&str] = &[
    "image",
    "picture",
    "photo",
    "photograph",
    "drawing",
    "illustration",
    "painting",
    "sketch",
    "artwork",
    "art",
];

const ACTION_VERBS: &[&str] = &[
    "generate",
    "create",
    "draw",
    "make",
    "paint",
    "produce",
    "render",
    "sketch",
    "design",
    "show",
];

// Filler words between the action verb and the subject.
const ARTICLES: &[&str] = &["a", "an", "the", "me"];

/// Whether this turn should generate an image instead of text.
pub fn wants_image(input: &TurnInput) -> bool {
    if has_image_input(input) {
        return false;
    }
    let Some(text) = latest_user_text(input) else {
        return false;
    };
    command_prefix(&text).is_some() || keyword_match(&text)
}

/// The prompt sent to the image model.
pub fn image_prompt(input: &TurnInput) -> String {
    let Some(text) = latest_user_text(input) else {
        return String::new();
    };
    if let Some(stripped) = command_prefix(&text) {
        return stripped;
    }
    if keyword_match(&text) {
        return strip_action_phrase(&text);
    }
    text.trim().to_string()
}

fn has_image_input(input: &TurnInput) -> bool {
    input.messages.iter().any(|m| {
        m.content
            .iter()
            .any(|part| matches!(part, ContentPart::Image { .. }))
    })
}

fn latest_user_text(input: &TurnInput) -> Option<String> {
    input
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.plain_text())
        .filter(|t| !t.trim().is_empty())
}

/// `!image <prompt>` / `image: <prompt>` force image mode.
fn command_prefix(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    for prefix in COMMAND_PREFIXES {
        if lower.starts_with(prefix) {
            return Some(trimmed[prefix.len()..].trim().to_string());
        }
    }
    None
}

/// At least one image noun AND at least one action verb.
fn keyword_match(text: &str) -> bool {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .collect();
    let has_noun = words.iter().any(|w| IMAGE_NOUNS.contains(&w.as_str()));
    let has_verb = words.iter().any(|w| ACTION_VERBS.contains(&w.as_str()));
    has_noun && has_verb
}

/// Drop the leading action-verb phrase so "draw a cat in a hat" prompts
/// for "cat in a hat".
fn strip_action_phrase(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut idx = 0;

    if let Some(first) = words.first() {
        let cleaned = first
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if ACTION_VERBS.contains(&cleaned.as_str()) {
            idx = 1;
            while idx < words.len() && ARTICLES.contains(&words[idx].to_lowercase().as_str()) {
                idx += 1;
            }
        }
    }

    if idx == 0 || idx >= words.len() {
        return text.trim().to_string();
    }
    words[idx..].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::provider::PromptMessage;

    fn input_with_text(text: &str) -> TurnInput {
        TurnInput {
            messages: vec![
                PromptMessage::text(Role::System, "Be helpful."),
                PromptMessage::text(Role::User, text),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn keyword_match_selects_image_mode() {
        let input = input_with_text("draw a cat in a hat");
        assert!(wants_image(&input));
        assert_eq!(image_prompt(&input), "cat in a hat");
    }

    #[test]
    fn command_prefix_forces_image_mode() {
        let input = input_with_text("!image a red fox");
        assert!(wants_image(&input));
        assert_eq!(image_prompt(&input), "a red fox");

        let input = input_with_text("image: a quiet harbor at dawn");
        assert!(wants_image(&input));
        assert_eq!(image_prompt(&input), "a quiet harbor at dawn");
    }

    #[test]
    fn plain_question_stays_text_mode() {
        assert!(!wants_image(&input_with_text("What's the capital of France?")));
        // Noun without a verb
        assert!(!wants_image(&input_with_text("that picture was nice")));
        // Verb without a noun
        assert!(!wants_image(&input_with_text("make me a sandwich")));
    }

    #[test]
    fn attached_image_suppresses_image_mode() {
        let mut input = input_with_text("draw a picture like this one");
        input.messages.push(PromptMessage {
            role: Role::User,
            content: vec![
                ContentPart::text("draw a picture like this one"),
                ContentPart::image("https://cdn/x.png"),
            ],
        });
        assert!(!wants_image(&input));
    }

    #[test]
    fn verb_phrase_stripping_keeps_casing() {
        let input = input_with_text("Generate an Impressionist painting of Paris");
        assert!(wants_image(&input));
        assert_eq!(image_prompt(&input), "Impressionist painting of Paris");
    }

    #[test]
    fn stripping_never_empties_the_prompt() {
        // The whole text is verb + article + noun; stripping stops short of
        // dropping everything meaningful.
        let input = input_with_text("draw a picture");
        assert!(wants_image(&input));
        assert_eq!(image_prompt(&input), "picture");
    }

    #[test]
    fn prefix_match_is_case_insensitive() {
        let input = input_with_text("!IMAGE neon city skyline");
        assert!(wants_image(&input));
        assert_eq!(image_prompt(&input), "neon city skyline");
    }
}
