//! Canned fallback replies for when response generation fails.

const PORTUGUESE_ACCENTS: &[char] = &['ã', 'õ', 'ç', 'á', 'é', 'ê', 'í', 'ó', 'ú'];

const PORTUGUESE_WORDS: &[&str] = &["olá", "oi", "obrigado", "obrigada"];

const PORTUGUESE_PHRASES: &[&str] = &["bom dia", "boa tarde", "boa noite", "tudo bem"];

pub const FALLBACK_PT: &str = "Olá! Como posso ajudar?";
pub const FALLBACK_EN: &str = "Hello! How can I help?";

/// Heuristic, not a language detector: accented Portuguese characters or a
/// common greeting word are enough to pick the Portuguese reply.
fn looks_portuguese(text: &str) -> bool {
    let lower = text.to_lowercase();
    if lower.chars().any(|c| PORTUGUESE_ACCENTS.contains(&c)) {
        return true;
    }
    if PORTUGUESE_PHRASES.iter().any(|p| lower.contains(p)) {
        return true;
    }
    lower
        .split(|c: char| !c.is_alphanumeric() && !PORTUGUESE_ACCENTS.contains(&c))
        .any(|word| PORTUGUESE_WORDS.contains(&word))
}

/// Fixed greeting in the language the message appears to be in.
pub fn fallback_reply(text: &str) -> &'static str {
    if looks_portuguese(text) {
        FALLBACK_PT
    } else {
        FALLBACK_EN
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accented_text_gets_portuguese() {
        assert_eq!(fallback_reply("preciso de ajuda com a configuração"), FALLBACK_PT);
    }

    #[test]
    fn greeting_words_get_portuguese() {
        assert_eq!(fallback_reply("bom dia pessoal"), FALLBACK_PT);
        assert_eq!(fallback_reply("Oi, alguem ai?"), FALLBACK_PT);
    }

    #[test]
    fn oi_must_be_a_whole_word() {
        assert_eq!(fallback_reply("how are you doing"), FALLBACK_EN);
    }

    #[test]
    fn plain_english_gets_english() {
        assert_eq!(fallback_reply("can you help me with billing"), FALLBACK_EN);
    }
}
