//! Personality sliders → natural-language prompt directives.
//!
//! Each slider maps onto one of five graduated directives by band:
//! `[0,20) [20,40) [40,60) [60,80) [80,100]`. The router's system-prompt
//! builder calls into this module, so banding and wording cannot drift
//! between the config editor and the live response path.

use crate::schema::Personality;

const FORMALITY: [&str; 5] = [
    "Use casual, relaxed language with a friendly, informal register.",
    "Keep the language conversational and approachable, only lightly formal.",
    "Use a balanced register, neither stiff nor slangy.",
    "Lean professional: polite, measured phrasing with few colloquialisms.",
    "Maintain strictly formal, professional language at all times.",
];

const VERBOSITY: [&str; 5] = [
    "Answer in the fewest words possible, a sentence or two at most.",
    "Keep answers short and to the point.",
    "Give moderately detailed answers without padding.",
    "Explain thoroughly, including relevant context and examples.",
    "Be expansive: cover the topic in depth with full explanations.",
];

const CREATIVITY: [&str; 5] = [
    "Stick strictly to facts; avoid speculation or embellishment.",
    "Stay factual, allowing only the occasional illustrative comparison.",
    "Balance accuracy with some creative framing where it helps.",
    "Feel free to use analogies, metaphors, and novel angles.",
    "Be highly imaginative and original in how you present ideas.",
];

const EMPATHY: [&str; 5] = [
    "Stay neutral and task-focused; do not comment on feelings.",
    "Acknowledge the user briefly, then focus on the task.",
    "Show moderate warmth and acknowledge the user's situation.",
    "Be warm and supportive, responding to the user's emotional cues.",
    "Be deeply empathetic: prioritize the user's feelings in every reply.",
];

const HUMOR: [&str; 5] = [
    "Keep a completely serious tone; no jokes or wordplay.",
    "Stay mostly serious, with at most a light touch now and then.",
    "A bit of tasteful humor is welcome when it fits.",
    "Be playful: jokes and wit are encouraged where appropriate.",
    "Be very humorous; lean into wordplay and levity whenever possible.",
];

/// Which of the five bands a slider value falls into.
///
/// Callers are expected to have validated the value into [0,100]; values
/// above 100 land in the top band and negatives in the bottom one rather
/// than panicking, since prompt building must never fail.
fn band(value: i64) -> usize {
    match value {
        v if v < 20 => 0,
        v if v < 40 => 1,
        v if v < 60 => 2,
        v if v < 80 => 3,
        _ => 4,
    }
}

/// Render personality sliders and overrides as prompt directives.
///
/// Output order is fixed: identity → purpose → formality → verbosity →
/// creativity → empathy → humor → tone → language → custom instructions →
/// extra instructions. Identical input always yields identical text.
pub fn personality_to_prompt(
    personality: &Personality,
    identity: Option<&str>,
    purpose: Option<&str>,
) -> String {
    let mut lines: Vec<String> = Vec::new();

    if let Some(identity) = identity {
        lines.push(format!("You are {identity}."));
    }
    if let Some(purpose) = purpose {
        lines.push(format!("Your purpose: {purpose}."));
    }

    lines.push(FORMALITY[band(personality.formality)].into());
    lines.push(VERBOSITY[band(personality.verbosity)].into());
    lines.push(CREATIVITY[band(personality.creativity)].into());
    lines.push(EMPATHY[band(personality.empathy)].into());
    lines.push(HUMOR[band(personality.humor)].into());

    if let Some(tone) = &personality.tone {
        lines.push(format!("Overall tone: {tone}."));
    }
    if let Some(language) = &personality.language {
        lines.push(format!("Always respond in {language}."));
    }
    if let Some(custom) = &personality.custom_instructions {
        lines.push(custom.clone());
    }
    if let Some(extra) = &personality.extra_instructions {
        lines.push(extra.clone());
    }

    lines.join("\n")
}
