use crate::core::continuity::ContinuityState;

/// Style contract sent as the system prompt of every content call.
pub const LECTURE_SYSTEM_PROMPT: &str = "You are a drowsy history professor giving a detailed bedtime lecture. Your style should induce sleep while remaining somewhat engaging.

CRITICAL RULES:
1. ABSOLUTELY NO stage directions, asterisk actions, or narration about yourself. Never write things like *clears throat* or *adjusts glasses*.
2. ABSOLUTELY NO META-TEXT OR CONTINUATION MARKERS. Never write [Continued in next section], [To be continued], [End of Part 1], or any brackets with editorial information.
3. Start directly with the lecture content and flow naturally throughout.

DELIVERY:
- A calm, monotone drone, like a nature documentary narrator at two in the morning.
- Never use exclamation marks. Every sentence ends quietly.
- Present surprising and dramatic facts in exactly the same flat tone as mundane ones, then move on.

FORMATTING FOR SPEECH SYNTHESIS:
- Spell out all numbers and years as words (\"fourteen twenty-three\", \"around two in the afternoon\").
- Short paragraphs of a few sentences, separated by blank lines.
- No lists, headings, bullet points, markdown, or abbreviations.

WORD CHOICE:
- Never use these adjectives: fascinating, incredible, amazing, remarkable, stunning, thrilling, extraordinary, breathtaking, shocking, epic.
- Prefer soft hedging transitions: \"it seems\", \"as far as we can tell\", \"more or less\", \"in any case\", \"one imagines\", \"by most accounts\", \"and so, gradually\".

CONTENT:
- Mundane daily routines, regulations, tools and processes described in soothing detail.
- Tangential stories about minor historical figures, delivered without urgency.
- Dates and times, but never overly precise.";

const SECTION_RULES: &str = "Write in a drowsy, meandering style: everyday processes and routines, small stories about ordinary people, dates mentioned casually, tangents that drift back eventually. No stage directions, no bracketed meta-text, no lists, no headings. Start immediately with lecture content.";

fn continuity_block(state: &ContinuityState) -> String {
    let used = if state.used_elements.is_empty() {
        "(none yet)".to_string()
    } else {
        state.used_elements.join(", ")
    };

    format!(
        "CONTINUITY:\n\
        Summary of what came before: {}\n\
        Already introduced (do not re-introduce or repeat these people, places or dates): {}\n\
        The previous section ended with these exact words:\n\"{}\"\n\
        Continue naturally from those words, as if the listener never noticed a break. Do not recap.",
        state.previous_summary, used, state.previous_last_sentences
    )
}

/// Prompt for one of the planned chunks; `section` is 1-based.
pub fn section_prompt(
    topic: &str,
    outline: &str,
    section: usize,
    focus_area: &str,
    target_words: usize,
    state: Option<&ContinuityState>,
) -> String {
    let mut prompt = format!(
        "You are writing a long bedtime history lecture on \"{topic}\".\n\n\
        OUTLINE:\n{outline}\n\n\
        TASK: Write the lecture text covering section {section} of the outline ({focus_area}) specifically.\n\
        Length: approximately {target_words} words.\n\n\
        {SECTION_RULES}"
    );
    if let Some(state) = state {
        prompt.push_str("\n\n");
        prompt.push_str(&continuity_block(state));
    }
    prompt
}

/// Prompt for an overflow chunk: keeps going past the outline on a new angle.
pub fn overflow_prompt(
    topic: &str,
    outline: &str,
    covered: &[String],
    target_words: usize,
    state: &ContinuityState,
) -> String {
    format!(
        "You are writing a long bedtime history lecture on \"{topic}\". The outlined sections are finished but the lecture needs more material.\n\n\
        OUTLINE:\n{outline}\n\n\
        Already covered: {}\n\n\
        TASK: Choose an angle on \"{topic}\" that is not already present in the outline or the covered list (a neighbouring trade, a season, a minor official, a tool, a regulation) and explore it.\n\
        Length: approximately {target_words} words.\n\n\
        {SECTION_RULES}\n\n\
        {}",
        covered.join("; "),
        continuity_block(state)
    )
}
