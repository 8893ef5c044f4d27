//! Prompt templates for the travel assistant features.

use crate::error::ChatError;
use serde::{Deserialize, Serialize};

/// Target languages offered for translation: (code, English name).
pub const LANGUAGES: &[(&str, &str)] = &[
    ("zh", "Chinese"),
    ("en", "English"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("fr", "French"),
    ("de", "German"),
];

pub const DEFAULT_LANGUAGE: &str = "zh";

/// Display name for a language code; unknown codes fall back to Chinese.
pub fn language_name(code: &str) -> &'static str {
    LANGUAGES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code.trim()))
        .or_else(|| LANGUAGES.iter().find(|(c, _)| *c == DEFAULT_LANGUAGE))
        .map(|(_, name)| *name)
        .unwrap_or("Chinese")
}

pub fn translation_prompt(text: &str, target_language: &str) -> String {
    format!(
        "Translate the following text into {}. Return only the translation, with nothing else added:\n\n{}",
        language_name(target_language),
        text
    )
}

/// Saved travel preferences of a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelProfile {
    pub preferred_activities: Option<String>,
    pub budget_range_min: Option<f64>,
    pub budget_range_max: Option<f64>,
    pub preferred_climate: Option<String>,
    pub special_requirements: Option<String>,
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl TravelProfile {
    fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(a) = non_blank(&self.preferred_activities) {
            out.push(format!("- Preferred activities: {}", a));
        }
        // The range is only meaningful with both ends set.
        if let (Some(min), Some(max)) = (self.budget_range_min, self.budget_range_max) {
            out.push(format!("- Budget range: {}-{} CNY", min, max));
        }
        if let Some(c) = non_blank(&self.preferred_climate) {
            out.push(format!("- Preferred climate: {}", c));
        }
        if let Some(r) = non_blank(&self.special_requirements) {
            out.push(format!("- Special requirements: {}", r));
        }
        out
    }
}

pub fn recommendation_prompt(profile: Option<&TravelProfile>, request: &str) -> String {
    let mut prompt = String::from(
        "You are a professional travel planner. Recommend a travel plan for the user based on the following information:\n\n",
    );

    let lines = profile.map(TravelProfile::lines).unwrap_or_default();
    if !lines.is_empty() {
        prompt.push_str("User preferences:\n");
        for line in lines {
            prompt.push_str(&line);
            prompt.push('\n');
        }
    }

    let request = request.trim();
    if !request.is_empty() {
        prompt.push_str(&format!("\nSpecific request: {}\n", request));
    }

    prompt.push_str(
        "\nGive a detailed travel plan recommendation, including destinations, a day-by-day itinerary and practical notes. Return the result in a clear format.",
    );
    prompt
}

pub const DEFAULT_SUMMARY_INSTRUCTION: &str = "Summarize the main content of the following document, including its key points and core information.
Requirements:
1. Identify the main topics or themes
2. List the key points
3. Summarize important figures or conclusions
4. Keep it logically clear and concise

Document:";

pub fn summary_prompt(document: &str, instruction: Option<&str>) -> String {
    let instruction = instruction
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUMMARY_INSTRUCTION);
    format!("{}\n{}", instruction, document)
}

/// Decode user-supplied bytes as UTF-8 text.
pub fn decode_input(bytes: &[u8]) -> Result<String, ChatError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| {
        ChatError::InputEncoding(format!(
            "invalid UTF-8 at byte {}",
            e.utf8_error().valid_up_to()
        ))
    })
}
