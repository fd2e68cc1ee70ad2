//! Heuristic extraction of a caller name and call topic from free-form
//! call-summary text, used to compose readable CRM deal titles.
//!
//! Extraction is lossy on purpose: every function here returns a fallback
//! instead of an error when the text gives nothing away.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref NAME_PATTERNS: Vec<Regex> = vec![
        // "The user, Jane Doe from Acme, ..."
        Regex::new(r"(?i)\bthe\s+(?:user|caller|customer),?\s+([A-Za-z][A-Za-z .'-]{0,38}?),?\s+from\b")
            .unwrap(),
        // "Jane Doe called about ..."
        Regex::new(r"(?i)\b([A-Za-z][A-Za-z'-]*(?:\s+[A-Za-z][A-Za-z'-]*){0,2})\s+called\b")
            .unwrap(),
        // "caller Jane Doe ..." / "caller named Jane"
        Regex::new(r"(?i)\bcaller\s+(?:named\s+)?([A-Za-z][A-Za-z'-]*(?:\s+[A-Za-z][A-Za-z'-]*){0,2})")
            .unwrap(),
        // "their name is Jane Doe"
        Regex::new(r"(?i)\bname\s+is\s+([A-Za-z][A-Za-z'-]*(?:\s+[A-Za-z][A-Za-z'-]*){0,2})")
            .unwrap(),
    ];
    static ref TOPIC_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\bbooked\s+an?\s+([A-Za-z0-9][A-Za-z0-9 ]*?)(?:[.,;!?]|$)").unwrap(),
        Regex::new(r"(?i)\babout\s+([A-Za-z0-9][A-Za-z0-9 ]*?)(?:[.,;!?]|$)").unwrap(),
        Regex::new(r"(?i)\b(?:interested\s+in|regarding)\s+([A-Za-z0-9][A-Za-z0-9 ]*?)(?:[.,;!?]|$)")
            .unwrap(),
        Regex::new(r"(?i)\b(?:scheduled?|requested)\s+an?\s+([A-Za-z0-9][A-Za-z0-9 ]*?)(?:[.,;!?]|$)")
            .unwrap(),
    ];
}

const TOPIC_KEYWORDS: &[&str] = &[
    "consultation",
    "demo",
    "appointment",
    "quote",
    "callback",
    "pricing",
    "support",
    "follow up",
];

// Generic words a name capture must not contain; the "X called" pattern
// otherwise swallows sentence subjects like "The user".
const NAME_STOPWORDS: &[&str] = &[
    "the", "a", "an", "user", "caller", "customer", "client", "they", "he", "she", "someone",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedEntities {
    pub name: Option<String>,
    pub topic: Option<String>,
}

fn name_is_plausible(candidate: &str) -> bool {
    let words: Vec<&str> = candidate.split_whitespace().collect();
    if words.is_empty() || words.len() > 3 || candidate.len() > 30 {
        return false;
    }
    if !candidate.chars().all(|c| c.is_ascii_alphabetic() || c == ' ') {
        return false;
    }
    !words
        .iter()
        .any(|w| NAME_STOPWORDS.contains(&w.to_lowercase().as_str()))
}

fn format_topic(raw: &str) -> String {
    let trimmed = raw.trim();
    let truncated: String = if trimmed.chars().count() > 40 {
        let head: String = trimmed.chars().take(40).collect();
        format!("{}...", head.trim_end())
    } else {
        trimmed.to_string()
    };
    let mut chars = truncated.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => truncated,
    }
}

fn dynamic_var_name(dynamic_vars: Option<&Value>) -> Option<String> {
    let vars = dynamic_vars?.as_object()?;
    for key in ["name", "customer_name", "full_name", "lead_name"] {
        if let Some(v) = vars.get(key).and_then(Value::as_str) {
            if !v.trim().is_empty() {
                return Some(v.trim().to_string());
            }
        }
    }
    let first = vars.get("first_name").and_then(Value::as_str).unwrap_or("");
    let last = vars.get("last_name").and_then(Value::as_str).unwrap_or("");
    let combined = format!("{} {}", first.trim(), last.trim());
    let combined = combined.trim().to_string();
    if combined.is_empty() {
        None
    } else {
        Some(combined)
    }
}

pub fn extract_entities(summary: &str, dynamic_vars: Option<&Value>) -> ExtractedEntities {
    let mut name = None;
    for pattern in NAME_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(summary) {
            let candidate = caps[1].trim().to_string();
            if name_is_plausible(&candidate) {
                name = Some(candidate);
                break;
            }
        }
    }
    if name.is_none() {
        name = dynamic_var_name(dynamic_vars);
    }

    let mut topic = None;
    for pattern in TOPIC_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(summary) {
            let candidate = caps[1].trim();
            if !candidate.is_empty() {
                topic = Some(format_topic(candidate));
                break;
            }
        }
    }
    if topic.is_none() {
        let lowered = summary.to_lowercase();
        topic = TOPIC_KEYWORDS
            .iter()
            .find(|k| lowered.contains(*k))
            .map(|k| format_topic(k));
    }

    ExtractedEntities { name, topic }
}

/// Compose a human-readable deal title, degrading through
/// `"{name} - {topic}"`, `"{phone} - {topic}"`, `"{name} - Consultation"`
/// and `"{phone} - Service Inquiry"`.
pub fn generate_deal_title(
    summary: Option<&str>,
    dynamic_vars: Option<&Value>,
    phone: Option<&str>,
) -> String {
    let extracted = extract_entities(summary.unwrap_or(""), dynamic_vars);
    let phone = phone.map(str::trim).filter(|p| !p.is_empty());

    match (extracted.name, extracted.topic, phone) {
        (Some(name), Some(topic), _) => format!("{} - {}", name, topic),
        (None, Some(topic), Some(phone)) => format!("{} - {}", phone, topic),
        (Some(name), None, _) => format!("{} - Consultation", name),
        (None, _, Some(phone)) => format!("{} - Service Inquiry", phone),
        (None, Some(topic), None) => topic,
        (None, None, None) => "Service Inquiry".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_name_and_topic_from_summary() {
        let title = generate_deal_title(
            Some("The user, Jane Doe from Acme, booked a consultation for SEO services"),
            None,
            None,
        );
        assert_eq!(title, "Jane Doe - Consultation for seo services");
    }

    #[test]
    fn falls_back_to_phone_and_service_inquiry() {
        let title = generate_deal_title(
            Some("Short voicemail, nothing usable."),
            None,
            Some("+15551234567"),
        );
        assert_eq!(title, "+15551234567 - Service Inquiry");
    }

    #[test]
    fn rejects_generic_sentence_subjects_as_names() {
        let out = extract_entities("The user called and hung up", None);
        assert_eq!(out.name, None);
    }

    #[test]
    fn name_from_dynamic_variables() {
        let vars = json!({"first_name": "Ada", "last_name": "Lovelace"});
        let out = extract_entities("no names here", Some(&vars));
        assert_eq!(out.name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn long_topics_are_truncated_with_ellipsis() {
        let summary =
            "She booked a comprehensive multi channel marketing strategy review session today";
        let out = extract_entities(summary, None);
        let topic = out.topic.unwrap();
        assert!(topic.ends_with("..."), "topic was {:?}", topic);
        assert!(topic.chars().count() <= 43);
    }

    #[test]
    fn keyword_scan_when_no_pattern_matches() {
        let out = extract_entities("They would like a demo next week", None);
        assert_eq!(out.topic.as_deref(), Some("Demo"));
    }
}
