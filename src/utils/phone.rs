//! Phone number variation matching.
//!
//! The same caller can appear as `07366842442`, `+447366842442` or
//! `447366842442` depending on which side produced the record. Contact
//! lookup widens recall by searching every representation before falling
//! back to creating a new person.

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PhoneVariation {
    pub format: String,
    pub description: String,
}

fn digits_of(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// The 10-digit UK national significant number, if `raw` looks like a UK
/// number in any of the common representations.
fn uk_national(raw: &str) -> Option<String> {
    let digits = digits_of(raw);
    if digits.len() == 12 && digits.starts_with("44") {
        Some(digits[2..].to_string())
    } else if digits.len() == 11 && digits.starts_with('0') {
        Some(digits[1..].to_string())
    } else {
        None
    }
}

/// Ordered, de-duplicated representations of `raw` for contact search.
pub fn variations(raw: &str) -> Vec<PhoneVariation> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut out: Vec<PhoneVariation> = vec![PhoneVariation {
        format: trimmed.to_string(),
        description: "original".to_string(),
    }];
    let mut push = |format: String, description: &str| {
        if !out.iter().any(|v| v.format == format) {
            out.push(PhoneVariation {
                format,
                description: description.to_string(),
            });
        }
    };

    if let Some(national) = uk_national(trimmed) {
        push(format!("0{}", national), "UK local");
        push(format!("+44{}", national), "E.164");
        push(format!("44{}", national), "international without plus");
    } else {
        let digits = digits_of(trimmed);
        if !digits.is_empty() {
            if trimmed.starts_with('+') {
                push(format!("+{}", digits), "E.164");
            }
            push(digits, "digits only");
        }
    }

    out
}

/// Canonical form used for equivalence checks. Prefers E.164; numbers the
/// normalizer cannot classify collapse to their digit string. Never fails;
/// empty input yields an empty string.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if let Some(national) = uk_national(trimmed) {
        return format!("+44{}", national);
    }
    let digits = digits_of(trimmed);
    if trimmed.starts_with('+') && !digits.is_empty() {
        return format!("+{}", digits);
    }
    digits
}

pub fn are_equivalent(a: &str, b: &str) -> bool {
    let (na, nb) = (normalize(a), normalize(b));
    !na.is_empty() && na == nb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uk_local_and_e164_are_equivalent() {
        assert!(are_equivalent("07366842442", "+447366842442"));
        assert!(are_equivalent("447366842442", "07366842442"));
        assert!(!are_equivalent("07366842442", "07366842443"));
    }

    #[test]
    fn normalize_is_idempotent() {
        for p in [
            "07366842442",
            "+447366842442",
            "447366842442",
            "+1 (555) 123-4567",
            "5551234567",
            "",
            "not a number",
        ] {
            let once = normalize(p);
            assert_eq!(normalize(&once), once, "unstable for {:?}", p);
        }
    }

    #[test]
    fn variations_cover_uk_formats() {
        let vars = variations("07366842442");
        let formats: Vec<&str> = vars.iter().map(|v| v.format.as_str()).collect();
        assert_eq!(
            formats,
            vec!["07366842442", "+447366842442", "447366842442"]
        );
    }

    #[test]
    fn empty_input_yields_empty_results() {
        assert!(variations("").is_empty());
        assert_eq!(normalize("   "), "");
        assert!(!are_equivalent("", ""));
    }

    #[test]
    fn non_uk_numbers_keep_original_first() {
        let vars = variations("+1 (555) 123-4567");
        assert_eq!(vars[0].format, "+1 (555) 123-4567");
        assert!(vars.iter().any(|v| v.format == "+15551234567"));
    }
}
