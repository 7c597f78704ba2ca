//! Classification step — turns one mail item into a structured label.
//!
//! The LLM behind the classify capability is not trusted to honor the
//! contract: values outside range are clamped, unknown labels default, and an
//! unparseable payload yields a safe default with an explicit `parse_error`
//! flag. The pipeline never halts because one response was malformed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mail body is truncated to this many characters before classification
/// (LLM context and cost limit).
pub const BODY_TRUNCATE_CHARS: usize = 1500;

/// Maximum number of key points kept from a classification.
pub const MAX_KEY_POINTS: usize = 5;

/// Importance score assigned when the response carries no usable number.
const DEFAULT_IMPORTANCE: u8 = 5;

/// Closed set of mail categories.
///
/// The upstream prompt answers with Korean labels (채용/마케팅/공지/개인/기타);
/// English aliases are accepted too. Anything else maps to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailType {
    Recruiting,
    Marketing,
    Notice,
    Personal,
    Other,
}

impl EmailType {
    /// Parse a wire label, defaulting to `Other` for anything unknown.
    pub fn parse_label(label: &str) -> Self {
        match label.trim() {
            "채용" | "recruiting" | "recruitment" => Self::Recruiting,
            "마케팅" | "marketing" => Self::Marketing,
            "공지" | "notice" | "announcement" => Self::Notice,
            "개인" | "personal" => Self::Personal,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recruiting => "recruiting",
            Self::Marketing => "marketing",
            Self::Notice => "notice",
            Self::Personal => "personal",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for EmailType {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_label(s))
    }
}

/// Sentiment of a classified mail. Unknown labels default to `Neutral`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn parse_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "positive" | "긍정" => Self::Positive,
            "negative" | "부정" => Self::Negative,
            _ => Self::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

impl std::str::FromStr for Sentiment {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_label(s))
    }
}

/// Structured label for one mail item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub email_type: EmailType,
    /// Integer importance in [0, 10].
    pub importance_score: u8,
    pub needs_reply: bool,
    pub sentiment: Sentiment,
    /// Up to five key points, in order.
    #[serde(default)]
    pub key_points: Vec<String>,
    /// Set when any field of the response failed to parse and a default was
    /// substituted.
    #[serde(default)]
    pub parse_error: bool,
}

impl Classification {
    /// The safe default recorded when a response is unusable.
    pub fn safe_default() -> Self {
        Self {
            email_type: EmailType::Other,
            importance_score: DEFAULT_IMPORTANCE,
            needs_reply: false,
            sentiment: Sentiment::Neutral,
            key_points: Vec::new(),
            parse_error: true,
        }
    }
}

/// Truncate a mail body for the classify prompt.
///
/// Char-based, not byte-based — bodies are frequently non-ASCII.
pub fn truncate_body(body: &str) -> String {
    body.chars().take(BODY_TRUNCATE_CHARS).collect()
}

/// Parse a classify capability response into a `Classification`.
///
/// Accepts the fields at the top level, nested under `analysis` (the analyze
/// webhook shape), or as a JSON string possibly wrapped in a markdown code
/// fence. Missing or mistyped fields get defaults and set `parse_error`.
pub fn parse_classification(raw: &Value) -> Classification {
    let Some(fields) = classification_fields(raw) else {
        return Classification::safe_default();
    };

    let mut parse_error = false;

    let email_type = match fields.get("email_type").and_then(Value::as_str) {
        Some(label) => EmailType::parse_label(label),
        None => {
            parse_error = true;
            EmailType::Other
        }
    };

    let importance_score = match parse_importance(fields.get("importance_score")) {
        Some(score) => score,
        None => {
            parse_error = true;
            DEFAULT_IMPORTANCE
        }
    };

    let needs_reply = match parse_bool(fields.get("needs_reply")) {
        Some(b) => b,
        None => {
            parse_error = true;
            false
        }
    };

    let sentiment = match fields.get("sentiment").and_then(Value::as_str) {
        Some(label) => Sentiment::parse_label(label),
        None => {
            parse_error = true;
            Sentiment::Neutral
        }
    };

    let key_points = fields
        .get("key_points")
        .and_then(Value::as_array)
        .map(|points| {
            points
                .iter()
                .filter_map(Value::as_str)
                .take(MAX_KEY_POINTS)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Classification {
        email_type,
        importance_score,
        needs_reply,
        sentiment,
        key_points,
        parse_error,
    }
}

/// Locate the object holding the classification fields.
fn classification_fields(raw: &Value) -> Option<Value> {
    match raw {
        Value::Object(map) => {
            if let Some(analysis @ Value::Object(_)) = map.get("analysis") {
                Some(analysis.clone())
            } else {
                Some(raw.clone())
            }
        }
        // Some workflows hand the LLM text through verbatim.
        Value::String(text) => {
            let json = extract_json_object(text);
            serde_json::from_str::<Value>(&json)
                .ok()
                .and_then(|v| classification_fields(&v))
        }
        _ => None,
    }
}

/// Parse an importance value that may be an integer, a float, or a numeric
/// string. Out-of-range values are clamped to [0, 10]; non-numeric values
/// (e.g. `"high"`) are rejected so the caller substitutes the default.
fn parse_importance(value: Option<&Value>) -> Option<u8> {
    let value = value?;
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(n.round().clamp(0.0, 10.0) as u8)
}

/// Parse a boolean that may arrive as a bool or as `"true"`/`"false"`.
fn parse_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_well_formed_response() {
        let raw = json!({
            "email_type": "채용",
            "importance_score": 8,
            "needs_reply": true,
            "sentiment": "positive",
            "key_points": ["interview invite", "reply by Friday"]
        });
        let c = parse_classification(&raw);
        assert_eq!(c.email_type, EmailType::Recruiting);
        assert_eq!(c.importance_score, 8);
        assert!(c.needs_reply);
        assert_eq!(c.sentiment, Sentiment::Positive);
        assert_eq!(c.key_points.len(), 2);
        assert!(!c.parse_error);
    }

    #[test]
    fn parses_nested_analysis_shape() {
        let raw = json!({
            "success": true,
            "email_id": 3,
            "analysis": {
                "email_type": "마케팅",
                "importance_score": 2,
                "needs_reply": false,
                "sentiment": "neutral"
            }
        });
        let c = parse_classification(&raw);
        assert_eq!(c.email_type, EmailType::Marketing);
        assert_eq!(c.importance_score, 2);
        assert!(!c.parse_error);
    }

    #[test]
    fn non_numeric_importance_defaults_and_flags() {
        // Wrong type for the score — clamp/default to 5 and flag, never fail.
        let raw = json!({"email_type": "기타", "importance_score": "high"});
        let c = parse_classification(&raw);
        assert_eq!(c.email_type, EmailType::Other);
        assert_eq!(c.importance_score, 5);
        assert!(c.parse_error);
    }

    #[test]
    fn importance_clamped_to_range() {
        let raw = json!({
            "email_type": "공지",
            "importance_score": 42,
            "needs_reply": false,
            "sentiment": "neutral"
        });
        let c = parse_classification(&raw);
        assert_eq!(c.importance_score, 10);
        assert!(!c.parse_error);

        let raw = json!({
            "email_type": "공지",
            "importance_score": -3,
            "needs_reply": false,
            "sentiment": "neutral"
        });
        assert_eq!(parse_classification(&raw).importance_score, 0);
    }

    #[test]
    fn numeric_string_importance_is_accepted() {
        let raw = json!({
            "email_type": "개인",
            "importance_score": "7",
            "needs_reply": "true",
            "sentiment": "neutral"
        });
        let c = parse_classification(&raw);
        assert_eq!(c.importance_score, 7);
        assert!(c.needs_reply);
        assert!(!c.parse_error);
    }

    #[test]
    fn unknown_enum_labels_default() {
        let raw = json!({
            "email_type": "스팸",
            "importance_score": 1,
            "needs_reply": false,
            "sentiment": "ecstatic"
        });
        let c = parse_classification(&raw);
        assert_eq!(c.email_type, EmailType::Other);
        assert_eq!(c.sentiment, Sentiment::Neutral);
        assert!(!c.parse_error);
    }

    #[test]
    fn key_points_capped_at_five() {
        let raw = json!({
            "email_type": "공지",
            "importance_score": 3,
            "needs_reply": false,
            "sentiment": "neutral",
            "key_points": ["a", "b", "c", "d", "e", "f", "g"]
        });
        let c = parse_classification(&raw);
        assert_eq!(c.key_points, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn non_object_payload_is_safe_default() {
        let c = parse_classification(&json!(17));
        assert_eq!(c, Classification::safe_default());
        assert!(c.parse_error);
    }

    #[test]
    fn string_payload_with_markdown_fence_parses() {
        let raw = json!(
            "Here is the analysis:\n```json\n{\"email_type\": \"개인\", \"importance_score\": 9, \"needs_reply\": true, \"sentiment\": \"positive\"}\n```"
        );
        let c = parse_classification(&raw);
        assert_eq!(c.email_type, EmailType::Personal);
        assert_eq!(c.importance_score, 9);
        assert!(!c.parse_error);
    }

    #[test]
    fn missing_fields_flag_parse_error() {
        let raw = json!({"email_type": "공지"});
        let c = parse_classification(&raw);
        assert_eq!(c.email_type, EmailType::Notice);
        assert_eq!(c.importance_score, 5);
        assert!(c.parse_error);
    }

    #[test]
    fn truncate_body_is_char_based() {
        let body = "가".repeat(2000);
        let truncated = truncate_body(&body);
        assert_eq!(truncated.chars().count(), BODY_TRUNCATE_CHARS);
    }

    #[test]
    fn truncate_short_body_unchanged() {
        assert_eq!(truncate_body("hello"), "hello");
    }
}
