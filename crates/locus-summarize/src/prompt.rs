use serde::Deserialize;

use crate::error::SummarizeError;

/// Most keywords kept from a model reply.
const MAX_KEYWORDS: usize = 12;

/// Build the system prompt for file summarization.
///
/// # Examples
///
/// ```
/// use locus_summarize::prompt::build_system_prompt;
///
/// let prompt = build_system_prompt();
/// assert!(prompt.contains("keywords"));
/// ```
pub fn build_system_prompt() -> String {
    r#"You describe source files so developers can find code by what it does.

Given one file, answer with a JSON object:
{"summary": "...", "keywords": ["...", "..."]}

- "summary": 2-4 sentences on the file's purpose and main responsibilities,
  naming the important functions or types. Describe behaviour, not syntax.
- "keywords": 3-10 lowercase search terms a developer might type to find
  this file (concepts, domain words, technologies). No generic words like
  "code" or "file".

Return only the JSON object."#
        .to_string()
}

/// Build the user prompt for one file, truncating content to `max_chars`.
///
/// # Examples
///
/// ```
/// use locus_summarize::prompt::build_summary_prompt;
///
/// let prompt = build_summary_prompt("src/auth.rs", Some("rust"), "fn login() {}", 1000);
/// assert!(prompt.contains("src/auth.rs"));
/// assert!(prompt.contains("fn login()"));
/// ```
pub fn build_summary_prompt(path: &str, language: Option<&str>, content: &str, max_chars: usize) -> String {
    let (body, truncated) = truncate_chars(content, max_chars);
    let mut prompt = format!("File: {path}\n");
    if let Some(lang) = language {
        prompt.push_str(&format!("Language: {lang}\n"));
    }
    if truncated {
        prompt.push_str("(content truncated)\n");
    }
    prompt.push_str("\n```\n");
    prompt.push_str(body);
    prompt.push_str("\n```\n");
    prompt
}

/// Parsed model reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelSummary {
    /// Functional description.
    pub summary: String,
    /// Search terms.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Parse a model reply into a summary.
///
/// Code fences are stripped. A reply that is not JSON at all is taken as
/// a plain-text summary with no keywords.
///
/// # Errors
///
/// Returns [`SummarizeError::Malformed`] for an empty reply, or for one
/// that looks like JSON but has no usable `summary`.
///
/// # Examples
///
/// ```
/// use locus_summarize::prompt::parse_summary_response;
///
/// let reply = r#"{"summary": "Handles login.", "keywords": ["Auth", "login"]}"#;
/// let parsed = parse_summary_response(reply).unwrap();
/// assert_eq!(parsed.summary, "Handles login.");
/// assert_eq!(parsed.keywords, vec!["auth", "login"]);
/// ```
pub fn parse_summary_response(response: &str) -> Result<ModelSummary, SummarizeError> {
    let cleaned = strip_code_fences(response);
    if cleaned.is_empty() {
        return Err(SummarizeError::Malformed("empty reply".into()));
    }

    if !cleaned.starts_with('{') {
        return Ok(ModelSummary {
            summary: cleaned.to_string(),
            keywords: Vec::new(),
        });
    }

    let parsed: ModelSummary = serde_json::from_str(cleaned)
        .map_err(|e| SummarizeError::Malformed(format!("{e}: {cleaned}")))?;
    let summary = parsed.summary.trim().to_string();
    if summary.is_empty() {
        return Err(SummarizeError::Malformed("reply has an empty summary".into()));
    }

    let mut keywords: Vec<String> = Vec::new();
    for keyword in parsed.keywords {
        let keyword = keyword.trim().to_lowercase();
        if !keyword.is_empty() && !keywords.contains(&keyword) {
            keywords.push(keyword);
        }
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }

    Ok(ModelSummary { summary, keywords })
}

fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

/// Cut `s` to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> (&str, bool) {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => (&s[..idx], true),
        None => (s, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_asks_for_json() {
        let prompt = build_system_prompt();
        assert!(prompt.contains("JSON"));
        assert!(prompt.contains("summary"));
    }

    #[test]
    fn prompt_truncates_long_content() {
        let content = "é".repeat(50);
        let prompt = build_summary_prompt("a.txt", None, &content, 10);
        assert!(prompt.contains("(content truncated)"));
        assert!(prompt.contains(&"é".repeat(10)));
        assert!(!prompt.contains(&"é".repeat(11)));
        assert!(!prompt.contains("Language:"));
    }

    #[test]
    fn parse_with_code_fences() {
        let reply = "```json\n{\"summary\": \"Parses config.\", \"keywords\": [\"toml\"]}\n```";
        let parsed = parse_summary_response(reply).unwrap();
        assert_eq!(parsed.summary, "Parses config.");
        assert_eq!(parsed.keywords, vec!["toml"]);
    }

    #[test]
    fn plain_text_is_a_summary() {
        let parsed = parse_summary_response("Implements the HTTP router.").unwrap();
        assert_eq!(parsed.summary, "Implements the HTTP router.");
        assert!(parsed.keywords.is_empty());
    }

    #[test]
    fn keywords_are_normalized_and_capped() {
        let many: Vec<String> = (0..20).map(|i| format!("\"K{i}\"")).collect();
        let reply = format!(
            r#"{{"summary": "x", "keywords": ["Auth", "auth", " ", {}]}}"#,
            many.join(",")
        );
        let parsed = parse_summary_response(&reply).unwrap();
        assert_eq!(parsed.keywords.len(), MAX_KEYWORDS);
        assert_eq!(parsed.keywords[0], "auth");
        assert_eq!(parsed.keywords[1], "k0");
    }

    #[test]
    fn malformed_json_and_empty_are_errors() {
        assert!(matches!(
            parse_summary_response("{\"summ"),
            Err(SummarizeError::Malformed(_))
        ));
        assert!(matches!(
            parse_summary_response("   "),
            Err(SummarizeError::Malformed(_))
        ));
        assert!(matches!(
            parse_summary_response(r#"{"summary": ""}"#),
            Err(SummarizeError::Malformed(_))
        ));
    }
}
