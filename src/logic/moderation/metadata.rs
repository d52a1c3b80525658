//! Metadata signal extraction
//!
//! Safetensor-style headers are arbitrary nested JSON, and string values often
//! hold more JSON (`ss_tag_frequency` is a JSON object serialised into a string).
//! Nothing here assumes a schema: values are visited recursively, depth-capped.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{MetadataScores, TextSignals};
use crate::logic::error::{AnalyzerError, AnalyzerResult};

pub const DEFAULT_MAX_DEPTH: usize = 8;
pub const TAG_FREQUENCY_KEY: &str = "ss_tag_frequency";

// ============================================================================
// RECURSIVE VISIT
// ============================================================================

/// Strings that are themselves JSON containers get parsed and visited
fn parse_embedded(s: &str) -> Option<Value> {
    let trimmed = s.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Every leaf string reachable within `max_depth` levels
pub fn collect_strings(value: &Value, max_depth: usize) -> Vec<String> {
    let mut out = Vec::new();
    visit_strings(value, 0, max_depth, &mut out);
    out
}

fn visit_strings(value: &Value, depth: usize, max_depth: usize, out: &mut Vec<String>) {
    if depth > max_depth {
        return;
    }
    match value {
        Value::String(s) => match parse_embedded(s) {
            Some(inner) => visit_strings(&inner, depth + 1, max_depth, out),
            None => out.push(s.clone()),
        },
        Value::Array(items) => {
            for item in items {
                visit_strings(item, depth + 1, max_depth, out);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                visit_strings(v, depth + 1, max_depth, out);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Tag -> summed count over every `ss_tag_frequency` block (all dataset folders)
pub fn tag_counts(value: &Value, max_depth: usize) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    find_tag_frequency(value, 0, max_depth, &mut counts);
    counts
}

fn find_tag_frequency(value: &Value, depth: usize, max_depth: usize, counts: &mut HashMap<String, f64>) {
    if depth > max_depth {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if key == TAG_FREQUENCY_KEY {
                    accumulate_counts(v, depth + 1, max_depth, counts);
                } else {
                    find_tag_frequency(v, depth + 1, max_depth, counts);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                find_tag_frequency(item, depth + 1, max_depth, counts);
            }
        }
        Value::String(s) => {
            if let Some(inner) = parse_embedded(s) {
                find_tag_frequency(&inner, depth + 1, max_depth, counts);
            }
        }
        _ => {}
    }
}

fn accumulate_counts(value: &Value, depth: usize, max_depth: usize, counts: &mut HashMap<String, f64>) {
    if depth > max_depth {
        return;
    }
    match value {
        Value::String(s) => {
            if let Some(inner) = parse_embedded(s) {
                accumulate_counts(&inner, depth + 1, max_depth, counts);
            }
        }
        Value::Object(map) => {
            for (tag, v) in map {
                match v.as_f64() {
                    Some(n) if n.is_finite() && n > 0.0 => {
                        *counts.entry(tag.trim().to_lowercase()).or_insert(0.0) += n;
                    }
                    Some(_) => {}
                    // dataset folder level
                    None => accumulate_counts(v, depth + 1, max_depth, counts),
                }
            }
        }
        _ => {}
    }
}

// ============================================================================
// TERM MATCHING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TermLists {
    pub adult: Vec<String>,
    pub minor: Vec<String>,
    pub beast: Vec<String>,
    pub illegal: Vec<String>,
}

fn terms(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for TermLists {
    fn default() -> Self {
        Self {
            adult: terms(&[
                "nsfw", "nude", "nudity", "naked", "topless", "nipples", "explicit",
                "porn", "hentai", "sex", "genitals", "pussy", "penis",
            ]),
            minor: terms(&[
                "loli", "lolicon", "shota", "shotacon", "child", "children", "underage",
                "minor", "kid", "toddler", "preteen",
            ]),
            beast: terms(&["bestiality", "zoophilia", "zoo"]),
            illegal: terms(&["csam", "rape", "snuff"]),
        }
    }
}

/// Compiled word-boundary matchers, one per term list
#[derive(Debug, Clone)]
pub struct TermMatcher {
    adult: Option<Regex>,
    minor: Option<Regex>,
    beast: Option<Regex>,
    illegal: Option<Regex>,
}

fn compile(list: &[String]) -> AnalyzerResult<Option<Regex>> {
    let alternatives: Vec<String> = list
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| regex::escape(&t.to_lowercase()))
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| AnalyzerError::Config(format!("term list: {}", e)))
}

fn hit(re: &Option<Regex>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

/// Booru tags use underscores; treat them as spaces so `\b` sees the words
fn normalize_text(text: &str) -> String {
    text.replace('_', " ")
}

impl TermMatcher {
    pub fn new(lists: &TermLists) -> AnalyzerResult<Self> {
        Ok(Self {
            adult: compile(&lists.adult)?,
            minor: compile(&lists.minor)?,
            beast: compile(&lists.beast)?,
            illegal: compile(&lists.illegal)?,
        })
    }

    /// Keyword signals over title/description/prompt/tags
    pub fn keyword_signals<S: AsRef<str>>(&self, texts: &[S]) -> TextSignals {
        let mut signals = TextSignals::default();
        for text in texts {
            let text = normalize_text(text.as_ref());
            signals.keyword_adult |= hit(&self.adult, &text);
            signals.keyword_minor |= hit(&self.minor, &text);
            signals.keyword_bestiality |= hit(&self.beast, &text);
            signals.keyword_illegal |= hit(&self.illegal, &text);
        }
        signals
    }

    /// Share of all tag occurrences that fall in each category
    pub fn tag_frequency_scores(&self, counts: &HashMap<String, f64>) -> MetadataScores {
        let total: f64 = counts.values().sum();
        if total <= 0.0 {
            return MetadataScores::default();
        }

        let mut adult = 0.0;
        let mut minor = 0.0;
        let mut beast = 0.0;
        for (tag, count) in counts {
            let tag = normalize_text(tag);
            if hit(&self.adult, &tag) {
                adult += count;
            }
            if hit(&self.minor, &tag) {
                minor += count;
            }
            if hit(&self.beast, &tag) {
                beast += count;
            }
        }

        MetadataScores {
            adult: (adult / total) as f32,
            minor: (minor / total) as f32,
            beast: (beast / total) as f32,
        }
    }

    /// Full pass over a metadata header: tag-frequency scores plus keyword
    /// hits over every other string found in it
    pub fn scan_metadata(&self, header: &Value) -> TextSignals {
        let strings = collect_strings(header, DEFAULT_MAX_DEPTH);
        let mut signals = self.keyword_signals(&strings);
        let counts = tag_counts(header, DEFAULT_MAX_DEPTH);
        if !counts.is_empty() {
            signals.metadata = Some(self.tag_frequency_scores(&counts));
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lora_header() -> Value {
        let freq = json!({
            "10_subject": {"1girl": 40, "swimsuit": 30, "nude": 20, "beach": 10}
        });
        json!({
            "__metadata__": {
                "ss_output_name": "beach_style",
                "ss_tag_frequency": freq.to_string(),
            }
        })
    }

    #[test]
    fn test_collect_strings_parses_embedded_json() {
        let strings = collect_strings(&lora_header(), DEFAULT_MAX_DEPTH);
        assert!(strings.contains(&"beach_style".to_string()));
        // tag keys are not leaf strings, counts are numbers
        assert!(!strings.iter().any(|s| s.contains("ss_tag_frequency")));
    }

    #[test]
    fn test_depth_cap_stops_visit() {
        let mut value = json!("deep");
        for _ in 0..20 {
            value = json!({ "nested": value });
        }
        assert!(collect_strings(&value, DEFAULT_MAX_DEPTH).is_empty());
        assert_eq!(collect_strings(&value, 32), vec!["deep".to_string()]);
    }

    #[test]
    fn test_tag_counts_sum_across_folders() {
        let header = json!({
            "ss_tag_frequency": {
                "a": {"Nude": 2, "beach": 1},
                "b": {"nude": 3, "bad": -4}
            }
        });
        let counts = tag_counts(&header, DEFAULT_MAX_DEPTH);
        assert_eq!(counts.get("nude"), Some(&5.0));
        assert_eq!(counts.get("beach"), Some(&1.0));
        assert!(!counts.contains_key("bad"));
    }

    #[test]
    fn test_tag_frequency_scores_are_normalised() {
        let matcher = TermMatcher::new(&TermLists::default()).unwrap();
        let counts = tag_counts(&lora_header(), DEFAULT_MAX_DEPTH);
        let scores = matcher.tag_frequency_scores(&counts);

        assert!((scores.adult - 0.2).abs() < 1e-6);
        assert_eq!(scores.minor, 0.0);
        assert_eq!(scores.beast, 0.0);
    }

    #[test]
    fn test_word_boundaries() {
        let matcher = TermMatcher::new(&TermLists::default()).unwrap();

        assert!(matcher.keyword_signals(&["A KID at the park"]).keyword_minor);
        assert!(matcher.keyword_signals(&["small_child, outdoors"]).keyword_minor);
        // substrings do not count
        assert!(!matcher.keyword_signals(&["kidney beans"]).keyword_minor);
        assert!(!matcher.keyword_signals(&["zookeeper uniform"]).keyword_bestiality);
    }

    #[test]
    fn test_empty_lists_never_match() {
        let matcher = TermMatcher::new(&TermLists {
            adult: vec![],
            minor: vec!["  ".to_string()],
            beast: vec![],
            illegal: vec![],
        })
        .unwrap();
        let signals = matcher.keyword_signals(&["nude child"]);
        assert_eq!(signals, TextSignals::default());
    }

    #[test]
    fn test_scan_metadata() {
        let matcher = TermMatcher::new(&TermLists::default()).unwrap();
        let signals = matcher.scan_metadata(&lora_header());

        let scores = signals.metadata.expect("tag scores");
        assert!(scores.adult > 0.0);
        assert!(!signals.keyword_minor);
    }
}
