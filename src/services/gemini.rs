use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use super::{IntegrationError, upstream_error};

const PROVIDER: &str = "Gemini";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

pub struct GeminiService;

impl GeminiService {
    pub fn is_enabled() -> bool {
        Config::gemini_api_key().is_some()
    }

    /// Sends one prompt to `generateContent` and returns the concatenated text parts.
    pub async fn generate(prompt: &str) -> Result<String, IntegrationError> {
        let api_key = Config::gemini_api_key().ok_or(IntegrationError::NotConfigured(PROVIDER))?;

        let res = Client::new()
            .post(format!("{}/{}:generateContent", BASE_URL, Config::gemini_model()))
            .query(&[("key", api_key)])
            .json(&json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
                "generationConfig": { "temperature": 0.2 }
            }))
            .send()
            .await
            .map_err(IntegrationError::transport(PROVIDER))?;

        if !res.status().is_success() {
            return Err(upstream_error(PROVIDER, res).await);
        }

        let body: GenerateResponse = res
            .json()
            .await
            .map_err(|e| IntegrationError::invalid(PROVIDER, e))?;

        Self::text_of(body)
    }

    fn text_of(body: GenerateResponse) -> Result<String, IntegrationError> {
        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(IntegrationError::invalid(PROVIDER, "empty completion"));
        }
        Ok(text)
    }

    /// Pulls the first JSON array of ids out of a model answer. Models
    /// tend to wrap JSON in Markdown fences or add prose around it, and the
    /// prose may contain brackets of its own, so every `[` is tried in turn.
    pub fn extract_id_list(text: &str) -> Option<Vec<String>> {
        let mut found_empty = false;

        for (start, _) in text.match_indices('[') {
            let Some(Ok(values)) = serde_json::Deserializer::from_str(&text[start..])
                .into_iter::<Vec<serde_json::Value>>()
                .next()
            else {
                continue;
            };

            let ids = Self::ids_of(values);
            if !ids.is_empty() {
                return Some(ids);
            }
            found_empty = true;
        }

        found_empty.then(Vec::new)
    }

    fn ids_of(values: Vec<serde_json::Value>) -> Vec<String> {
        values
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Object(map) => map
                    .get("id")
                    .and_then(|id| id.as_str())
                    .map(|s| s.to_string()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_array() {
        assert_eq!(
            GeminiService::extract_id_list(r#"["a","b"]"#),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn fenced_array_with_prose() {
        let text = "Here are my picks:\n```json\n[\"65a1\", \"65a2\"]\n```\nHope this helps.";
        assert_eq!(
            GeminiService::extract_id_list(text),
            Some(vec!["65a1".to_string(), "65a2".to_string()])
        );
    }

    #[test]
    fn objects_with_id_fields() {
        let text = r#"[{"id":"x","reason":"fits"},{"id":"y"}, 3]"#;
        assert_eq!(
            GeminiService::extract_id_list(text),
            Some(vec!["x".to_string(), "y".to_string()])
        );
    }

    #[test]
    fn brackets_in_surrounding_prose() {
        let text = "Based on the skills [rust, mongodb], my picks:\n```json\n[\"65a1\",\"65a2\"]\n```\n[1 = best]";
        assert_eq!(
            GeminiService::extract_id_list(text),
            Some(vec!["65a1".to_string(), "65a2".to_string()])
        );
    }

    #[test]
    fn numeric_arrays_are_skipped_for_id_arrays() {
        let text = r#"Scores [3, 1] then ids ["x"]"#;
        assert_eq!(GeminiService::extract_id_list(text), Some(vec!["x".to_string()]));
        assert_eq!(GeminiService::extract_id_list("[]"), Some(vec![]));
    }

    #[test]
    fn unusable_answers() {
        assert_eq!(GeminiService::extract_id_list("no idea"), None);
        assert_eq!(GeminiService::extract_id_list("] oops ["), None);
        assert_eq!(GeminiService::extract_id_list("[not json]"), None);
    }

    #[test]
    fn completion_text_is_joined() {
        let body: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"[\"a\""},{"text":"]"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(GeminiService::text_of(body).unwrap(), r#"["a"]"#);

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(GeminiService::text_of(empty).is_err());
    }
}
