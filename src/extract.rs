//! 需求抽取：自然语言 -> 结构化出行字段
//!
//! 用严格 JSON 提示词让 LLM 抽取 destination / dates / card；
//! 从回复中取第一个 JSON 对象解析，"Not specified" 归一为 None。
//! LLM 失败时降级为全空需求（由澄清环节兜底），不让请求直接失败。

use std::sync::Arc;

use serde::Deserialize;

use crate::core::context::Requirements;
use crate::llm::{LlmClient, Message};

const EXTRACTION_SYSTEM: &str =
    "You are a helpful assistant that extracts structured data from text. Always respond with valid JSON only.";

fn extraction_prompt(user_input: &str) -> String {
    format!(
        "Extract the following information from the user's travel request.\n\
         Return the information in JSON format with these exact keys: destination, dates, card.\n\n\
         Rules:\n\
         - If information is not provided, use \"Not specified\"\n\
         - For dates, extract the date range in format \"YYYY-MM-DD to YYYY-MM-DD\" if possible\n\
         - For destination, extract the city/country name\n\
         - For card, extract the credit card name/type mentioned\n\n\
         User input: {user_input}\n\n\
         Return ONLY the JSON object, no other text:"
    )
}

#[derive(Debug, Deserialize)]
struct RawRequirements {
    destination: Option<String>,
    dates: Option<String>,
    card: Option<String>,
}

fn normalize(field: Option<String>) -> Option<String> {
    let value = field?.trim().to_string();
    if value.is_empty() || value.eq_ignore_ascii_case("not specified") {
        None
    } else {
        Some(value)
    }
}

/// 从文本中取第一个 {...} 块并解析为需求；无 JSON 或解析失败返回 None
pub fn parse_requirements_json(text: &str) -> Option<Requirements> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    let raw: RawRequirements = serde_json::from_str(&text[start..=end]).ok()?;
    Some(Requirements {
        destination: normalize(raw.destination),
        dates: normalize(raw.dates),
        card: normalize(raw.card),
    })
}

/// 需求抽取器：持有 LLM 客户端，输出结构化需求
pub struct RequirementExtractor {
    llm: Arc<dyn LlmClient>,
}

impl RequirementExtractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 抽取失败（网络 / 解析）时返回空需求并告警
    pub async fn extract(&self, user_input: &str) -> Requirements {
        let messages = [
            Message::system(EXTRACTION_SYSTEM),
            Message::user(extraction_prompt(user_input)),
        ];
        match self.llm.complete(&messages).await {
            Ok(reply) => parse_requirements_json(&reply).unwrap_or_else(|| {
                tracing::warn!(reply = %reply, "extraction reply had no parseable JSON");
                Requirements::default()
            }),
            Err(err) => {
                tracing::warn!(error = %err, "requirement extraction failed, degrading to empty");
                Requirements::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FailingLlmClient, MockLlmClient};

    #[test]
    fn test_parse_plain_json() {
        let req = parse_requirements_json(
            r#"{"destination": "Paris", "dates": "2026-06-01 to 2026-06-08", "card": "BankGold"}"#,
        )
        .unwrap();
        assert_eq!(req.destination.as_deref(), Some("Paris"));
        assert_eq!(req.dates.as_deref(), Some("2026-06-01 to 2026-06-08"));
        assert_eq!(req.card.as_deref(), Some("BankGold"));
    }

    #[test]
    fn test_parse_json_wrapped_in_prose() {
        let text = "Sure! Here is the JSON:\n```json\n{\"destination\": \"Tokyo\", \"dates\": \"Not specified\", \"card\": \"Not specified\"}\n```";
        let req = parse_requirements_json(text).unwrap();
        assert_eq!(req.destination.as_deref(), Some("Tokyo"));
        assert!(req.dates.is_none());
        assert!(req.card.is_none());
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_requirements_json("no json here").is_none());
        assert!(parse_requirements_json("{broken").is_none());
    }

    #[tokio::test]
    async fn test_extractor_happy_path() {
        let llm = Arc::new(MockLlmClient::new(
            r#"{"destination": "Rome", "dates": "Not specified", "card": "Amex Platinum"}"#,
        ));
        let extractor = RequirementExtractor::new(llm);
        let req = extractor.extract("I want to visit Rome with my Amex Platinum").await;
        assert_eq!(req.destination.as_deref(), Some("Rome"));
        assert_eq!(req.card.as_deref(), Some("Amex Platinum"));
    }

    #[tokio::test]
    async fn test_extractor_degrades_on_llm_failure() {
        let extractor = RequirementExtractor::new(Arc::new(FailingLlmClient));
        let req = extractor.extract("anything").await;
        assert_eq!(req, Requirements::default());
    }
}
