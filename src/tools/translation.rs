//! Translation 工具：旅行常用语手册
//!
//! 内置分类短语表（问候 / 问路 / 餐厅 / 紧急），按目标语言返回对照；
//! 不支持的语言是 Permanent 失败。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::error::ToolFailure;
use crate::tools::Tool;

/// (类别, 英文, 法语, 日语, 西语)
const PHRASES: &[(&str, &str, &str, &str, &str)] = &[
    ("greetings", "Hello", "Bonjour", "こんにちは", "Hola"),
    ("greetings", "Thank you", "Merci", "ありがとう", "Gracias"),
    ("greetings", "Excuse me", "Excusez-moi", "すみません", "Perdón"),
    ("directions", "Where is the hotel?", "Où est l'hôtel ?", "ホテルはどこですか", "¿Dónde está el hotel?"),
    ("directions", "How do I get to the airport?", "Comment aller à l'aéroport ?", "空港へはどう行けばいいですか", "¿Cómo llego al aeropuerto?"),
    ("restaurant", "Can I see the menu?", "Puis-je voir le menu ?", "メニューを見せてください", "¿Puedo ver el menú?"),
    ("restaurant", "Check please", "L'addition, s'il vous plaît", "お会計をお願いします", "La cuenta, por favor"),
    ("restaurant", "I am vegetarian", "Je suis végétarien", "私はベジタリアンです", "Soy vegetariano"),
    ("emergency", "I need help", "J'ai besoin d'aide", "助けてください", "Necesito ayuda"),
    ("emergency", "Where is the hospital?", "Où est l'hôpital ?", "病院はどこですか", "¿Dónde está el hospital?"),
];

fn pick(
    language: &str,
    row: &(&'static str, &'static str, &'static str, &'static str, &'static str),
) -> Option<&'static str> {
    match language {
        "fr" | "french" => Some(row.2),
        "ja" | "japanese" => Some(row.3),
        "es" | "spanish" => Some(row.4),
        _ => None,
    }
}

#[derive(Default)]
pub struct TranslationTool;

#[async_trait]
impl Tool for TranslationTool {
    fn name(&self) -> &str {
        "translate"
    }

    fn description(&self) -> &str {
        "Translate common travel phrases into the destination language"
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolFailure> {
        let language = args["language"]
            .as_str()
            .ok_or_else(|| ToolFailure::permanent("missing 'language'"))?
            .trim()
            .to_lowercase();
        let category = args["category"].as_str().map(|c| c.to_lowercase());

        let mut phrases = Vec::new();
        for row in PHRASES {
            if let Some(cat) = &category {
                if row.0 != cat {
                    continue;
                }
            }
            match pick(&language, row) {
                Some(translated) => phrases.push(json!({
                    "category": row.0,
                    "en": row.1,
                    "translated": translated,
                })),
                None => {
                    return Err(ToolFailure::permanent(format!(
                        "unsupported language: {language}"
                    )))
                }
            }
        }
        if phrases.is_empty() {
            return Err(ToolFailure::permanent(format!(
                "unknown phrase category: {}",
                category.unwrap_or_default()
            )));
        }
        Ok(json!({"language": language, "phrases": phrases}))
    }
}
