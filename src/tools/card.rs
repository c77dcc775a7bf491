//! Card 工具：按 MCC 类别与国家推荐信用卡
//!
//! 无外部依赖的静态规则表：匹配类别权益，境外消费优先零外汇手续费的卡。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::error::ToolFailure;
use crate::tools::Tool;

struct CardProfile {
    name: &'static str,
    /// (MCC 类别, 权益描述)；"default" 兜底
    perks: &'static [(&'static str, &'static str)],
    fx_fee: f64,
    annual_fee: u32,
}

const CARDS: &[CardProfile] = &[
    CardProfile {
        name: "Chase Sapphire Reserve",
        perks: &[
            ("airlines", "3x points on travel and dining"),
            ("hotels", "3x points on travel and dining"),
            ("restaurants", "3x points on travel and dining"),
            ("default", "1x points on all purchases"),
        ],
        fx_fee: 0.0,
        annual_fee: 550,
    },
    CardProfile {
        name: "Amex Platinum",
        perks: &[
            ("airlines", "5x points on flights booked directly with airlines"),
            ("hotels", "5x points on hotels booked through Amex Travel"),
            ("default", "1x points on all purchases"),
        ],
        fx_fee: 0.0,
        annual_fee: 695,
    },
    CardProfile {
        name: "Capital One Venture X",
        perks: &[
            ("airlines", "2x miles on all purchases"),
            ("hotels", "10x miles on hotels and rental cars booked through the travel portal"),
            ("restaurants", "2x miles on all purchases"),
            ("default", "2x miles on all purchases"),
        ],
        fx_fee: 0.0,
        annual_fee: 395,
    },
    CardProfile {
        name: "BankGold",
        perks: &[("default", "1.5x points on all purchases")],
        fx_fee: 0.03,
        annual_fee: 0,
    },
];

/// MCC -> 类别：3000-3999 航司、4000-4999 酒店、5812 餐厅，其余 default
fn mcc_category(mcc: &str) -> &'static str {
    match mcc.trim().parse::<u32>() {
        Ok(code) if (3000..=3999).contains(&code) => "airlines",
        Ok(code) if (4000..=4999).contains(&code) => "hotels",
        Ok(5812) => "restaurants",
        _ => "default",
    }
}

fn perk_for(card: &CardProfile, category: &str) -> Option<&'static str> {
    card.perks
        .iter()
        .find(|(cat, _)| *cat == category)
        .or_else(|| card.perks.iter().find(|(cat, _)| *cat == "default"))
        .map(|(_, perk)| *perk)
}

#[derive(Default)]
pub struct CardTool;

#[async_trait]
impl Tool for CardTool {
    fn name(&self) -> &str {
        "card"
    }

    fn description(&self) -> &str {
        "Recommend a credit card for a merchant category and country"
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolFailure> {
        let mcc = args["mcc"].as_str().unwrap_or("default");
        let amount = args["amount"].as_f64().unwrap_or(100.0);
        let country = args["country"].as_str().unwrap_or("US").to_uppercase();
        let category = mcc_category(mcc);
        let foreign = country != "US";

        // 指定了持有卡则只评估该卡
        let candidates: Vec<&CardProfile> = match args["preferred_card"].as_str() {
            Some(name) => {
                let wanted = name.trim().to_lowercase();
                let found: Vec<&CardProfile> = CARDS
                    .iter()
                    .filter(|c| c.name.to_lowercase() == wanted)
                    .collect();
                if found.is_empty() {
                    return Err(ToolFailure::permanent(format!("unknown card: {name}")));
                }
                found
            }
            None => CARDS.iter().collect(),
        };

        // 境外消费优先零外汇手续费，其次类别权益命中
        let best = candidates
            .iter()
            .min_by(|a, b| {
                let fee_a = if foreign { a.fx_fee } else { 0.0 };
                let fee_b = if foreign { b.fx_fee } else { 0.0 };
                fee_a
                    .partial_cmp(&fee_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        let hit_a = a.perks.iter().any(|(cat, _)| *cat == category);
                        let hit_b = b.perks.iter().any(|(cat, _)| *cat == category);
                        hit_b.cmp(&hit_a)
                    })
            })
            .expect("candidate list is never empty");

        let fx_fee = if foreign { best.fx_fee } else { 0.0 };
        let estimated_fee = amount * fx_fee;
        Ok(json!({
            "card": best.name,
            "perk": perk_for(best, category),
            "category": category,
            "fx_fee": fx_fee,
            "estimated_fee": (estimated_fee * 100.0).round() / 100.0,
            "annual_fee": best.annual_fee,
            "reason": if foreign {
                format!("No/lowest foreign transaction fee with a matching {category} perk")
            } else {
                format!("Best {category} perk for domestic spend")
            },
        }))
    }
}
