//! 结果合成：工具结果 -> 结构化行程计划
//!
//! 确定性组装 TripPlan：天气代码映射、引用来源、后续步骤；
//! 升级路径复用同一组装逻辑，附 error_note 输出降级但结构完整的响应。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::context::Requirements;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSummary {
    pub temperature_c: f64,
    pub conditions: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardAdvice {
    pub card: String,
    pub perk: String,
    pub fx_fee: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyInfo {
    pub base: String,
    pub target: String,
    pub rate: f64,
    pub converted_amount: f64,
}

/// 最终输出：字段缺失表示对应工具无结果；error_note 仅降级响应携带
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripPlan {
    pub destination: String,
    pub travel_dates: String,
    pub weather: Option<WeatherSummary>,
    pub results: Vec<SearchHit>,
    pub card_recommendation: Option<CardAdvice>,
    pub currency_info: Option<CurrencyInfo>,
    pub phrasebook: Option<Value>,
    pub citations: Vec<String>,
    pub next_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_note: Option<String>,
}

/// WMO weather code -> 人话
fn conditions_for(code: u64) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 | 48 => "Foggy",
        51 => "Light drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        71 => "Slight snow",
        80 => "Rain showers",
        _ => "Partly cloudy",
    }
}

fn weather_recommendation(code: u64) -> &'static str {
    match code {
        0..=2 => "Great weather for sightseeing!",
        51 | 61 | 80 => "Bring an umbrella, rain expected",
        _ => "Check weather updates before heading out",
    }
}

fn extract_weather(payload: &Value) -> Option<WeatherSummary> {
    let daily = payload.get("daily")?;
    let max = daily["temperature_2m_max"].as_array()?.first()?.as_f64()?;
    let min = daily["temperature_2m_min"].as_array()?.first()?.as_f64()?;
    let code = daily["weathercode"]
        .as_array()
        .and_then(|codes| codes.first())
        .and_then(|c| c.as_u64())
        .unwrap_or(0);
    let avg = (max + min) / 2.0;
    Some(WeatherSummary {
        temperature_c: (avg * 10.0).round() / 10.0,
        conditions: conditions_for(code).to_string(),
        recommendation: weather_recommendation(code).to_string(),
    })
}

fn extract_search(payload: &Value) -> Vec<SearchHit> {
    payload
        .as_array()
        .map(|items| {
            items
                .iter()
                .take(5)
                .filter_map(|item| {
                    Some(SearchHit {
                        title: item["title"].as_str()?.to_string(),
                        snippet: item["snippet"].as_str().unwrap_or_default().to_string(),
                        url: item["url"].as_str().unwrap_or_default().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extract_card(payload: &Value) -> Option<CardAdvice> {
    Some(CardAdvice {
        card: payload["card"].as_str()?.to_string(),
        perk: payload["perk"].as_str().unwrap_or_default().to_string(),
        fx_fee: payload["fx_fee"].as_f64().unwrap_or(0.0),
        reason: payload["reason"].as_str().unwrap_or_default().to_string(),
    })
}

/// Frankfurter 响应形如 {"amount": 100.0, "base": "USD", "rates": {"EUR": 92.1}}
fn extract_currency(payload: &Value) -> Option<CurrencyInfo> {
    let base = payload["base"].as_str()?.to_string();
    let amount = payload["amount"].as_f64().unwrap_or(1.0);
    let (target, converted) = payload["rates"].as_object()?.iter().next()?;
    let converted_amount = converted.as_f64()?;
    Some(CurrencyInfo {
        base,
        target: target.clone(),
        rate: if amount > 0.0 { converted_amount / amount } else { 0.0 },
        converted_amount,
    })
}

fn citations_for(results: &[(&str, &Value)], hits: &[SearchHit]) -> Vec<String> {
    let mut citations: Vec<String> = hits
        .iter()
        .take(3)
        .filter(|h| !h.url.is_empty())
        .map(|h| h.url.clone())
        .collect();
    for (tool, _) in results {
        match *tool {
            "weather" => citations.push("https://open-meteo.com - Weather data".to_string()),
            "fx" => citations.push("https://www.frankfurter.app - Currency rates".to_string()),
            _ => {}
        }
    }
    if citations.is_empty() {
        citations.push("No external sources cited".to_string());
    }
    citations
}

fn next_steps_for(requirements: &Requirements, weather: &Option<WeatherSummary>) -> Vec<String> {
    let destination = requirements
        .destination
        .clone()
        .unwrap_or_else(|| "your destination".to_string());
    let mut steps = vec![
        format!("Book your flights to {destination}"),
        format!("Reserve accommodations in {destination}"),
    ];
    if let Some(w) = weather {
        if w.conditions.to_lowercase().contains("rain") {
            steps.push("Pack rain gear and umbrella".to_string());
        }
        if w.temperature_c > 25.0 {
            steps.push("Pack light, breathable clothing for warm weather".to_string());
        } else if w.temperature_c < 15.0 {
            steps.push("Pack warm clothing and layers".to_string());
        }
    }
    steps.push("Research local attractions and create an itinerary".to_string());
    steps.push("Notify your credit card company of travel plans".to_string());
    steps
}

/// 合成器：对 (工具名, 结果) 集合做确定性组装
#[derive(Default)]
pub struct Synthesizer;

impl Synthesizer {
    pub fn new() -> Self {
        Self
    }

    pub fn synthesize(
        &self,
        results: &[(&str, &Value)],
        requirements: &Requirements,
        error_note: Option<String>,
    ) -> TripPlan {
        let find = |name: &str| results.iter().find(|(tool, _)| *tool == name).map(|(_, v)| *v);

        let weather = find("weather").and_then(extract_weather);
        let hits = find("search").map(|v| extract_search(v)).unwrap_or_default();
        let card_recommendation = find("card").and_then(extract_card);
        let currency_info = find("fx").and_then(extract_currency);
        let phrasebook = find("translate").cloned();
        let citations = citations_for(results, &hits);
        let next_steps = next_steps_for(requirements, &weather);

        TripPlan {
            destination: requirements
                .destination
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            travel_dates: requirements
                .dates
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            weather,
            results: hits,
            card_recommendation,
            currency_info,
            phrasebook,
            citations,
            next_steps,
            error_note,
        }
    }
}
