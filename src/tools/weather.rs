//! Weather 工具：Open-Meteo 7 天预报
//!
//! 参数可给目的地名（内置坐标表解析）或直接给 lat/lon；
//! 未知目的地是 Permanent 失败，网络/5xx 按 Transient 处理。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::core::error::ToolFailure;
use crate::tools::{classify_http_error, classify_status, Tool};

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// 常见目的地坐标表；生产环境可换 geocoding 服务
const GEOCODE: &[(&str, f64, f64)] = &[
    ("paris", 48.8566, 2.3522),
    ("tokyo", 35.6762, 139.6503),
    ("london", 51.5074, -0.1278),
    ("new york", 40.7128, -74.0060),
    ("rome", 41.9028, 12.4964),
    ("barcelona", 41.3874, 2.1686),
    ("sydney", -33.8688, 151.2093),
    ("bangkok", 13.7563, 100.5018),
    ("berlin", 52.5200, 13.4050),
    ("lisbon", 38.7223, -9.1393),
];

pub struct WeatherTool {
    client: Client,
}

impl WeatherTool {
    pub fn new(timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    fn resolve_coords(args: &Value) -> Result<(f64, f64), ToolFailure> {
        if let (Some(lat), Some(lon)) = (args["lat"].as_f64(), args["lon"].as_f64()) {
            return Ok((lat, lon));
        }
        let destination = args["destination"]
            .as_str()
            .ok_or_else(|| ToolFailure::permanent("missing 'destination' or 'lat'/'lon'"))?;
        let key = destination.trim().to_lowercase();
        GEOCODE
            .iter()
            .find(|(name, _, _)| key.contains(name))
            .map(|(_, lat, lon)| (*lat, *lon))
            .ok_or_else(|| ToolFailure::permanent(format!("unknown destination: {destination}")))
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Get a 7-day weather forecast from Open-Meteo for a destination"
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolFailure> {
        let (lat, lon) = Self::resolve_coords(&args)?;
        let response = self
            .client
            .get(FORECAST_URL)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                (
                    "daily",
                    "weathercode,temperature_2m_max,temperature_2m_min".to_string(),
                ),
                ("forecast_days", "7".to_string()),
                ("timezone", "UTC".to_string()),
            ])
            .send()
            .await
            .map_err(|e| classify_http_error(&e))?;
        if let Some(failure) = classify_status(response.status()) {
            return Err(failure);
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ToolFailure::permanent(format!("malformed weather response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_destination() {
        let args = serde_json::json!({"destination": "Paris"});
        let (lat, lon) = WeatherTool::resolve_coords(&args).unwrap();
        assert!((lat - 48.8566).abs() < 0.001);
        assert!((lon - 2.3522).abs() < 0.001);
    }

    #[test]
    fn test_resolve_explicit_coords() {
        let args = serde_json::json!({"lat": 1.5, "lon": 2.5});
        assert_eq!(WeatherTool::resolve_coords(&args).unwrap(), (1.5, 2.5));
    }

    #[test]
    fn test_unknown_destination_is_permanent() {
        let args = serde_json::json!({"destination": "Atlantis"});
        let err = WeatherTool::resolve_coords(&args).unwrap_err();
        assert_eq!(err.kind, crate::core::error::FailureKind::Permanent);
    }
}
