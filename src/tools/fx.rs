//! FX 工具：Frankfurter 汇率换算
//!
//! 参数 {amount, base, target}；币种码必须是 3 位字母，否则 Permanent。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::core::error::ToolFailure;
use crate::tools::{classify_http_error, classify_status, Tool};

const FX_URL: &str = "https://api.frankfurter.app/latest";

pub struct FxTool {
    client: Client,
}

impl FxTool {
    pub fn new(timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    fn currency_code(args: &Value, key: &str) -> Result<String, ToolFailure> {
        let code = args[key]
            .as_str()
            .ok_or_else(|| ToolFailure::permanent(format!("missing '{key}'")))?
            .trim()
            .to_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ToolFailure::permanent(format!("invalid currency code: {code}")));
        }
        Ok(code)
    }
}

#[async_trait]
impl Tool for FxTool {
    fn name(&self) -> &str {
        "fx"
    }

    fn description(&self) -> &str {
        "Convert an amount between currencies using Frankfurter rates"
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolFailure> {
        let amount = args["amount"].as_f64().unwrap_or(100.0);
        if amount <= 0.0 {
            return Err(ToolFailure::permanent("amount must be positive"));
        }
        let base = Self::currency_code(&args, "base")?;
        let target = Self::currency_code(&args, "target")?;

        let response = self
            .client
            .get(FX_URL)
            .query(&[
                ("amount", amount.to_string()),
                ("from", base),
                ("to", target),
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
            .map_err(|e| ToolFailure::permanent(format!("malformed fx response: {e}")))
    }
}
