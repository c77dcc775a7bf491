//! CLI 入口：单条请求 -> 行程计划 JSON

use voya::agent::Agent;
use voya::config::load_config;
use voya::core::AgentResponse;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    voya::observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let query = if args.is_empty() {
        "I want to go to Paris from 2026-06-01 to 2026-06-08 with my BankGold card".to_string()
    } else {
        args.join(" ")
    };

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });
    let agent = Agent::from_config(&cfg).await?;

    let session = std::env::var("VOYA_SESSION").unwrap_or_else(|_| "cli".to_string());
    match agent.handle_request(&query, &session).await? {
        AgentResponse::Plan(plan) | AgentResponse::Degraded(plan) => {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        AgentResponse::NeedsClarification { question } => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "clarification": question }))?
            );
        }
    }
    Ok(())
}
