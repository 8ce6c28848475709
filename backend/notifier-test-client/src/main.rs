// src/main.rs

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;

// Response types
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    time: String,
}

#[derive(Debug, Deserialize)]
struct Period {
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    message: String,
    period: Period,
    outcomes: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct TriggerRequest {
    months_ago: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let base_url =
        std::env::var("NOTIFIER_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let months_ago = std::env::args().nth(1).map(|arg| arg.parse::<u32>()).transpose()?;
    let client = Client::new();

    // Test 1: Status check
    println!("\n🔍 Testing status endpoint...");
    let status = client
        .get(format!("{}/status", base_url))
        .send()
        .await?
        .json::<StatusResponse>()
        .await?;
    println!("Status: {} at {}", status.status, status.time);

    // Test 2: Trigger a run
    println!("\n🔍 Triggering absence notification run...");
    let response = client
        .post(format!("{}/api/absences-notification", base_url))
        .json(&TriggerRequest { months_ago })
        .send()
        .await?;

    if !response.status().is_success() {
        println!("Trigger failed with status {}", response.status());
        println!("Body: {}", response.text().await?);
        return Ok(());
    }

    let report = response.json::<TriggerResponse>().await?;
    println!("{}", report.message);
    println!("Period: {} .. {}", report.period.start, report.period.end);
    for outcome in &report.outcomes {
        let kind = outcome["outcome"].as_str().unwrap_or("unknown");
        let deal_id = outcome["deal_id"].as_str().unwrap_or("?");
        match kind {
            "failed" => println!(
                "  ❌ deal {}: {}",
                deal_id,
                outcome["error"].as_str().unwrap_or_default()
            ),
            "generated" => println!(
                "  ✅ deal {}: notification {} ({} days, {} total)",
                deal_id, outcome["notification_id"], outcome["period_days"], outcome["total_days"]
            ),
            other => println!("  ⏭️  deal {}: {}", deal_id, other),
        }
    }

    Ok(())
}
