// src/main.rs
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aggregation;
mod config;
mod form_document;
mod form_fields;
mod period;
mod reconcile;
mod server;
mod workflow;
mod zoho_client;


use config::{AppConfig, FormDefaults};
use form_document::TemplateDocumentGenerator;
use period::SystemClock;
use server::AppState;
use workflow::{AbsenceNotificationService, WorkflowSettings};
use zoho_client::{ZohoConnectorClient, ZohoConnectorConfig};

#[derive(Parser, Debug)]
#[command(name = "absence-notifier", version, about = "Monthly absence notifications for CRM deals")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one batch and print the outcomes as JSON
    Run {
        /// Months before the current one to report on (defaults to MONTHS_AGO)
        #[arg(long)]
        months_ago: Option<u32>,
    },
    /// Start the HTTP trigger server
    Serve,
}

fn build_service(config: &AppConfig, form_defaults: FormDefaults) -> anyhow::Result<AbsenceNotificationService> {
    let timezone = config.timezone()?;
    let store = ZohoConnectorClient::new(&ZohoConnectorConfig {
        base_url: config.zoho_connector_url.clone(),
        timeout_secs: config.http_timeout_secs,
    })
    .context("Failed to create Zoho connector client")?;
    let documents =
        TemplateDocumentGenerator::new(&config.form_template_path, &config.output_dir);

    Ok(AbsenceNotificationService::new(
        Arc::new(store),
        Arc::new(documents),
        Arc::new(SystemClock),
        WorkflowSettings {
            timezone,
            decision_maker_role: config.decision_maker_role.clone(),
            form_defaults,
        },
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::from_env().context("Failed to load configuration from environment")?;
    let form_defaults = FormDefaults::from_env().context("Failed to load FORM_* defaults")?;
    let service = build_service(&config, form_defaults)?;
    info!(
        "Configuration loaded (connector: {}, timezone: {})",
        config.zoho_connector_url, config.business_timezone
    );

    match cli.command {
        Command::Run { months_ago } => {
            let months_ago = months_ago.unwrap_or(config.months_ago);
            let report = service
                .run(months_ago)
                .await
                .context("Absence notification run failed")?;
            println!("{}", serde_json::to_string_pretty(&report.outcomes)?);
        }
        Command::Serve => {
            let state = AppState {
                service: Arc::new(service),
                default_months_ago: config.months_ago,
            };
            server::serve(state, &config.server_host, config.server_port)
                .await
                .context("HTTP server failed")?;
        }
    }

    Ok(())
}
