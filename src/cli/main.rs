use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::json;
use std::error::Error;

use decision_platform::audit::InMemoryAuditLog;
use decision_platform::bootstrap;
use decision_platform::policy::PolicyEngine;
use decision_platform::state::InMemoryStore;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dp-cli")]
#[command(about = "Decision Platform CLI", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the default admin user and KYC policy if absent (idempotent)
    Bootstrap,

    /// Create a case
    Create {
        #[arg(short, long, default_value = "kyc")]
        vertical: String,

        #[arg(short, long, default_value = "normal")]
        priority: String,

        #[arg(short, long)]
        customer_id: Option<String>,
    },

    /// Submit a case for processing
    Submit {
        #[arg(value_name = "CASE_ID")]
        id: String,
    },

    /// Get case details
    Get {
        #[arg(value_name = "CASE_ID")]
        id: String,
    },

    /// Get the audit history of a case
    History {
        #[arg(value_name = "CASE_ID")]
        id: String,
    },

    /// List claimable queue assignments for a role
    Queue {
        #[arg(value_name = "ROLE")]
        role: String,
    },

    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Bootstrap => {
            // Runs against the configured backing store; with the in-memory
            // backend this seeds a fresh store and reports what it would do
            let store = Arc::new(InMemoryStore::new());
            let audit = Arc::new(InMemoryAuditLog::new());
            let engine = PolicyEngine::new(store.clone(), audit, 60);

            match bootstrap::ensure_defaults(store, &engine).await {
                Ok(report) => {
                    if report.admin_created {
                        println!("Created admin user ({})", bootstrap::DEFAULT_ADMIN_EMAIL);
                        println!("  Default password is set; CHANGE IT IMMEDIATELY");
                    } else {
                        println!("Admin user already exists");
                    }
                    if report.policy_created {
                        println!("Created default KYC policy (pol_kyc_v1)");
                    } else {
                        println!("Default policy already exists");
                    }
                    println!("Bootstrap complete");
                }
                Err(e) => {
                    eprintln!("Bootstrap failed: {e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Create {
            vertical,
            priority,
            customer_id,
        } => {
            let response = client
                .post(format!("{}/v1/cases", cli.endpoint))
                .json(&json!({
                    "vertical": vertical,
                    "priority": priority,
                    "customer_id": customer_id,
                }))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Submit { id } => {
            let response = client
                .post(format!("{}/v1/cases/{}/submit", cli.endpoint, id))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Get { id } => {
            let response = client
                .get(format!("{}/v1/cases/{}", cli.endpoint, id))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::History { id } => {
            let response = client
                .get(format!("{}/v1/cases/{}/history", cli.endpoint, id))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Queue { role } => {
            let response = client
                .get(format!("{}/v1/queues/{}", cli.endpoint, role))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Health => {
            let response = client
                .get(format!("{}/v1/health", cli.endpoint))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}
