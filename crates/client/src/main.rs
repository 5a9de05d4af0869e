//! UCE Client - command-line connector for the trading backend.
//!
//! With no arguments, connects and streams push updates until Ctrl-C.
//! With an action (and optional JSON object of fields), sends that command,
//! prints the reply and exits:
//!
//! ```text
//! uce-client get_account_data '{"account_id": "a1"}'
//! ```

use anyhow::{bail, Context};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uce_client::{BusEvent, ClientConfig, Connector, OutboundCommand, TOPIC_ERROR};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uce_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env().context("invalid client configuration")?;
    let command = command_from_args(std::env::args().skip(1))?;

    tracing::info!(url = %config.url, correlation = ?config.correlation, "Starting UCE client");
    let connector = Connector::new(config);

    connector
        .on(TOPIC_ERROR, |event| {
            if let BusEvent::Error { error } = event {
                tracing::warn!(%error, "Connection error");
            }
        })
        .await;

    connector
        .connect()
        .await
        .context("could not connect to the trading backend")?;

    match command {
        Some(command) => {
            let action = command.action().to_string();
            let result = connector.send_message(command).await;
            connector.disconnect().await;
            let reply = result.with_context(|| format!("{action} failed"))?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        None => {
            connector
                .on_message("account_info", |payload| {
                    tracing::info!(%payload, "Account info");
                    Ok(())
                })
                .await;
            connector
                .on_message("realtime_update", |payload| {
                    tracing::info!(
                        balance = %payload["total_balance"],
                        equity = %payload["total_equity"],
                        "Realtime update"
                    );
                    Ok(())
                })
                .await;

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            connector.disconnect().await;
        }
    }

    Ok(())
}

fn command_from_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Option<OutboundCommand>> {
    let Some(action) = args.next() else {
        return Ok(None);
    };

    let mut command = OutboundCommand::new(action);
    if let Some(raw) = args.next() {
        let fields: Value = serde_json::from_str(&raw).context("fields must be valid JSON")?;
        let Value::Object(fields) = fields else {
            bail!("fields must be a JSON object");
        };
        for (key, value) in fields {
            command = command.with_field(key, value);
        }
    }
    Ok(Some(command))
}
