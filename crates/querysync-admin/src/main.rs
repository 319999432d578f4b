//! querysync-admin - run one merchant dashboard command against the admin API.
//!
//! Reads go through the query cache and writes through mutations, so a write
//! followed by a read in the same process always sees the invalidated state.

use std::io;

use anyhow::{Context, Result};
use querysync_admin::models::{MerchantRef, MerchantUpdate, RefundRequest};
use querysync_admin::{Command, Config, HttpTransport, MerchantDashboard};
use querysync_core::{QueryClient, QueryHandle};
use serde::Serialize;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directory for an additional log file, unset for stderr only
const LOG_DIR_ENV: &str = "QUERYSYNC_LOG_DIR";

/// Log file name prefix inside `QUERYSYNC_LOG_DIR`
const LOG_FILE_PREFIX: &str = "querysync-admin.log";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the file writer on drop and must be kept alive.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the handle's value, or fail with the fetch error
fn print_query<T>(handle: &QueryHandle<T>) -> Result<()>
where
    T: Serialize + Send + Sync + 'static,
{
    let entry = handle.entry();
    if let Some(error) = entry.error {
        return Err(error).with_context(|| format!("Failed to load {}", handle.key()));
    }
    match handle.value() {
        Some(value) => print_json(value.as_ref()),
        None => anyhow::bail!("No data for {}", handle.key()),
    }
}

async fn run(dashboard: &MerchantDashboard<HttpTransport>, command: Command) -> Result<()> {
    match command {
        Command::Merchants { status } => {
            let handle = dashboard.merchants(status.as_deref()).await?;
            print_query(&handle)
        }
        Command::Merchant { id } => {
            let handle = dashboard.merchant(&id).await?;
            print_query(&handle)
        }
        Command::Rename { id, name } => {
            let mut update = dashboard.update_merchant();
            let merchant = update.trigger(MerchantUpdate { id, name }).await?;
            if let Some(report) = update.last_report() {
                info!(invalidated = report.invalidated, "Cache entries invalidated");
            }
            print_json(merchant.as_ref())
        }
        Command::Delete { id } => {
            dashboard
                .delete_merchant()
                .trigger(MerchantRef { id: id.clone() })
                .await?;
            print_json(&serde_json::json!({ "deleted": id }))
        }
        Command::Orders {
            customer_id,
            status,
        } => {
            let handle = dashboard
                .customer_orders(&customer_id, status.as_deref())
                .await?;
            print_query(&handle)
        }
        Command::Refund {
            customer_id,
            order_id,
        } => {
            let order = dashboard
                .refund_order()
                .trigger(RefundRequest {
                    customer_id,
                    order_id,
                })
                .await?;
            print_json(order.as_ref())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("-h" | "--help")) {
        println!("{}", querysync_admin::USAGE);
        return Ok(());
    }
    let command = match Command::parse(&args[..]) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let _log_guard = init_tracing();

    let config = Config::load().context("Failed to load configuration")?;
    info!(base_url = %config.base_url, "querysync-admin starting");

    let mut transport =
        HttpTransport::new(config.base_url.clone()).context("Failed to build HTTP client")?;
    if let Some(token) = config.token.clone() {
        transport = transport.with_token(token);
    }

    let client = QueryClient::new(config.client.clone());
    let dashboard = MerchantDashboard::new(client, transport)?;

    run(&dashboard, command).await
}
