mod cli;
mod config;
mod storage;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use color_eyre::Result;
use sealbox_core::storage::EntryStore;
use sealbox_storage::{
    bridge::{self, BridgeCall, BridgeReply},
    encrypted_store::EncryptedStore,
};
use serde_json::Value;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    let store_override = cli.store.as_deref();
    match cli.command.unwrap_or(Command::Health) {
        Command::Version => print_version(),
        Command::Health => run_health_check(&config, store_override).await?,
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        command => {
            let call = bridge_call(command)?;
            let store = storage::open_store(&config, store_override).await?;
            run_call(&store, call).await?
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info; logs go to stderr so replies stay parseable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("sealbox {}", env!("CARGO_PKG_VERSION"));
}

/// Runs a quick health check of the encrypted storage path.
async fn run_health_check(config: &config::Config, store_override: Option<&str>) -> Result<()> {
    let store = storage::open_store(config, store_override).await?;
    run_store_health(&store).await?;

    if store.is_encrypted().await {
        println!("Storage: ok (encrypted)");
    } else {
        println!("Storage: ok (UNENCRYPTED fallback)");
    }
    // Also covers plaintext records that could not be re-sealed on an encrypted open.
    for diagnostic in store.diagnostics().await {
        println!("  warning {}: {}", diagnostic.kind, diagnostic.message);
    }
    Ok(())
}

async fn run_store_health<S: EntryStore>(store: &EncryptedStore<S>) -> Result<()> {
    let check_key = "health/check";
    let payload = "ok";
    store.set_item(check_key, payload).await?;
    let round_trip = store.get_item(check_key).await?;
    store.remove_item(check_key).await?;

    if round_trip.as_deref() != Some(payload) {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

/// Translate a store subcommand into the bridge call it stands for.
fn bridge_call(command: Command) -> Result<BridgeCall> {
    let call = match command {
        Command::Set { key, value } => BridgeCall::SetItem { key, value },
        Command::Get { key } => BridgeCall::GetItem { key },
        Command::MultiGet { keys } => BridgeCall::MultiGet { keys },
        Command::MultiSet { pairs } => BridgeCall::MultiSet {
            pairs: pairs.iter().map(|pair| split_pair(pair)).collect(),
        },
        Command::Remove { mut keys } if keys.len() == 1 => BridgeCall::RemoveItem {
            key: keys.remove(0),
        },
        Command::Remove { keys } => BridgeCall::MultiRemove { keys },
        Command::Clear => BridgeCall::Clear,
        Command::Call { json } => serde_json::from_str(&json)?,
        Command::Version | Command::Health | Command::Config(_) => {
            color_eyre::eyre::bail!("not a store command")
        }
    };
    Ok(call)
}

/// `key=value` becomes a two-element pair; anything else is passed through so the
/// store rejects it as a malformed pair.
fn split_pair(raw: &str) -> Value {
    match raw.split_once('=') {
        Some((key, value)) => Value::Array(vec![key.into(), value.into()]),
        None => Value::Array(vec![raw.into()]),
    }
}

async fn run_call<S: EntryStore>(store: &EncryptedStore<S>, call: BridgeCall) -> Result<()> {
    let reply = bridge::dispatch(store, call).await;
    println!("{}", serde_json::to_string(&reply)?);

    if let BridgeReply::Rejected { error } = reply {
        warn!(kind = %error.kind, "call rejected");
        color_eyre::eyre::bail!(error.message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    #[tokio::test]
    async fn health_check_with_test_store_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = storage::test_store(dir.path()).await;
        run_store_health(&store)
            .await
            .expect("health check should succeed");
        assert_eq!(store.get_item("health/check").await.expect("get"), None);
    }

    #[tokio::test]
    async fn multi_set_command_round_trips_through_bridge() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = storage::test_store(dir.path()).await;

        let call = bridge_call(Command::MultiSet {
            pairs: vec!["user=alice".into(), "token=abc=123".into()],
        })
        .expect("call");
        run_call(&store, call).await.expect("multi-set");

        assert_eq!(
            store.get_item("token").await.expect("get").as_deref(),
            Some("abc=123")
        );
    }

    #[tokio::test]
    async fn pair_without_value_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = storage::test_store(dir.path()).await;

        let call = bridge_call(Command::MultiSet {
            pairs: vec!["user=alice".into(), "token".into()],
        })
        .expect("call");
        assert!(run_call(&store, call).await.is_err());
        assert_eq!(store.get_item("user").await.expect("get"), None);
    }

    #[test]
    fn single_remove_maps_to_remove_item() {
        let call = bridge_call(Command::Remove {
            keys: vec!["user".into()],
        })
        .expect("call");
        assert_eq!(call, BridgeCall::RemoveItem { key: "user".into() });

        let call = bridge_call(Command::Call {
            json: r#"{"method":"multiRemove","keys":["a","b"]}"#.into(),
        })
        .expect("call");
        assert_eq!(
            call,
            BridgeCall::MultiRemove {
                keys: vec!["a".into(), "b".into()]
            }
        );
    }
}
