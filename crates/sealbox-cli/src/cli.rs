use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "sealbox",
    about = "Encrypted key-value store backed by the OS keychain",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Store to operate on; overrides `store_name` from the config file.
    #[arg(long, global = true)]
    pub store: Option<String>,

    /// Optional subcommand; defaults to a health check when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Round-trip a check entry and report whether the store is encrypted.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Store one value.
    Set { key: String, value: String },
    /// Read one value.
    Get { key: String },
    /// Read several values at once.
    MultiGet {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Store several `key=value` pairs in one atomic batch.
    MultiSet {
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Remove one or more keys in one atomic batch.
    Remove {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Remove every entry from the store.
    Clear,
    /// Dispatch a raw JSON bridge call, e.g. `{"method":"getItem","key":"user"}`.
    Call { json: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_health_when_missing_subcommand() {
        let cli = Cli::try_parse_from(["sealbox"]).expect("parse should succeed");
        assert_eq!(cli.command, None);
        assert_eq!(cli.store, None);
    }

    #[test]
    fn parses_set_with_store_override() {
        let cli = Cli::try_parse_from(["sealbox", "--store", "prefs", "set", "user", "alice"])
            .expect("parse should succeed");
        assert_eq!(cli.store.as_deref(), Some("prefs"));
        assert_eq!(
            cli.command,
            Some(Command::Set {
                key: "user".into(),
                value: "alice".into()
            })
        );
    }

    #[test]
    fn parses_multi_get_keys() {
        let cli = Cli::try_parse_from(["sealbox", "multi-get", "user", "token"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::MultiGet {
                keys: vec!["user".into(), "token".into()]
            })
        );
    }

    #[test]
    fn remove_requires_a_key() {
        assert!(Cli::try_parse_from(["sealbox", "remove"]).is_err());
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli =
            Cli::try_parse_from(["sealbox", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::Config(ConfigCommand::Init)));
    }
}
