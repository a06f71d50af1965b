use std::path::PathBuf;

use aegis_core::Collection;
use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "aegis",
    about = "Encrypted local storage for properties, simulations and settings",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Identity used for key derivation; falls back to `user` in the config.
    #[arg(long, global = true)]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Check that the data directory, audit key and crypto path work.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Store a JSON record and print its new id.
    Put {
        collection: Collection,
        json: String,
    },
    /// Print one record.
    Get { collection: Collection, id: String },
    /// Print every record of a collection.
    List { collection: Collection },
    /// Replace an existing record.
    Update {
        collection: Collection,
        id: String,
        json: String,
    },
    Delete { collection: Collection, id: String },
    /// Write an encrypted backup of a collection.
    Export {
        collection: Collection,
        file: PathBuf,
    },
    /// Restore a backup written by `export`.
    Import {
        collection: Collection,
        file: PathBuf,
    },
    /// Re-encrypt everything under AEGIS_NEW_PASSWORD.
    Rotate,
    /// Decrypt and check every record.
    Verify,
    /// Show lockout, schema and rotation state.
    Status,
    /// Print the security audit log.
    Audit,
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
    fn parses_health_subcommand() {
        let cli = Cli::try_parse_from(["aegis", "health"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Health);
        assert_eq!(cli.user, None);
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli = Cli::try_parse_from(["aegis", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
    }

    #[test]
    fn parses_put_with_global_user() {
        let cli = Cli::try_parse_from([
            "aegis",
            "put",
            "properties",
            r#"{"address":"Rua X","purchasePrice":850000}"#,
            "--user",
            "ana@example.com",
        ])
        .expect("parse should succeed");
        assert_eq!(cli.user.as_deref(), Some("ana@example.com"));
        assert_eq!(
            cli.command,
            Command::Put {
                collection: Collection::Properties,
                json: r#"{"address":"Rua X","purchasePrice":850000}"#.into(),
            }
        );
    }

    #[test]
    fn rejects_unknown_collection() {
        let err = Cli::try_parse_from(["aegis", "list", "contacts"]).expect_err("invalid");
        assert!(err.to_string().contains("unknown collection"));
    }

    #[test]
    fn requires_a_subcommand() {
        assert!(Cli::try_parse_from(["aegis"]).is_err());
    }
}
