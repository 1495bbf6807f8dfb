use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use matchmaking::EntityType;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Engine config TOML (MATCHMAKING_* environment variables override it)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Entity snapshot JSON with `offers` and `demands`
    #[arg(long, global = true)]
    pub entities: Option<PathBuf>,

    /// Escalation queue (JSONL); escalations are kept in memory when unset
    #[arg(long, global = true)]
    pub escalations: Option<PathBuf>,

    /// Append one JSON line per run to this file
    #[arg(long, global = true)]
    pub run_log: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Recompute every eligible pair
    Full,

    /// Recompute pairs touching entities updated after a timestamp
    Incremental {
        /// RFC 3339 timestamp, e.g. 2026-01-31T00:00:00Z
        #[arg(long)]
        since: DateTime<Utc>,
    },

    /// Invalidate one entity and recompute its pairs
    Entity {
        /// `offer` or `demand`
        #[arg(long)]
        kind: EntityType,

        #[arg(long)]
        id: String,
    },

    /// Full scan, then incremental rescans on the configured interval
    Watch,

    /// Print cache counters and run-log totals
    Stats,

    /// Check that the model endpoint answers
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_trigger_parses() {
        let cli = Cli::try_parse_from([
            "match-runner",
            "--entities",
            "snapshot.json",
            "entity",
            "--kind",
            "demand",
            "--id",
            "a1",
        ])
        .unwrap();
        assert_eq!(cli.entities, Some(PathBuf::from("snapshot.json")));
        assert_eq!(
            cli.command,
            Command::Entity {
                kind: EntityType::Demand,
                id: "a1".into()
            }
        );
    }

    #[test]
    fn test_incremental_requires_rfc3339() {
        let cli = Cli::try_parse_from([
            "match-runner",
            "incremental",
            "--since",
            "2026-01-31T00:00:00Z",
        ])
        .unwrap();
        let Command::Incremental { since } = cli.command else {
            panic!("expected incremental");
        };
        assert_eq!(since.to_rfc3339(), "2026-01-31T00:00:00+00:00");

        assert!(Cli::try_parse_from(["match-runner", "incremental", "--since", "yesterday"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["match-runner", "full", "--config", "engine.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("engine.toml")));
        assert_eq!(cli.command, Command::Full);
    }
}
