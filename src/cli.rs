//! Command-line interface definitions.

use anyhow::bail;
use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};

use crate::task::Kwargs;

#[derive(Debug, Parser)]
#[command(name = "roomflow", version, about = "Scheduled automation flows with self-healing sessions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scheduler until interrupted
    Serve,

    /// Run a flow or task once and print its report
    Run {
        /// Flow or task identifier
        id: String,

        /// Keyword arguments as `--key value` pairs
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List tasks and flows
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Action Summary totals from the log file
    Summary {
        #[arg(long, value_enum, default_value_t = Period::Today)]
        period: Period,
    },

    /// Manage cached login sessions
    Auth {
        #[command(subcommand)]
        action: AuthCommand,
    },

    /// Inspect the schedule and manage saved schedule profiles
    Schedule {
        #[command(subcommand)]
        action: ScheduleCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ScheduleCommand {
    /// Schedule state of every schedulable task and flow
    Show,
    /// List saved schedule profiles
    Profiles,
    /// Save the current schedule as a named profile
    Save { name: String },
    /// Replace the current schedule with a saved profile
    Load { name: String },
    /// Delete a saved profile
    Delete { name: String },
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Show the cached session for a profile
    Status { profile: Option<String> },
    /// Copy the cached session into the backup slot
    Backup { profile: Option<String> },
    /// Replace the cached session with the backup
    Restore { profile: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Period {
    /// The last 24 hours
    #[value(name = "24h")]
    Last24h,
    /// Since local midnight
    Today,
}

impl Period {
    pub fn since(&self, now: DateTime<Local>) -> DateTime<Utc> {
        let day_ago = now - Duration::hours(24);
        match self {
            Self::Last24h => day_ago.with_timezone(&Utc),
            Self::Today => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
                .unwrap_or(day_ago)
                .with_timezone(&Utc),
        }
    }
}

/// Parse `--key value`, `--key=value` and bare `--flag` tokens.
///
/// Values that parse as JSON keep their type (`25` is a number, `true` a
/// bool); anything else is a string.
pub fn parse_kwargs(args: &[String]) -> anyhow::Result<Kwargs> {
    let mut kwargs = Kwargs::new();
    let mut tokens = args.iter().peekable();

    while let Some(token) = tokens.next() {
        let Some(flag) = token.strip_prefix("--") else {
            bail!("Expected --key, got '{}'", token);
        };
        let (key, raw) = match flag.split_once('=') {
            Some((key, value)) => (key, Some(value.to_string())),
            None => {
                let value = tokens
                    .next_if(|next| !next.starts_with("--"))
                    .cloned();
                (flag, value)
            }
        };
        if key.is_empty() {
            bail!("Empty argument name in '{}'", token);
        }

        let value = match raw {
            Some(raw) => serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)),
            None => serde_json::Value::Bool(true),
        };
        kwargs.insert(key.replace('-', "_"), value);
    }

    Ok(kwargs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_kwargs() {
        let kwargs = parse_kwargs(&strings(&[
            "--count",
            "25",
            "--dry-run",
            "--keyword=キッチン 収納",
            "--target",
            "flow_count",
            "--headless",
            "false",
        ]))
        .unwrap();

        assert_eq!(kwargs["count"], json!(25));
        assert_eq!(kwargs["dry_run"], json!(true));
        assert_eq!(kwargs["keyword"], json!("キッチン 収納"));
        assert_eq!(kwargs["target"], json!("flow_count"));
        assert_eq!(kwargs["headless"], json!(false));
    }

    #[test]
    fn test_parse_kwargs_rejects_positional() {
        assert!(parse_kwargs(&strings(&["count", "5"])).is_err());
        assert!(parse_kwargs(&strings(&["--", "5"])).is_err());
    }

    #[test]
    fn test_cli_shape() {
        let cli = Cli::try_parse_from(["roomflow", "run", "like-flow", "--count", "5"]).unwrap();
        let Command::Run { id, args } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(id, "like-flow");
        assert_eq!(args, strings(&["--count", "5"]));

        let cli = Cli::try_parse_from(["roomflow", "schedule", "save", "平日 v2"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Schedule {
                action: ScheduleCommand::Save { ref name }
            } if name == "平日 v2"
        ));

        let cli = Cli::try_parse_from(["roomflow", "list", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::List { json: true }));

        let cli = Cli::try_parse_from(["roomflow", "summary", "--period", "24h"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Summary {
                period: Period::Last24h
            }
        ));
    }

    #[test]
    fn test_period_today_starts_at_midnight() {
        let now = Local::now();
        let since = Period::Today.since(now).with_timezone(&Local);
        assert_eq!(since.date_naive(), now.date_naive());
        assert!(since <= now);
        assert!(Period::Last24h.since(now) < now.with_timezone(&Utc));
    }
}
