use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use daybreak_shared::{TaskCreate, TaskId};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "daybreak",
    version,
    about = "Daybreak: a checklist of recurring daily tasks",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Add a recurring task.
    Add(AddArgs),

    /// Show the checklist for one day (default: today).
    Day {
        /// ISO date, `today`, `yesterday` or `tomorrow`.
        date: Option<String>,

        /// `default`, `alphabetical` or `reset-time`.
        #[arg(long)]
        sort: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// List every task in weekly order.
    List {
        #[arg(long)]
        json: bool,
    },

    /// Flip a task's completion for its current day.
    Toggle { id: TaskId, date: Option<String> },

    /// Remove a task and its history.
    Delete { id: TaskId },

    /// Existing titles containing QUERY.
    Suggest { query: String },

    /// Send due and reset reminders until interrupted.
    Watch {
        /// Check the current minute once and exit.
        #[arg(long)]
        once: bool,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct AddArgs {
    #[arg(required = true, num_args = 1..)]
    pub title: Vec<String>,

    #[arg(long, conflicts_with_all = ["weekly", "monthly"])]
    pub daily: bool,

    /// Days as names or indices with Sunday as 0, e.g. `mon,wed` or `1,3`.
    #[arg(long, value_name = "DAYS", conflicts_with = "monthly")]
    pub weekly: Option<String>,

    /// Day of the month, 1 to 31.
    #[arg(long, value_name = "DAY")]
    pub monthly: Option<String>,

    /// Reminder time, HH:MM.
    #[arg(long = "at", value_name = "HH:MM")]
    pub at: Option<String>,

    /// Time the task's day starts, HH:MM.
    #[arg(long, value_name = "HH:MM")]
    pub reset: Option<String>,
}

impl AddArgs {
    pub fn to_create(&self) -> TaskCreate {
        let (recurrence_type, recurrence_value) = if let Some(days) = &self.weekly {
            ("weekly", Some(days.clone()))
        } else if let Some(day) = &self.monthly {
            ("monthly", Some(day.clone()))
        } else {
            ("daily", None)
        };

        TaskCreate {
            title: self.title.join(" "),
            recurrence_type: recurrence_type.to_string(),
            recurrence_value,
            task_time: self.at.clone(),
            reset_time: self.reset.clone(),
        }
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                rest.split_once(':')
                    .map(|(k, v)| (format!("rc.{k}"), v.to_string()))
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
