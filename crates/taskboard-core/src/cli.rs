use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
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
    name = "taskboard",
    version,
    about = "Taskboard: to-do board with due-date buckets",
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

    #[arg(long = "rc-file", global = true)]
    pub rc_file: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Sign in as the given user id.
    Login {
        user_id: String,
        #[arg(long)]
        email: Option<String>,
    },
    Logout,
    Whoami,
    Add {
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// today, tomorrow, friday, +3d, 2024-06-10, 2024-06-10T15:00, ...
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        image: Option<PathBuf>,
    },
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, conflicts_with = "no_due")]
        due: Option<String>,
        #[arg(long)]
        no_due: bool,
        #[arg(long, conflicts_with = "remove_image")]
        image: Option<PathBuf>,
        #[arg(long)]
        remove_image: bool,
    },
    Show {
        id: String,
    },
    Done {
        id: String,
    },
    Reopen {
        id: String,
    },
    Delete {
        id: String,
    },
    List(ListArgs),
    /// Move a task between board columns, as a drag and drop would.
    Move {
        id: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        view: Option<String>,
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// all, today, week, month or overdue
    #[arg(long)]
    pub filter: Option<String>,
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long)]
    pub to: Option<String>,
    #[arg(long, default_value = "")]
    pub search: String,
    /// status or due
    #[arg(long)]
    pub view: Option<String>,
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
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) overrides out of the
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
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
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

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "taskboard",
            "rc.color=off",
            "list",
            "rc.week.start:monday",
        ]))
        .unwrap();
        assert_eq!(pre.cleaned_args, args(&["taskboard", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.week.start".to_string(), "monday".to_string()),
            ]
        );
    }

    #[test]
    fn global_flags_parse_after_the_subcommand() {
        let cli = GlobalCli::try_parse_from(args(&[
            "taskboard",
            "move",
            "abc",
            "--from",
            "today",
            "--to",
            "tomorrow",
            "--view",
            "due",
            "-vv",
            "--rc",
            "timezone=America/Sao_Paulo",
        ]))
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.rc_overrides[0].key, "timezone");
        assert!(matches!(
            cli.command,
            Some(Command::Move { ref to, index: 0, .. }) if to == "tomorrow"
        ));
    }

    #[test]
    fn edit_rejects_conflicting_image_flags() {
        let result = GlobalCli::try_parse_from(args(&[
            "taskboard",
            "edit",
            "abc",
            "--image",
            "a.png",
            "--remove-image",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn bare_invocation_has_no_command() {
        let cli = GlobalCli::try_parse_from(args(&["taskboard"])).unwrap();
        assert!(cli.command.is_none());
    }
}
