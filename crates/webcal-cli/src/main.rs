mod config;

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use webcal_engine::{sort_occurrences, CalendarDocument, CalendarSource, EventTime, Occurrence};

use crate::config::resolve_source_config;

#[derive(Parser)]
#[command(name = "webcal", version)]
#[command(about = "Query iCalendar calendars hosted on WebDAV servers", long_about = None)]
struct Cli {
    /// Log more (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Calendar or collection URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// WebDAV username (password comes from WEBCAL_PASSWORD or the config file)
    #[arg(long, global = true)]
    username: Option<String>,

    /// Directory for the download cache
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Events starting in the next few days, across every calendar
    Upcoming {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// List the calendars of the source
    Calendars,
    /// Query a local .ics file
    Query {
        #[arg(long)]
        file: PathBuf,

        #[command(flatten)]
        window: Window,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Window {
    /// Events starting at or before T (RFC 3339)
    #[arg(long, value_name = "T", value_parser = parse_instant)]
    before: Option<DateTime<Utc>>,

    /// Events starting at or after T (RFC 3339)
    #[arg(long, value_name = "T", value_parser = parse_instant)]
    after: Option<DateTime<Utc>>,

    /// Events starting within [START, END] (RFC 3339)
    #[arg(long, num_args = 2, value_names = ["START", "END"], value_parser = parse_instant)]
    between: Option<Vec<DateTime<Utc>>>,
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 instant like 2010-08-13T00:00:00Z: {e}"))
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .init();
}

fn print_lines(mut lines: Vec<(EventTime, String)>) {
    lines.sort_by_key(|(start, _)| *start);
    for (start, summary) in lines {
        println!("{start}  {summary}");
    }
}

fn to_lines(occurrences: &[Occurrence<'_>]) -> Vec<(EventTime, String)> {
    occurrences
        .iter()
        .map(|o| (o.start, o.event.summary().unwrap_or("(no summary)").to_string()))
        .collect()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Upcoming { days } => {
            let config = resolve_source_config(cli.url, cli.username, cli.cache_dir)?;
            let mut source = CalendarSource::from_config(&config);
            let now = Utc::now();
            let until = now + TimeDelta::days(i64::from(days));

            let mut lines = Vec::new();
            for (id, document) in source
                .calendars()
                .with_context(|| format!("fetching calendars from {}", config.url))?
            {
                let found = document
                    .events_between(now, until)
                    .with_context(|| format!("querying calendar {id}"))?;
                lines.extend(to_lines(&found));
            }
            print_lines(lines);
        }
        Command::Calendars => {
            let config = resolve_source_config(cli.url, cli.username, cli.cache_dir)?;
            let mut source = CalendarSource::from_config(&config);
            for id in source
                .calendar_ids()
                .with_context(|| format!("listing {}", config.url))?
            {
                println!("{id}");
            }
        }
        Command::Query { file, window } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let document = CalendarDocument::parse(&text)
                .with_context(|| format!("parsing {}", file.display()))?;
            tracing::debug!(file = %file.display(), events = document.events().len(), "loaded calendar");

            let mut found = match (window.before, window.after, window.between.as_deref()) {
                (Some(t), _, _) => document.events_before(t)?,
                (_, Some(t), _) => document.events_after(t)?,
                (_, _, Some([start, end])) => {
                    if start > end {
                        bail!("--between: START is after END");
                    }
                    document.events_between(*start, *end)?
                }
                _ => bail!("one of --before, --after or --between is required"),
            };
            sort_occurrences(&mut found);
            print_lines(to_lines(&found));
        }
    }

    Ok(())
}
