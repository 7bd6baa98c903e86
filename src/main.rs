//! # Study Tracker
//!
//! Command-line front end: manage activities, log or time sessions, and
//! report statistics, KPIs and Excel exports.
//!
//! ## Usage
//!
//! ```bash
//! study-tracker activity add "AUTOSAR" --target 2
//! study-tracker track "AUTOSAR"
//! study-tracker export --days 30
//! ```

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use log::{debug, warn};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use study_tracker::advisor::{advise, NeutralAdvisor};
use study_tracker::common::{parse_date, today};
use study_tracker::display::{
    format_activities, format_advice, format_entries, format_kpis, format_stats, format_tick,
    Colors,
};
use study_tracker::models::{ActivityUpdate, DateRange, EntryUpdate};
use study_tracker::timer::TimerEvent;
use study_tracker::{
    compute_kpis, compute_stats, export_range, version_string, Config, ExcelExporter, Result,
    SessionOutcome, SessionTimer, SqliteDatabase,
};

/// Study Tracker - per-activity time tracking with statistics and Excel export
#[derive(Parser)]
#[command(name = "study-tracker")]
#[command(version = env!("TRACKER_VERSION"))]
#[command(about = "Track study and work sessions per activity", long_about = None)]
struct Cli {
    /// Show detailed version information
    #[arg(long = "version-full")]
    version_full: bool,

    /// Use this config file instead of the standard locations
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the database path from the config
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage activities
    Activity {
        #[command(subcommand)]
        action: ActivityAction,
    },

    /// Add hours to an entry (creates it when missing)
    Log {
        activity: String,
        /// Hours to add to the entry
        #[arg(long)]
        hours: f64,
        #[arg(long, value_parser = parse_date_arg)]
        date: Option<NaiveDate>,
        #[arg(long)]
        target: Option<f64>,
        /// Completion percentage, 0-100
        #[arg(long)]
        completion: Option<f64>,
        #[arg(long)]
        stop_reason: Option<String>,
        #[arg(long)]
        objectives: Option<String>,
        #[arg(long)]
        comments: Option<String>,
    },

    /// List entries in a date range
    Entries {
        #[command(flatten)]
        range: RangeArgs,
        /// Restrict to these activities (repeatable)
        #[arg(long = "activity")]
        activities: Vec<String>,
    },

    /// Delete one entry
    DeleteEntry {
        activity: String,
        #[arg(long, value_parser = parse_date_arg)]
        date: Option<NaiveDate>,
    },

    /// Per-activity statistics
    Stats {
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long = "activity")]
        activities: Vec<String>,
    },

    /// Range KPIs
    Kpis {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Merge the range into the Excel workbook
    Export {
        #[command(flatten)]
        range: RangeArgs,
        /// Workbook path (defaults to export.path from the config)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Time a session interactively
    Track {
        activity: String,
        /// Target hours for this session
        #[arg(long)]
        target: Option<f64>,
        #[arg(long, value_parser = parse_date_arg)]
        date: Option<NaiveDate>,
    },

    /// Write a timestamped copy of the database
    Backup,

    /// Exchange the activity list as JSON
    Tasks {
        #[command(subcommand)]
        action: TasksAction,
    },

    /// Productivity score and insights
    Advise {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Generate example config file
    GenerateConfig,
}

#[derive(Subcommand)]
enum ActivityAction {
    Add {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Default target hours per day
        #[arg(long, default_value_t = 0.0)]
        target: f64,
        #[arg(long, default_value = "")]
        tags: String,
    },
    List {
        /// Include archived activities
        #[arg(long)]
        all: bool,
    },
    Edit {
        name: String,
        #[arg(long)]
        rename: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        target: Option<f64>,
        #[arg(long)]
        tags: Option<String>,
    },
    /// Archive an activity; its entries are kept
    Delete { name: String },
}

#[derive(Subcommand)]
enum TasksAction {
    /// Write all activities to a .json or .csv file
    Export { path: PathBuf },
    /// Create activities from a .json or .csv file
    Import { path: PathBuf },
}

#[derive(Args)]
struct RangeArgs {
    /// First day (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date_arg)]
    from: Option<NaiveDate>,
    /// Last day (YYYY-MM-DD), defaults to today
    #[arg(long, value_parser = parse_date_arg)]
    to: Option<NaiveDate>,
    /// Number of days ending at --to, when --from is not given
    #[arg(long)]
    days: Option<u32>,
}

impl RangeArgs {
    fn resolve(&self, config: &Config) -> Result<DateRange> {
        let end = self.to.unwrap_or_else(today);
        match self.from {
            Some(start) => DateRange::new(start, end),
            None => Ok(DateRange::last_days(
                self.days.unwrap_or(config.export.default_range_days),
                end,
            )),
        }
    }
}

fn parse_date_arg(value: &str) -> std::result::Result<NaiveDate, String> {
    parse_date(value).map_err(|e| e.to_string())
}

fn main() {
    // Initialize logging with WARN level by default (can be overridden with RUST_LOG env var)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{}Error:{} {}", Colors::red(), Colors::reset(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.version_full {
        print!("{}", version_string());
        return Ok(());
    }

    let command = match cli.command {
        Some(command) => command,
        None => {
            println!("No command given. Run `study-tracker --help` for usage.");
            return Ok(());
        }
    };

    if let Commands::GenerateConfig = command {
        return generate_config();
    }

    let config = Config::load(cli.config.as_deref())?;
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| config.database.resolved_path());
    debug!("Using database {}", db_path.display());
    let db = SqliteDatabase::open(&db_path, &config)?;

    match command {
        Commands::Activity { action } => run_activity(&db, action),
        Commands::Log {
            activity,
            hours,
            date,
            target,
            completion,
            stop_reason,
            objectives,
            comments,
        } => {
            let date = date.unwrap_or_else(today);
            let target_hours = match target {
                Some(t) => Some(t),
                None => default_target(&db, &activity)?,
            };
            let update = EntryUpdate {
                hours_delta: hours,
                target_hours,
                completion_percent: completion,
                stop_reason,
                objectives,
                comments,
            };
            let entry = db.upsert_daily_entry(date, &activity, &update)?;
            println!(
                "{} on {}: {:.2}h total",
                entry.activity, entry.date, entry.hours
            );
            Ok(())
        }
        Commands::Entries { range, activities } => {
            let range = range.resolve(&config)?;
            print!("{}", format_entries(&db.query_entries(&range, &activities)?));
            Ok(())
        }
        Commands::DeleteEntry { activity, date } => {
            let date = date.unwrap_or_else(today);
            db.delete_entry(date, &activity)?;
            println!("Deleted {} on {}", activity.trim(), date);
            Ok(())
        }
        Commands::Stats { range, activities } => {
            let range = range.resolve(&config)?;
            println!("Statistics {}", range);
            print!("{}", format_stats(&compute_stats(&db, &range, &activities)?));
            Ok(())
        }
        Commands::Kpis { range } => {
            let range = range.resolve(&config)?;
            println!("KPIs {}", range);
            match compute_kpis(&db, &range, &config.kpi)? {
                Some(kpis) => print!("{}", format_kpis(&kpis)),
                None => println!("No entries in range."),
            }
            Ok(())
        }
        Commands::Export { range, output } => {
            let range = range.resolve(&config)?;
            let exporter = match output {
                Some(path) => ExcelExporter::new(path),
                None => ExcelExporter::from_config(&config),
            };
            let summary = export_range(&db, &exporter, &range)?;
            println!(
                "Exported {} rows ({} from {}, {} replaced) and {} stat rows to {}",
                summary.raw_rows,
                summary.new_rows,
                range,
                summary.superseded_rows,
                summary.stat_rows,
                summary.path.display()
            );
            Ok(())
        }
        Commands::Track {
            activity,
            target,
            date,
        } => {
            let target = match target {
                Some(t) => Some(t),
                None => default_target(&db, &activity)?,
            };
            track(&db, &config, &activity, target, date)
        }
        Commands::Backup => {
            let path = db.backup_database()?;
            println!("Backup written to {}", path.display());
            Ok(())
        }
        Commands::Tasks { action } => match action {
            TasksAction::Export { path } => {
                let count = db.export_activities(&path)?;
                println!("Exported {} activities to {}", count, path.display());
                Ok(())
            }
            TasksAction::Import { path } => {
                let count = db.import_activities(&path)?;
                println!("Imported {} activities from {}", count, path.display());
                Ok(())
            }
        },
        Commands::Advise { range } => {
            let range = range.resolve(&config)?;
            let stats = compute_stats(&db, &range, &[])?;
            let kpis = compute_kpis(&db, &range, &config.kpi)?;
            print!("{}", format_advice(&advise(&NeutralAdvisor, &stats, kpis.as_ref())));
            Ok(())
        }
        Commands::GenerateConfig => generate_config(),
    }
}

fn run_activity(db: &SqliteDatabase, action: ActivityAction) -> Result<()> {
    match action {
        ActivityAction::Add {
            name,
            description,
            target,
            tags,
        } => {
            let activity = db.create_activity(&name, &description, target, &tags)?;
            println!("Added activity {}", activity.name);
        }
        ActivityAction::List { all } => {
            print!("{}", format_activities(&db.list_activities(all)?));
        }
        ActivityAction::Edit {
            name,
            rename,
            description,
            target,
            tags,
        } => {
            let update = ActivityUpdate {
                name: rename,
                description,
                default_target_hours: target,
                tags,
                is_active: None,
            };
            let activity = db.update_activity(&name, &update)?;
            println!("Updated activity {}", activity.name);
        }
        ActivityAction::Delete { name } => {
            db.delete_activity(&name)?;
            println!("Archived activity {}", name.trim());
        }
    }
    Ok(())
}

/// The activity's default target, if it has a positive one.
fn default_target(db: &SqliteDatabase, activity: &str) -> Result<Option<f64>> {
    Ok(db
        .get_activity(activity)?
        .map(|a| a.default_target_hours)
        .filter(|t| *t > 0.0))
}

fn generate_config() -> Result<()> {
    let config_path = Config::default_config_path()?;
    println!("Generating example config file at: {:?}", config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&config_path, Config::example_toml())?;
    println!("Config file generated successfully!");
    println!("Edit {} to customize settings", config_path.display());
    Ok(())
}

enum TrackCommand {
    Pause,
    Resume,
    Stop(Option<String>),
    Finish,
}

fn parse_track_command(line: &str) -> Option<TrackCommand> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word {
        "p" | "pause" => Some(TrackCommand::Pause),
        "r" | "resume" => Some(TrackCommand::Resume),
        "s" | "stop" | "q" | "quit" => Some(TrackCommand::Stop(
            Some(rest.to_string()).filter(|r| !r.is_empty()),
        )),
        "f" | "finish" => Some(TrackCommand::Finish),
        _ => None,
    }
}

/// Interactive timer: ticks on the configured interval, reads commands from
/// stdin. End of input stops the session.
fn track(
    db: &SqliteDatabase,
    config: &Config,
    activity: &str,
    target: Option<f64>,
    date: Option<NaiveDate>,
) -> Result<()> {
    let mut timer = SessionTimer::new(activity.trim(), target);
    timer.subscribe(|event| {
        if let TimerEvent::TargetReached { target_hours, .. } = event {
            println!(
                "\n{}Target of {:.2}h reached. Keep going or type `f` to finish.{}\x07",
                Colors::green(),
                target_hours,
                Colors::reset()
            );
        }
    });

    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!("Tracking {}. Commands: p(ause) r(esume) s(top) [reason] f(inish)", timer.activity());
    timer.start()?;

    let tick_interval = Duration::from_millis(config.timer.tick_interval_ms);
    let outcome = loop {
        match rx.recv_timeout(tick_interval) {
            Ok(line) => match parse_track_command(&line) {
                Some(TrackCommand::Pause) => timer.pause(),
                Some(TrackCommand::Resume) => timer.start()?,
                Some(TrackCommand::Stop(reason)) => break TrackCommand::Stop(reason),
                Some(TrackCommand::Finish) => break TrackCommand::Finish,
                None => warn!("Unknown command: {}", line.trim()),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break TrackCommand::Stop(None),
        }
        let update = timer.tick();
        print!("\r{}   ", format_tick(timer.activity(), &update));
        let _ = io::stdout().flush();
    };
    println!();

    let date = date.unwrap_or_else(today);
    let recorded = match outcome {
        TrackCommand::Finish => timer.finish(db, date, SessionOutcome::default())?,
        TrackCommand::Stop(stop_reason) => timer.stop(
            db,
            date,
            SessionOutcome {
                stop_reason,
                ..Default::default()
            },
        )?,
        TrackCommand::Pause | TrackCommand::Resume => None,
    };

    if let Some(entry) = recorded {
        println!(
            "Saved {} on {}: {:.2}h total",
            entry.activity, entry.date, entry.hours
        );
    }
    Ok(())
}
