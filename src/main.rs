use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use tally::config::TallyConfig;
use tally::core::date::{DateNormalizer, DisplayOptions, format_for_display};
use tally::core::order::{SortDirection, SortMode, TimeFlags, priority_order, time_order, visible};
use tally::core::task::{Task, TaskDraft, TaskId};
use tally::sync::{
    InMemoryRemote, NoticeLevel, RemoteStore, RestRemote, Session, SyncError, SyncReconciler,
};

const USAGE: &str = "usage: tally [--demo] [--time] [--asc|--desc] [--overdue] [--undated-last] [--all]
             [list | sync | add TITLE CONSEQUENCE PRIDE CONSTRUCTION [--date DATE]
              | done ID | hide ID | restore ID | rm ID]";

enum Action {
    List,
    Sync,
    Add(TaskDraft),
    Done(String),
    Hide(String),
    Restore(String),
    Remove(String),
}

struct Cli {
    demo: bool,
    mode: SortMode,
    direction: SortDirection,
    flags: TimeFlags,
    show_hidden: bool,
    action: Action,
}

fn parse_args(args: &[String], config: &TallyConfig) -> Result<Cli, String> {
    let mut demo = false;
    let mut mode = config.view.mode;
    let mut direction = config.view.direction;
    let mut flags = config.view.time_flags();
    let mut show_hidden = config.view.show_hidden;
    let mut date = None;
    let mut positional: Vec<&str> = Vec::new();

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--demo" => demo = true,
            "--time" => mode = SortMode::Time,
            "--asc" => direction = SortDirection::Ascending,
            "--desc" => direction = SortDirection::Descending,
            "--overdue" => flags.surface_overdue = true,
            "--undated-last" => flags.undated_last = true,
            "--all" => show_hidden = true,
            "--date" => date = Some(iter.next().ok_or("--date needs a value")?.as_str()),
            "-h" | "--help" => return Err(USAGE.to_string()),
            other if other.starts_with("--") => return Err(format!("unknown flag {}\n{}", other, USAGE)),
            other => positional.push(other),
        }
    }

    let target = |name: &str| -> Result<String, String> {
        positional
            .get(1)
            .map(|s| s.to_string())
            .ok_or_else(|| format!("{} needs a task id", name))
    };

    let action = match positional.first().copied() {
        None | Some("list") => Action::List,
        Some("sync") => Action::Sync,
        Some("add") => {
            let [_, title, c, p, k] = positional.as_slice() else {
                return Err(format!("add needs a title and three scores\n{}", USAGE));
            };
            let score = |s: &str| s.parse::<u8>().map_err(|_| format!("{:?} is not a score", s));
            let mut draft = TaskDraft::new(*title, score(*c)?, score(*p)?, score(*k)?);
            if let Some(date) = date {
                let parsed = DateNormalizer::global()
                    .parse_str(date)
                    .ok_or_else(|| format!("{:?} is not a recognizable date", date))?;
                draft = draft.with_ideal_date(parsed);
            }
            Action::Add(draft)
        }
        Some("done") => Action::Done(target("done")?),
        Some("hide") => Action::Hide(target("hide")?),
        Some("restore") => Action::Restore(target("restore")?),
        Some("rm") => Action::Remove(target("rm")?),
        Some(other) => return Err(format!("unknown command {}\n{}", other, USAGE)),
    };

    Ok(Cli {
        demo,
        mode,
        direction,
        flags,
        show_hidden,
        action,
    })
}

/// Resolve a full id or a unique prefix of one.
fn find_task(tasks: &[Task], needle: &str) -> Result<TaskId, String> {
    let matches: Vec<TaskId> = tasks
        .iter()
        .filter(|t| t.id.to_string().starts_with(needle))
        .map(|t| t.id)
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(format!("no task matches {}", needle)),
        _ => Err(format!("{} is ambiguous ({} tasks)", needle, matches.len())),
    }
}

fn demo_remote(user: Uuid) -> InMemoryRemote {
    let now = Utc::now();
    let seed = [
        ("File taxes", (5, 2, 3), Some(now + Duration::days(3))),
        ("Call the landlord", (4, 1, 1), Some(now - Duration::hours(20))),
        ("Sketch the garden shed", (2, 5, 5), None),
        ("Sort old cables", (1, 1, 2), None),
        ("Prepare talk slides", (4, 4, 4), Some(now + Duration::hours(6))),
    ];
    InMemoryRemote::seeded(
        seed.into_iter()
            .map(|(title, (c, p, k), date)| {
                let mut draft = TaskDraft::new(title, c, p, k);
                draft.ideal_date = date;
                Task::from_draft(Uuid::new_v4(), &draft, Some(user), now)
            })
            .collect(),
    )
}

fn install_logging(config: &TallyConfig) {
    // Wrapper filters: tally crate at info/debug (per config), everything else at warn.
    struct FilteredJournal {
        inner: systemd_journal_logger::JournalLog,
    }

    impl log::Log for FilteredJournal {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            if metadata.target().starts_with("tally") {
                let max = if tally::debug_logging() {
                    log::LevelFilter::Debug
                } else {
                    log::LevelFilter::Info
                };
                metadata.level() <= max
            } else {
                metadata.level() <= log::LevelFilter::Warn
            }
        }
        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                self.inner.log(record);
            }
        }
        fn flush(&self) {
            self.inner.flush();
        }
    }

    tally::set_debug_logging(config.debug_logging);

    // `journalctl --user -t tally -f`
    let journal = match systemd_journal_logger::JournalLog::new() {
        Ok(journal) => journal.with_syslog_identifier("tally".to_string()),
        Err(e) => {
            eprintln!("journal unavailable, logging disabled: {}", e);
            return;
        }
    };
    if log::set_boxed_logger(Box::new(FilteredJournal { inner: journal })).is_ok() {
        // Global max must be Debug so tally debug logs can pass through when toggled
        log::set_max_level(log::LevelFilter::Debug);
    }
}

fn print_section(heading: &str, tasks: &[Task]) {
    if tasks.is_empty() {
        return;
    }
    println!("{}", heading);
    for task in tasks {
        let due = format_for_display(task.ideal_date, DisplayOptions::default());
        println!(
            "  {:>2}  {:<36} {:<12} {:<20} {}{}",
            task.total_score,
            task.title,
            task.dominant_category,
            if due.is_empty() { "-" } else { due.as_str() },
            &task.id.to_string()[..8],
            if task.hidden { "  (hidden)" } else { "" }
        );
    }
}

async fn run(reconciler: &SyncReconciler, session: &Session, action: Action) -> Result<(), Box<dyn std::error::Error>> {
    let lookup = |needle: &str| find_task(reconciler.snapshot().tasks(), needle);
    match action {
        Action::List | Action::Sync => {}
        Action::Add(draft) => {
            let task = reconciler.create_task(session, draft).await?;
            println!("added {}", task.id);
        }
        // Toggling would reopen a finished task.
        Action::Done(needle) => {
            let id = find_task(&reconciler.snapshot().active(), &needle)?;
            reconciler.toggle_completion(session, id).await?
        }
        Action::Hide(needle) => reconciler.toggle_hidden(session, lookup(&needle)?).await?,
        Action::Restore(needle) => reconciler.restore_task(session, lookup(&needle)?).await?,
        Action::Remove(needle) => reconciler.delete_task(session, lookup(&needle)?).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = TallyConfig::load_default()?;
    install_logging(&config);

    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args, &config)?;

    let (remote, session): (Arc<dyn RemoteStore>, Session) = if cli.demo {
        let user = config.user_id.unwrap_or_else(Uuid::new_v4);
        (Arc::new(demo_remote(user)), Session::signed_in(user))
    } else if let (Some(url), Some(key)) = (&config.remote_url, &config.api_key) {
        let dates = Arc::new(DateNormalizer::new(config.date_cache_capacity));
        let rest = RestRemote::new(url, key)?.with_date_normalizer(dates);
        (Arc::new(rest), config.session())
    } else {
        return Err(format!(
            "no remote configured in {} (set remote_url and api_key, or pass --demo)",
            TallyConfig::default_path().display()
        )
        .into());
    };

    let (reconciler, mut notices) = SyncReconciler::new(remote, config.sync_settings());
    if let Err(e) = reconciler.sync_from_remote(&session, true).await {
        log::warn!("Initial sync failed: {}", e);
    }

    let result = run(&reconciler, &session, cli.action).await;
    while let Ok(notice) = notices.try_recv() {
        match notice.level {
            NoticeLevel::Info => println!("{}", notice.message),
            NoticeLevel::Error => eprintln!("error: {}", notice.message),
        }
    }
    if let Err(e) = result {
        // Already reported through a notice.
        if e.downcast_ref::<SyncError>().is_some() {
            std::process::exit(1);
        }
        return Err(e);
    }

    let active = visible(&reconciler.snapshot().active(), cli.show_hidden);
    match cli.mode {
        SortMode::Priority => print_section("Tasks", &priority_order(&active, cli.direction)),
        SortMode::Time => {
            let view = time_order(&active, cli.direction, cli.flags, Utc::now());
            print_section("Overdue", &view.overdue);
            print_section("Upcoming", &view.upcoming);
        }
    }
    Ok(())
}
