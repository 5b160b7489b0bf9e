use tally::config::TallyConfig;
use tally::core::date::DateNormalizer;
use tally::sync::RestRemote;

#[tokio::main]
async fn main() {
    if let Ok(journal) = systemd_journal_logger::JournalLog::new() {
        let _ = journal
            .with_syslog_identifier("tally-sync-check".to_string())
            .install();
    }
    log::set_max_level(log::LevelFilter::Info);

    let config = match TallyConfig::load_default() {
        Ok(c) => c,
        Err(e) => {
            println!("Config error: {}", e);
            return;
        }
    };

    println!("=== Remote record audit ===\n");

    let (Some(url), Some(key)) = (config.remote_url.as_deref(), config.api_key.as_deref()) else {
        println!("No remote configured.");
        return;
    };
    let Some(user) = config.user_id else {
        println!("No user_id configured.");
        return;
    };

    println!("--- Remote: {} ---", url);

    let remote = match RestRemote::new(url, key) {
        Ok(r) => r,
        Err(e) => {
            println!("  Client error: {}", e);
            return;
        }
    };
    let dates = DateNormalizer::new(config.date_cache_capacity);

    let mut clean = true;
    for (label, completed) in [("active", false), ("completed", true)] {
        let records = match remote.fetch_records(user, completed).await {
            Ok(r) => r,
            Err(e) => {
                println!("  Error fetching {} tasks: {}", label, e);
                clean = false;
                continue;
            }
        };
        println!("\n  {} tasks: {}", label, records.len());

        let mut flagged = 0;
        for record in &records {
            let issues = record.audit(&dates);
            if issues.is_empty() {
                continue;
            }
            flagged += 1;
            println!("    {} ({})", record.title, record.id);
            for issue in &issues {
                println!("      - {}", issue);
            }
        }
        if flagged > 0 {
            clean = false;
            println!("  Flagged: {}", flagged);
        }
    }

    if clean {
        println!("\n  All records consistent!");
    }
    println!("\n=== Done ===");
}
