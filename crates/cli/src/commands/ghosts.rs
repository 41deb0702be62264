//! Inactive customer report.
//!
//! Prints one line per inactive customer, most inactive first, followed by
//! a count per level.

use chrono::Utc;
use omnicrm_sync::{GhostReport, SyncConfig, scan_ghosts};

use super::{CommandError, pg_store};

/// Scan the store and print the report.
pub async fn run(config: &SyncConfig) -> Result<(), CommandError> {
    let store = pg_store(config).await?;
    let report = scan_ghosts(store.as_ref(), Utc::now()).await?;
    print_report(&report);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_report(report: &GhostReport) {
    for ghost in &report.ghosts {
        let contact = ghost
            .email
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| ghost.phone.as_ref().map(ToString::to_string))
            .unwrap_or_default();
        println!(
            "{:<20} {:>5}d {:>4} orders {:>12} {} <{}>",
            ghost.level.as_str(),
            ghost.days_inactive,
            ghost.order_count,
            ghost.lifetime_value,
            ghost.display_name,
            contact
        );
    }

    println!();
    for (level, count) in report.counts() {
        println!("{:<20} {count}", level.as_str());
    }
}
