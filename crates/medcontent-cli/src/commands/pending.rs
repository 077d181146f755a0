use crate::commands::common::{format_pending_lines, PendingItem, Session};
use crate::error::CliError;

pub fn run_pending(session: &Session, as_json: bool) -> Result<(), CliError> {
    let entries = session.client.pending();

    if as_json {
        let json_items = entries.iter().map(PendingItem::from).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Nothing pending.");
        return Ok(());
    }
    for line in format_pending_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_retry(session: &Session) -> Result<(), CliError> {
    let report = session.client.retry_pending().await;
    println!(
        "Retried: {} succeeded, {} failed, {} dropped",
        report.succeeded, report.failed, report.dropped
    );
    if report.failed > 0 {
        return Err(CliError::Sync(format!(
            "{} change(s) still pending",
            report.failed
        )));
    }
    Ok(())
}
