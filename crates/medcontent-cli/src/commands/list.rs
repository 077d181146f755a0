use crate::commands::common::{format_item_lines, parse_collection, Session};
use crate::error::CliError;

pub async fn run_list(
    session: &Session,
    collection: &str,
    refresh: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let collection = parse_collection(collection)?;
    if refresh && !session.client.hydrate().await {
        // Stale data is still worth showing.
        tracing::warn!("Refresh failed; listing the local replica");
    }

    let items = session.client.store().get(collection.as_str());
    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No items in {collection}.");
        return Ok(());
    }
    for line in format_item_lines(&items) {
        println!("{line}");
    }
    Ok(())
}
