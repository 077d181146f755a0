use crate::commands::common::Session;
use crate::error::CliError;

/// Hydrate, then follow the broadcast channel until interrupted.
pub async fn run_watch(session: &Session) -> Result<(), CliError> {
    if !session.client.hydrate().await {
        tracing::warn!("Initial hydration failed; watching with local data");
    }
    let listener = session.client.spawn_listener();
    println!("Watching for changes. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    listener.abort();

    let store = session.client.store();
    for collection in store.collection_names() {
        println!("{collection}: {} items", store.len(collection.as_str()));
    }
    let conflicts = session.client.reconciler().conflicts();
    if !conflicts.is_empty() {
        println!("Discarded {} stale change(s):", conflicts.len());
        for conflict in conflicts {
            println!(
                "  {}/{}  {}  local={} incoming={}",
                conflict.collection,
                conflict.item_id,
                conflict.strategy.label(),
                conflict.local_updated_at,
                conflict.incoming_updated_at
            );
        }
    }
    Ok(())
}
