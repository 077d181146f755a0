use crate::commands::common::Session;
use crate::error::CliError;

pub async fn run_hydrate(session: &Session) -> Result<(), CliError> {
    if !session.client.hydrate().await {
        let status = session.client.status();
        return Err(CliError::Sync(
            status.sync_error.unwrap_or_else(|| "hydration failed".to_string()),
        ));
    }

    let store = session.client.store();
    for collection in store.collection_names() {
        println!("{collection}: {} items", store.len(collection.as_str()));
    }
    Ok(())
}
