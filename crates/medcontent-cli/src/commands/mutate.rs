use medcontent_core::{ItemId, Mutation};

use crate::commands::common::{apply_assignments, parse_collection, report_outcome, Session};
use crate::error::CliError;

pub async fn run_add(
    session: &Session,
    collection: &str,
    fields: &[String],
) -> Result<(), CliError> {
    let collection = parse_collection(collection)?;
    let mut item = session.client.new_item(&collection);
    apply_assignments(&mut item, fields)?;

    let pending = session.client.mutate(&collection, Mutation::Create(item))?;
    let id = pending.item_id().to_string();
    report_outcome(pending.wait().await, &id)
}

pub async fn run_update(
    session: &Session,
    collection: &str,
    id: &str,
    fields: &[String],
) -> Result<(), CliError> {
    let collection = parse_collection(collection)?;
    let id = ItemId::from(id.trim());
    let mut item = session
        .client
        .store()
        .get_item(collection.as_str(), &id)
        .ok_or_else(|| CliError::UnknownItem(id.to_string()))?;
    apply_assignments(&mut item, fields)?;

    let pending = session.client.mutate(&collection, Mutation::Update(item))?;
    report_outcome(pending.wait().await, id.as_str())
}

pub async fn run_delete(session: &Session, collection: &str, id: &str) -> Result<(), CliError> {
    let collection = parse_collection(collection)?;
    let id = ItemId::from(id.trim());
    let pending = session
        .client
        .mutate(&collection, Mutation::delete(id.clone()))?;
    report_outcome(pending.wait().await, id.as_str())
}

pub async fn run_increment(
    session: &Session,
    collection: &str,
    id: &str,
    field: Option<&str>,
) -> Result<(), CliError> {
    let collection = parse_collection(collection)?;
    let id = ItemId::from(id.trim());
    if session
        .client
        .store()
        .get_item(collection.as_str(), &id)
        .is_none()
    {
        return Err(CliError::UnknownItem(id.to_string()));
    }

    let pending = session
        .client
        .mutate(&collection, Mutation::increment(id.clone(), field))?;
    report_outcome(pending.wait().await, id.as_str())
}
