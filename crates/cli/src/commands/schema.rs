use datapac_backend::BackendClient;

use crate::commands::CommandResult;

pub async fn run(backend: &BackendClient, dataset: &str, table: &str) -> CommandResult {
    CommandResult::envelope(&backend.table_schema(dataset, table).await.to_value())
}
