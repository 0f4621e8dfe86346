use datapac_backend::BackendClient;

use crate::commands::CommandResult;

pub async fn run(backend: &BackendClient) -> CommandResult {
    CommandResult::envelope(&backend.list_tables().await.to_value())
}
