use std::fs;

use anyhow::{Context, Result};
use datapac_backend::BackendClient;
use datapac_core::domain::query::QueryPayload;

use crate::commands::CommandResult;

/// Runs a hand-written payload. It is validated but never corrected.
pub async fn run(backend: &BackendClient, dataset: &str, table: &str, payload_arg: &str) -> CommandResult {
    let payload = match parse_payload(payload_arg) {
        Ok(payload) => payload,
        Err(error) => return CommandResult::failure("query", "invalid_payload", format!("{error:#}"), 2),
    };
    CommandResult::envelope(&backend.execute_query(dataset, table, &payload).await.to_value())
}

/// Inline JSON, or `@path` to a JSON file.
pub fn parse_payload(payload_arg: &str) -> Result<QueryPayload> {
    let raw = match payload_arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("could not read payload file `{path}`"))?,
        None => payload_arg.to_string(),
    };
    serde_json::from_str(&raw).context("payload is not a valid easy-query JSON object")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::parse_payload;

    #[test]
    fn payload_is_read_inline_or_from_file() {
        let inline = parse_payload(r#"{"fields": [{"name": "brand_name", "type": "STRING"}]}"#).expect("inline");
        assert_eq!(inline.fields[0].name, "brand_name");

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"dateField": "created_at_sp", "dateRange": ["2025-07-17", "2025-07-17"], "forceDate": true}}"#)
            .expect("write payload");
        let from_file = parse_payload(&format!("@{}", file.path().display())).expect("from file");
        assert!(from_file.force_date);

        assert!(parse_payload("@/definitely/missing.json").is_err());
        assert!(parse_payload("not json").is_err());
    }
}
