use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use datapac_core::domain::catalog::TableDescriptor;
use datapac_core::domain::query::QueryPayload;
use datapac_core::domain::schema::SchemaField;
use serde::Serialize;
use uuid::Uuid;

use crate::llm::ChatMessage;

/// Summary of the last query the executor ran in this conversation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LastQuery {
    pub dataset: String,
    pub table: String,
    pub table_alias: String,
    pub question: String,
    pub timestamp: DateTime<Utc>,
    pub payload: QueryPayload,
    pub result_count: Option<usize>,
    pub field_descriptions_used: BTreeMap<String, String>,
}

/// A question that is waiting for the user to pick a table.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingChoice {
    pub question: String,
    pub candidates: Vec<TableDescriptor>,
}

impl PendingChoice {
    /// Matches a reply by list number (1-based), alias, table name or `dataset.table`.
    pub fn resolve(&self, reply: &str) -> Option<&TableDescriptor> {
        let reply = reply.trim().trim_end_matches('.');
        if let Ok(index) = reply.parse::<usize>() {
            return index.checked_sub(1).and_then(|index| self.candidates.get(index));
        }
        let wanted = datapac_core::text::fold(reply);
        self.candidates.iter().find(|table| {
            [table.alias.as_str(), table.table_name.as_str(), &table.qualified_name()]
                .iter()
                .any(|candidate| !candidate.is_empty() && datapac_core::text::fold(candidate) == wanted)
        })
    }
}

#[derive(Debug)]
pub struct ConversationSession {
    id: Uuid,
    pub history: Vec<ChatMessage>,
    pub catalog: Vec<TableDescriptor>,
    /// Schemas fetched in this conversation, keyed by `dataset.table`.
    pub schemas: BTreeMap<String, Vec<SchemaField>>,
    pub last_query: Option<LastQuery>,
    pub pending_choice: Option<PendingChoice>,
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            history: Vec::new(),
            catalog: Vec::new(),
            schemas: BTreeMap::new(),
            last_query: None,
            pending_choice: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn catalog_entry(&self, dataset: &str, table: &str) -> Option<&TableDescriptor> {
        self.catalog
            .iter()
            .find(|entry| entry.table_dataset == dataset && entry.table_name == table)
    }

    pub fn cached_schema(&self, dataset: &str, table: &str) -> Option<&[SchemaField]> {
        self.schemas.get(&format!("{dataset}.{table}")).map(Vec::as_slice)
    }
}

/// Shared handle to one conversation. The lock is never held across an await.
#[derive(Clone, Debug, Default)]
pub struct SessionHandle {
    inner: Arc<Mutex<ConversationSession>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, ConversationSession> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.lock().id()
    }

    pub fn correlation_id(&self) -> String {
        self.id().to_string()
    }

    pub fn last_query(&self) -> Option<LastQuery> {
        self.lock().last_query.clone()
    }
}

#[cfg(test)]
mod tests {
    use datapac_core::domain::catalog::TableDescriptor;

    use super::{PendingChoice, SessionHandle};

    fn pending() -> PendingChoice {
        let mut orders = TableDescriptor::new("eatopia_all_orders", "orders_eatopia");
        orders.alias = "Pedidos Eatopia".into();
        let revenue = TableDescriptor::new("finance", "revenue_daily");
        PendingChoice { question: "quanto vendemos?".into(), candidates: vec![orders, revenue] }
    }

    #[test]
    fn pending_choice_resolves_number_alias_and_name() {
        let choice = pending();
        assert_eq!(choice.resolve("1").map(|t| t.table_name.as_str()), Some("orders_eatopia"));
        assert_eq!(choice.resolve(" 2 ").map(|t| t.table_name.as_str()), Some("revenue_daily"));
        assert_eq!(choice.resolve("pedidos eatopia").map(|t| t.table_name.as_str()), Some("orders_eatopia"));
        assert_eq!(choice.resolve("finance.revenue_daily").map(|t| t.table_name.as_str()), Some("revenue_daily"));
        assert!(choice.resolve("0").is_none());
        assert!(choice.resolve("3").is_none());
        assert!(choice.resolve("clientes").is_none());
    }

    #[test]
    fn session_handles_share_state() {
        let handle = SessionHandle::new();
        let clone = handle.clone();
        clone.lock().pending_choice = Some(pending());
        assert!(handle.lock().pending_choice.is_some());
        assert_eq!(handle.id(), clone.id());
    }
}
