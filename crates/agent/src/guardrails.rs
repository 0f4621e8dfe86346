use datapac_core::dates::parse_iso_date;
use datapac_core::domain::query::QueryPayload;
use datapac_core::domain::schema::{find_field, FieldKind, SchemaField};

#[derive(Clone, Debug, PartialEq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String, fallback_path: &'static str },
    /// The payload was corrected and may proceed in its corrected form.
    Degrade {
        reason_code: &'static str,
        user_message: String,
        fallback_path: &'static str,
        corrected: Box<QueryPayload>,
    },
}

impl GuardrailDecision {
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => Some(*reason_code),
        }
    }
}

/// Checks planned payloads against the table schema before they reach the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadGuardrail {
    pub correct_force_date: bool,
    pub correct_field_types: bool,
}

impl Default for PayloadGuardrail {
    fn default() -> Self {
        Self { correct_force_date: true, correct_field_types: true }
    }
}

impl PayloadGuardrail {
    pub fn evaluate(&self, payload: &QueryPayload, schema: &[SchemaField]) -> GuardrailDecision {
        if let Some(unknown) =
            payload.referenced_field_names().into_iter().find(|name| find_field(schema, name).is_none())
        {
            return deny(
                "unknown_field",
                format!("A coluna `{unknown}` não existe na tabela escolhida."),
                "replan_with_schema",
            );
        }

        for aggregation in &payload.agg_fields {
            let kind = find_field(schema, &aggregation.name).map(SchemaField::kind);
            if aggregation.function.requires_numeric() && kind != Some(FieldKind::Numeric) {
                return deny(
                    "non_numeric_aggregate",
                    format!(
                        "{} só pode ser aplicado a colunas numéricas, e `{}` não é numérica.",
                        aggregation.function, aggregation.name
                    ),
                    "choose_numeric_field",
                );
            }
        }

        if !payload.date_field.trim().is_empty() {
            let kind = find_field(schema, &payload.date_field).map(SchemaField::kind);
            if kind != Some(FieldKind::Date) {
                return deny(
                    "non_date_field",
                    format!("A coluna `{}` não é uma coluna de data.", payload.date_field),
                    "choose_date_field",
                );
            }
        }

        if let Some(problem) = date_range_problem(&payload.date_range) {
            return deny("malformed_date_range", problem, "restate_period");
        }

        let mut corrected = payload.clone();
        let mut corrections = Vec::new();

        if self.correct_field_types && align_field_types(&mut corrected, schema) {
            corrections.push("tipos de coluna alinhados ao esquema");
        }
        if self.correct_force_date && corrected.force_date != corrected.expected_force_date() {
            corrected.force_date = corrected.expected_force_date();
            corrections.push("forceDate ajustado ao filtro de data");
        }

        if let Err(error) = corrected.validate() {
            return deny("invalid_payload", error.to_string(), "replan_with_schema");
        }

        if corrections.is_empty() {
            GuardrailDecision::Allow
        } else {
            GuardrailDecision::Degrade {
                reason_code: "payload_corrected",
                user_message: format!("Consulta ajustada: {}.", corrections.join("; ")),
                fallback_path: "execute_corrected_payload",
                corrected: Box::new(corrected),
            }
        }
    }
}

fn deny(reason_code: &'static str, user_message: String, fallback_path: &'static str) -> GuardrailDecision {
    GuardrailDecision::Deny { reason_code, user_message, fallback_path }
}

fn date_range_problem(range: &[String]) -> Option<String> {
    match range {
        [] => None,
        [start, end] => match (parse_iso_date(start), parse_iso_date(end)) {
            (Ok(start_date), Ok(end_date)) if start_date <= end_date => None,
            (Ok(_), Ok(_)) => Some(format!("O período começa ({start}) depois de terminar ({end}).")),
            _ => Some(format!("O período [{start}, {end}] não está no formato AAAA-MM-DD.")),
        },
        other => Some(format!("O período precisa de exatamente duas datas, recebeu {}.", other.len())),
    }
}

/// Rewrites `type` (and name casing) on every field reference to match the schema.
fn align_field_types(payload: &mut QueryPayload, schema: &[SchemaField]) -> bool {
    let mut changed = false;
    let mut align = |name: &mut String, field_type: &mut String| {
        if let Some(field) = find_field(schema, name) {
            if *name != field.name || *field_type != field.field_type {
                name.clone_from(&field.name);
                field_type.clone_from(&field.field_type);
                changed = true;
            }
        }
    };

    for field in &mut payload.fields {
        align(&mut field.name, &mut field.field_type);
    }
    for field in &mut payload.agg_fields {
        align(&mut field.name, &mut field.field_type);
    }
    for filter in payload.filters.iter_mut().flatten() {
        align(&mut filter.name, &mut filter.field_type);
    }
    if let Some(field) = find_field(schema, &payload.date_field) {
        if payload.date_field != field.name {
            payload.date_field.clone_from(&field.name);
            changed = true;
        }
    }
    changed
}
