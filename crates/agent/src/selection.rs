use datapac_core::domain::catalog::TableDescriptor;
use datapac_core::text::words;

use crate::conversation::{singular, term_variants, QuestionIntent};

const ALIAS_WEIGHT: u32 = 3;
const TAG_WEIGHT: u32 = 3;
const NAME_WEIGHT: u32 = 2;
const DESCRIPTION_WEIGHT: u32 = 2;
const FIELD_WEIGHT: u32 = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum TableSelection {
    Selected(TableDescriptor),
    /// No confident match; the user has to pick from these.
    Ambiguous(Vec<TableDescriptor>),
    EmptyCatalog,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableScore {
    pub qualified_name: String,
    pub score: u32,
}

#[derive(Clone, Debug, Default)]
pub struct TableSelector;

impl TableSelector {
    pub fn new() -> Self {
        Self
    }

    pub fn select(&self, intent: &QuestionIntent, catalog: &[TableDescriptor]) -> TableSelection {
        match catalog {
            [] => return TableSelection::EmptyCatalog,
            [only] => return TableSelection::Selected(only.clone()),
            _ => {}
        }

        let scored: Vec<(u32, &TableDescriptor)> =
            catalog.iter().map(|table| (score_table(intent, table), table)).collect();
        let best = scored.iter().map(|(score, _)| *score).max().unwrap_or(0);
        if best == 0 {
            return TableSelection::Ambiguous(catalog.to_vec());
        }

        let mut leaders: Vec<&TableDescriptor> =
            scored.iter().filter(|(score, _)| *score == best).map(|(_, table)| *table).collect();
        if leaders.len() == 1 {
            return TableSelection::Selected(leaders[0].clone());
        }

        // Equal relevance: the narrowest table is the most specific one.
        leaders.sort_by_key(|table| breadth(table));
        if breadth(leaders[0]) < breadth(leaders[1]) {
            TableSelection::Selected(leaders[0].clone())
        } else {
            TableSelection::Ambiguous(catalog.to_vec())
        }
    }

    pub fn scores(&self, intent: &QuestionIntent, catalog: &[TableDescriptor]) -> Vec<TableScore> {
        catalog
            .iter()
            .map(|table| TableScore {
                qualified_name: table.qualified_name(),
                score: score_table(intent, table),
            })
            .collect()
    }
}

fn breadth(table: &TableDescriptor) -> (usize, usize) {
    (table.table_fields.len(), table.tags.len())
}

fn singular_words(text: &str) -> Vec<String> {
    words(&text.replace('_', " ")).iter().map(|word| singular(word)).collect()
}

/// Sum over question terms of the best-weighted place each term appears.
fn score_table(intent: &QuestionIntent, table: &TableDescriptor) -> u32 {
    let alias = singular_words(&table.alias);
    let tags: Vec<String> = table.tags.iter().flat_map(|tag| singular_words(tag)).collect();
    let name = singular_words(&format!("{} {}", table.table_dataset, table.table_name));
    let description = table.description.as_deref().map(singular_words).unwrap_or_default();
    let fields: Vec<String> = table
        .table_fields
        .iter()
        .flat_map(|field| {
            let mut found = singular_words(&field.name);
            found.extend(singular_words(&field.description));
            found
        })
        .collect();

    intent
        .terms
        .iter()
        .map(|term| {
            let variants = term_variants(term);
            let hit = |haystack: &[String]| haystack.iter().any(|word| variants.contains(word));
            [
                (hit(&alias), ALIAS_WEIGHT),
                (hit(&tags), TAG_WEIGHT),
                (hit(&name), NAME_WEIGHT),
                (hit(&description), DESCRIPTION_WEIGHT),
                (hit(&fields), FIELD_WEIGHT),
            ]
            .into_iter()
            .filter(|(matched, _)| *matched)
            .map(|(_, weight)| weight)
            .max()
            .unwrap_or(0)
        })
        .sum()
}
