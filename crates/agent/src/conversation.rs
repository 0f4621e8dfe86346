use datapac_core::dates::RelativeDate;
use datapac_core::domain::query::AggregateFunction;
use datapac_core::text::fold;

/// Structured reading of a free-text data question.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuestionIntent {
    /// Aggregate the question asks for explicitly; `None` means "default to SUM".
    pub aggregate: Option<AggregateFunction>,
    /// What a COUNT question counts ("pedido" in "quantos pedidos").
    pub count_subject: Option<String>,
    pub group_terms: Vec<String>,
    pub filters: Vec<FilterMention>,
    pub relative_date: Option<RelativeDate>,
    /// Content words, singularized, excluding filter values.
    pub terms: Vec<String>,
    pub limit: Option<u32>,
}

/// A literal condition such as "marca Patties" or "exceto a loja Centro".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterMention {
    pub term: String,
    pub value: String,
    pub negated: bool,
}

#[derive(Clone, Debug, Default)]
pub struct QuestionAnalyzer;

impl QuestionAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, question: &str) -> QuestionIntent {
        let tokens = tokenize(question);
        let folded: Vec<String> = tokens.iter().map(|token| token.folded.clone()).collect();

        let aggregate = extract_aggregate(&folded);
        let count_subject = if aggregate == Some(AggregateFunction::Count) {
            extract_count_subject(&folded)
        } else {
            None
        };
        let (group_terms, filters, value_positions) = extract_dimensions(&tokens);
        let terms = folded
            .iter()
            .enumerate()
            .filter(|(index, word)| !value_positions.contains(index) && !is_stopword(word))
            .map(|(_, word)| singular(word))
            .filter(|word| word.len() > 1)
            .fold(Vec::new(), |mut terms, word| {
                if !terms.contains(&word) {
                    terms.push(word);
                }
                terms
            });

        QuestionIntent {
            aggregate,
            count_subject,
            group_terms,
            filters,
            relative_date: RelativeDate::detect(question),
            terms,
            limit: extract_limit(&folded),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Token {
    raw: String,
    folded: String,
    quoted: bool,
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut characters = text.chars();

    while let Some(character) = characters.next() {
        if is_quote(character) && current.is_empty() {
            let mut quoted = String::new();
            for next in characters.by_ref() {
                if is_quote(next) {
                    break;
                }
                quoted.push(next);
            }
            let quoted = quoted.trim().to_string();
            if !quoted.is_empty() {
                tokens.push(Token { folded: fold(&quoted), raw: quoted, quoted: true });
            }
        } else if character.is_alphanumeric() || matches!(character, '_' | '-' | '%') {
            current.push(character);
        } else if !current.is_empty() {
            tokens.push(Token { folded: fold(&current), raw: std::mem::take(&mut current), quoted: false });
        }
    }
    if !current.is_empty() {
        tokens.push(Token { folded: fold(&current), raw: current, quoted: false });
    }
    tokens
}

fn is_quote(character: char) -> bool {
    matches!(character, '"' | '\'' | '“' | '”' | '‘' | '’')
}

fn extract_aggregate(words: &[String]) -> Option<AggregateFunction> {
    let has = |candidates: &[&str]| words.iter().any(|word| candidates.contains(&word.as_str()));
    let has_pair = |first: &str, second: &str| {
        words.windows(2).any(|pair| pair[0] == first && pair[1] == second)
    };

    if has(&["media", "medio", "average", "avg", "mean"]) {
        Some(AggregateFunction::Avg)
    } else if has(&["maximo", "maxima", "max", "maximum", "highest"]) {
        Some(AggregateFunction::Max)
    } else if has(&["minimo", "minima", "min", "minimum", "lowest"]) {
        Some(AggregateFunction::Min)
    } else if has(&["quantos", "quantas", "contagem", "count"])
        || has_pair("numero", "de")
        || has_pair("how", "many")
        || has_pair("number", "of")
    {
        Some(AggregateFunction::Count)
    } else if has(&["total", "soma", "somar", "somatorio", "sum"]) {
        Some(AggregateFunction::Sum)
    } else {
        None
    }
}

fn extract_count_subject(words: &[String]) -> Option<String> {
    let cue = words.iter().position(|word| {
        matches!(word.as_str(), "quantos" | "quantas" | "contagem" | "count" | "many" | "numero" | "number")
    })?;
    words[cue + 1..]
        .iter()
        .find(|word| !is_stopword(word))
        .map(|word| singular(word))
}

fn extract_limit(words: &[String]) -> Option<u32> {
    words.windows(2).find_map(|pair| match pair[0].as_str() {
        "top" | "limite" | "limit" | "primeiros" | "primeiras" => pair[1].parse().ok(),
        _ => None,
    })
}

type Dimensions = (Vec<String>, Vec<FilterMention>, Vec<usize>);

/// Splits dimension mentions into "group by" terms ("por marca") and literal
/// filters ("da marca Patties"). Also returns the token positions used as values.
fn extract_dimensions(tokens: &[Token]) -> Dimensions {
    let mut group_terms: Vec<String> = Vec::new();
    let mut filters = Vec::new();
    let mut value_positions = Vec::new();

    for index in 0..tokens.len() {
        if value_positions.contains(&index) || tokens[index].quoted {
            continue;
        }
        let word = singular(&tokens[index].folded);

        if in_grouping_context(tokens, index) {
            if !is_stopword(&tokens[index].folded) && !group_terms.contains(&word) {
                group_terms.push(word);
            }
            continue;
        }

        if !is_dimension_keyword(&word) {
            continue;
        }

        let (value, used) = filter_value(tokens, index + 1);
        let Some(value) = value else {
            continue;
        };
        value_positions.extend(used);

        let window_start = index.saturating_sub(3);
        let negated = tokens[window_start..index]
            .iter()
            .any(|token| is_negation(&token.folded));
        filters.push(FilterMention { term: word, value, negated });
    }

    (group_terms, filters, value_positions)
}

/// True when the token follows "por"/"by", possibly through a chain such as
/// "por marca e hub".
fn in_grouping_context(tokens: &[Token], index: usize) -> bool {
    let mut cursor = index;
    let mut first = true;
    while cursor > 0 {
        cursor -= 1;
        let previous = tokens[cursor].folded.as_str();
        if matches!(previous, "por" | "by" | "per") {
            return true;
        }
        let chained = matches!(previous, "e" | "and")
            || (!first && is_dimension_keyword(&singular(previous)));
        if !chained && !(first && matches!(previous, "cada" | "each")) {
            return false;
        }
        first = false;
    }
    false
}

fn filter_value(tokens: &[Token], start: usize) -> (Option<String>, Vec<usize>) {
    let mut index = start;
    if tokens.get(index).is_some_and(|token| matches!(token.folded.as_str(), "a" | "o" | "the")) {
        index += 1;
    }
    let Some(first) = tokens.get(index) else {
        return (None, Vec::new());
    };

    if first.quoted {
        return (Some(first.raw.clone()), vec![index]);
    }

    let starts_upper = |token: &Token| {
        token.raw.chars().next().is_some_and(|character| character.is_uppercase() || character.is_numeric())
    };

    if starts_upper(first) {
        let mut used = vec![index];
        let mut parts = vec![first.raw.clone()];
        for (offset, token) in tokens[index + 1..].iter().enumerate() {
            if token.quoted || !starts_upper(token) || is_stopword(&token.folded) {
                break;
            }
            used.push(index + 1 + offset);
            parts.push(token.raw.clone());
        }
        return (Some(parts.join(" ")), used);
    }

    let word = singular(&first.folded);
    if is_stopword(&first.folded) || is_dimension_keyword(&word) || RelativeDate::detect(&first.raw).is_some() {
        return (None, Vec::new());
    }
    (Some(first.raw.clone()), vec![index])
}

fn is_negation(word: &str) -> bool {
    matches!(word, "exceto" | "sem" | "menos" | "nao" | "fora" | "except" | "excluding" | "without" | "not")
}

const SYNONYMS: &[&[&str]] = &[
    &["marca", "brand"],
    &["pedido", "order", "ordem"],
    &["loja", "store", "hub", "restaurante", "restaurant", "unidade"],
    &["categoria", "category"],
    &["produto", "product", "sku"],
    &["cliente", "customer", "client", "usuario", "user"],
    &["venda", "sale", "revenue", "faturamento", "receita", "gmv"],
    &["cidade", "city"],
    &["estado", "state", "uf"],
    &["regiao", "region"],
    &["canal", "channel"],
    &["pagamento", "payment"],
    &["valor", "value", "amount", "price", "preco"],
    &["entrega", "delivery"],
    &["desconto", "discount"],
    &["item", "quantidade", "quantity"],
];

/// Nouns that name a categorical dimension and may introduce a filter value.
const DIMENSION_KEYWORDS: &[&str] = &[
    "marca", "brand", "loja", "store", "hub", "restaurante", "restaurant", "unidade", "categoria",
    "category", "produto", "product", "sku", "cliente", "customer", "cidade", "city", "estado",
    "state", "uf", "regiao", "region", "canal", "channel", "pagamento", "payment", "status",
];

pub fn is_dimension_keyword(word: &str) -> bool {
    DIMENSION_KEYWORDS.contains(&word)
}

fn is_known_term(word: &str) -> bool {
    is_dimension_keyword(word) || SYNONYMS.iter().any(|group| group.contains(&word))
}

/// The term plus its bilingual synonyms, all folded and singular.
pub fn term_variants(term: &str) -> Vec<String> {
    let term = singular(&fold(term));
    let mut variants = vec![term.clone()];
    for group in SYNONYMS {
        if group.contains(&term.as_str()) {
            for synonym in group.iter() {
                if !variants.iter().any(|existing| existing == synonym) {
                    variants.push((*synonym).to_string());
                }
            }
        }
    }
    variants
}

/// Rough pt-BR/English singular form of a folded word.
pub fn singular(word: &str) -> String {
    let word = word.trim();
    if word.len() <= 3 || word.chars().any(|character| character.is_ascii_digit()) {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix('s') {
        if is_known_term(stem) {
            return stem.to_string();
        }
    }
    for (suffix, replacement) in [("oes", "ao"), ("aes", "ao"), ("ens", "em"), ("ais", "al"), ("res", "r")] {
        if let Some(stem) = word.strip_suffix(suffix) {
            if stem.len() >= 2 {
                return format!("{stem}{replacement}");
            }
        }
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    word.strip_suffix('s').unwrap_or(word).to_string()
}

const STOPWORDS: &[&str] = &[
    "a", "o", "as", "os", "um", "uma", "de", "da", "do", "das", "dos", "na", "no", "nas", "nos",
    "em", "e", "ou", "para", "pra", "por", "com", "que", "qual", "quais", "quanto", "quanta",
    "quantos", "quantas", "me", "mostre", "mostra", "mostrar", "liste", "listar", "exiba", "exibir",
    "traga", "quero", "ver", "saber", "total", "soma", "somar", "somatorio", "media", "medio",
    "maximo", "maxima", "minimo", "minima", "numero", "contagem", "semana", "passada", "passado",
    "mes", "ano", "ontem", "hoje", "ultima", "ultimo", "este", "esta", "esse", "essa", "neste",
    "nesta", "deste", "desta", "foram", "foi", "tivemos", "temos", "teve", "ha", "houve", "cada",
    "sem", "exceto", "menos", "nao", "fora", "top", "limite", "primeiros", "primeiras", "of", "the",
    "by", "per", "in", "on", "for", "from", "how", "many", "much", "what", "which", "show", "list",
    "give", "me", "last", "this", "week", "month", "year", "today", "yesterday", "sum", "average",
    "avg", "mean", "count", "number", "max", "min", "maximum", "minimum", "highest", "lowest",
    "and", "or", "with", "without", "except", "excluding", "not", "each", "limit", "were", "was",
    "did", "we", "have", "is", "are", "there",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}
