//! Tokenization shared by the embedder and the full-text query builder.

use worldgraph_core::{WorldgraphError, WorldgraphResult};

const MAX_TOKEN_LEN: usize = 64;
const MIN_TOKEN_LEN: usize = 2;
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "by", "for", "in", "is", "of", "on", "or", "the", "to", "with",
];

/// Name-aware tokens: lowercase, split on non-alphanumerics and on camelCase
/// boundaries (`"paymentService"` -> `payment`, `service`), short tokens and
/// stopwords dropped.
pub fn tokenize_text(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_was_lower = false;

    for c in text.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_was_lower && !current.is_empty() {
                push_token_if_interesting(&mut tokens, &mut current);
            }
            for lc in c.to_lowercase() {
                if current.chars().count() < MAX_TOKEN_LEN {
                    current.push(lc);
                }
            }
            prev_was_lower = c.is_lowercase();
            continue;
        }
        if !current.is_empty() {
            push_token_if_interesting(&mut tokens, &mut current);
        }
        prev_was_lower = false;
    }
    if !current.is_empty() {
        push_token_if_interesting(&mut tokens, &mut current);
    }
    tokens
}

fn push_token_if_interesting(tokens: &mut Vec<String>, current: &mut String) {
    if current.chars().count() >= MIN_TOKEN_LEN && !STOPWORDS.contains(&current.as_str()) {
        tokens.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// FTS5 `MATCH` expression for free text: every word as a quoted term, OR-ed.
///
/// Words are split the way the `unicode61` tokenizer splits them, plus the
/// camelCase parts from [`tokenize_text`]. Quoting keeps FTS5 operators in
/// user input inert.
pub fn fts_match_expression(query: &str) -> WorldgraphResult<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut push = |term: String| {
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
    };
    for word in query.split(|c: char| !c.is_alphanumeric()) {
        push(word.to_lowercase());
    }
    for token in tokenize_text(query) {
        push(token);
    }
    if terms.is_empty() {
        return Err(WorldgraphError::invalid(format!(
            "search query `{query}` has no searchable terms"
        )));
    }
    Ok(terms
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_camel_case_and_drops_stopwords() {
        assert_eq!(
            tokenize_text("The paymentService of ACME_corp"),
            vec!["payment", "service", "acme", "corp"]
        );
    }

    #[test]
    fn match_expression_quotes_terms() {
        assert_eq!(fts_match_expression("Apple").unwrap(), "\"apple\"");
        assert_eq!(
            fts_match_expression("redApple NEAR pie").unwrap(),
            "\"redapple\" OR \"near\" OR \"pie\" OR \"red\" OR \"apple\""
        );
    }

    #[test]
    fn punctuation_only_query_is_invalid() {
        assert!(fts_match_expression("  \"*-( ").is_err());
    }
}
