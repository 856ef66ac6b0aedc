//! Minimal RDF term model with a canonical N-Triples rendering.
//!
//! The canonical form is what chunk ids are hashed over, so it must be stable:
//!
//! - simple literals drop the implicit `xsd:string` datatype,
//! - language tags are lowercased,
//! - literal escaping follows N-Triples (`\\`, `\"`, `\n`, `\r`, `\t`),
//! - blank nodes can be skolemized into well-known IRIs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{WorldgraphError, WorldgraphResult};

pub const XSD_STRING_IRI: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const RDF_LANG_STRING_IRI: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

/// Prefix for skolem IRIs minted from blank node labels.
pub const SKOLEM_IRI_PREFIX: &str = "https://worldgraph.dev/.well-known/genid/";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    pub lexical: String,
    pub datatype: Option<String>,
    pub language: Option<String>,
}

impl Literal {
    pub fn simple(lexical: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
        .normalized()
    }

    pub fn lang_tagged(lexical: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: None,
            language: Some(language.into()),
        }
        .normalized()
    }

    fn normalized(mut self) -> Self {
        if self.language.is_some()
            || self.datatype.as_deref() == Some(XSD_STRING_IRI)
            || self.datatype.as_deref() == Some(RDF_LANG_STRING_IRI)
        {
            self.datatype = None;
        }
        if let Some(lang) = self.language.as_mut() {
            *lang = lang.to_ascii_lowercase();
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Term {
    Iri(String),
    BlankNode(String),
    Literal(Literal),
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::BlankNode(label.into())
    }

    pub fn literal(lexical: impl Into<String>) -> Self {
        Term::Literal(Literal::simple(lexical))
    }

    pub fn is_blank_node(&self) -> bool {
        matches!(self, Term::BlankNode(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal(_))
    }

    /// Replace a blank node by its skolem IRI; other terms are returned as-is.
    pub fn skolemized(&self) -> Term {
        match self {
            Term::BlankNode(label) => Term::Iri(format!("{SKOLEM_IRI_PREFIX}{label}")),
            other => other.clone(),
        }
    }

    /// Plain text of the term: the IRI, the blank node label or the literal's lexical form.
    pub fn text(&self) -> &str {
        match self {
            Term::Iri(iri) => iri,
            Term::BlankNode(label) => label,
            Term::Literal(lit) => &lit.lexical,
        }
    }

    pub fn to_ntriples(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::BlankNode(label) => write!(f, "_:{label}"),
            Term::Literal(lit) => {
                write!(f, "\"{}\"", escape_literal(&lit.lexical))?;
                if let Some(lang) = &lit.language {
                    write!(f, "@{lang}")
                } else if let Some(dt) = &lit.datatype {
                    write!(f, "^^<{dt}>")
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl From<Term> for String {
    fn from(value: Term) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Term {
    type Error = WorldgraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_term(&value)
    }
}

/// One RDF statement. `graph == None` is the default graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quad {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<Term>,
}

impl Quad {
    pub fn triple(subject: Term, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object,
            graph: None,
        }
    }

    /// `<s> <p> o .` with skolemized blank nodes; the graph name is not part of the line.
    pub fn canonical_triple_line(&self) -> String {
        format!(
            "{} <{}> {} .",
            self.subject.skolemized(),
            self.predicate,
            self.object.skolemized()
        )
    }
}

fn escape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_literal(s: &str) -> WorldgraphResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some('u') => out.push(read_code_point(&mut chars, 4)?),
            Some('U') => out.push(read_code_point(&mut chars, 8)?),
            Some(other) => {
                return Err(WorldgraphError::invalid(format!(
                    "unsupported escape sequence \\{other} in literal"
                )))
            }
            None => return Err(WorldgraphError::invalid("dangling escape in literal")),
        }
    }
    Ok(out)
}

fn read_code_point(chars: &mut std::str::Chars<'_>, width: usize) -> WorldgraphResult<char> {
    let hex: String = chars.by_ref().take(width).collect();
    if hex.len() != width {
        return Err(WorldgraphError::invalid("truncated unicode escape in literal"));
    }
    u32::from_str_radix(&hex, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| WorldgraphError::invalid(format!("invalid unicode escape \\u{hex}")))
}

/// Parse one term in N-Triples display form (`<iri>`, `_:label`, `"lexical"@lang`,
/// `"lexical"^^<datatype>`).
pub fn parse_term(term: &str) -> WorldgraphResult<Term> {
    let s = term.trim();

    if let Some(rest) = s.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        if rest.is_empty() || rest.contains(|c: char| c.is_whitespace() || c == '<' || c == '>') {
            return Err(WorldgraphError::invalid(format!("invalid IRI: {s}")));
        }
        return Ok(Term::Iri(rest.to_string()));
    }

    if let Some(rest) = s.strip_prefix("_:") {
        if rest.is_empty() {
            return Err(WorldgraphError::invalid("blank node with empty label"));
        }
        return Ok(Term::BlankNode(rest.to_string()));
    }

    if s.starts_with('"') {
        let end = closing_quote(s)
            .ok_or_else(|| WorldgraphError::invalid(format!("unterminated literal: {s}")))?;
        let lexical = unescape_literal(&s[1..end])?;
        let rest = s[end + 1..].trim();

        if rest.is_empty() {
            return Ok(Term::Literal(Literal::simple(lexical)));
        }
        if let Some(lang) = rest.strip_prefix('@') {
            if lang.is_empty() || !lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(WorldgraphError::invalid(format!("invalid language tag: {rest}")));
            }
            return Ok(Term::Literal(Literal::lang_tagged(lexical, lang)));
        }
        if let Some(dt) = rest.strip_prefix("^^") {
            let dt = dt.trim();
            let Some(dt_iri) = dt.strip_prefix('<').and_then(|t| t.strip_suffix('>')) else {
                return Err(WorldgraphError::invalid(format!("invalid datatype: {dt}")));
            };
            return Ok(Term::Literal(Literal::typed(lexical, dt_iri)));
        }
        return Err(WorldgraphError::invalid(format!("trailing data after literal: {rest}")));
    }

    Err(WorldgraphError::invalid(format!("unsupported RDF term form: {s}")))
}

/// Byte offset of the quote closing the literal that opens at offset 0.
pub fn closing_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, ch) in s.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => return Some(i),
            _ => {}
        }
    }
    None
}
