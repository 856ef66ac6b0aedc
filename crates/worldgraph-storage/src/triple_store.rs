use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;

use oxigraph::model::{
    BlankNode, GraphName, Literal as OxLiteral, NamedNode, Quad as OxQuad, Subject, Term as OxTerm,
};
use oxigraph::sparql::{EvaluationError, Query, QueryResults as OxQueryResults};
use oxigraph::store::StorageError;
use serde::{Deserialize, Serialize};
use spargebra::term::GraphName as DataGraphName;
use spargebra::{GraphUpdateOperation, Update};
use uuid::Uuid;
use worldgraph_core::rdf::parse_term;
use worldgraph_core::{Patch, Quad, Term, WorldgraphError, WorldgraphResult};

use crate::manager::ManagedDatabase;

/// Graph query/update engine bound to one world database.
///
/// `update` applies the mutation atomically and returns the diff it produced,
/// which is what the index is driven from.
pub trait TripleStore: Send + Sync {
    fn query(&self, db: &ManagedDatabase, text: &str) -> WorldgraphResult<QueryResults>;
    fn update(&self, db: &ManagedDatabase, text: &str) -> WorldgraphResult<Patch>;
    fn count(&self, db: &ManagedDatabase) -> WorldgraphResult<u64>;
    fn contains(&self, db: &ManagedDatabase, quad: &Quad) -> WorldgraphResult<bool>;
    /// Every quad in the world, in a stable order.
    fn quads(&self, db: &ManagedDatabase) -> WorldgraphResult<Vec<Quad>>;
}

/// Solutions of a SPARQL query.
///
/// `SELECT` fills `variables`/`bindings`, `ASK` sets `boolean`, and
/// `CONSTRUCT`/`DESCRIBE` bind `subject`, `predicate` and `object` per triple.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    pub variables: Vec<String>,
    pub bindings: Vec<BTreeMap<String, Term>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean: Option<bool>,
}

impl QueryResults {
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Triple store backed by the oxigraph store of each world.
///
/// Updates accept `INSERT DATA` / `DELETE DATA` operations (any number,
/// separated by `;`) so that every change is known exactly; queries accept
/// the full SPARQL 1.1 query language. Only the default graph is used.
#[derive(Debug, Default, Clone, Copy)]
pub struct OxigraphTripleStore;

impl OxigraphTripleStore {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn graph_error(err: StorageError) -> WorldgraphError {
    WorldgraphError::upstream(format!("graph store: {err}"))
}

fn query_error(err: EvaluationError) -> WorldgraphError {
    WorldgraphError::upstream(format!("graph query failed: {err}"))
}

enum Change {
    Insert(Quad, OxQuad),
    Delete(Quad, OxQuad),
}

/// Parse an update into the quads it inserts and deletes, in order.
fn parse_changes(text: &str) -> WorldgraphResult<Vec<Change>> {
    let update = Update::parse(text, None)
        .map_err(|err| WorldgraphError::invalid(format!("invalid SPARQL update: {err}")))?;

    let mut changes = Vec::new();
    for operation in update.operations {
        match operation {
            GraphUpdateOperation::InsertData { data } => {
                // Blank node labels are scoped to one operation.
                let mut fresh: HashMap<String, String> = HashMap::new();
                for quad in data {
                    if !matches!(quad.graph_name, DataGraphName::DefaultGraph) {
                        return Err(named_graph_error());
                    }
                    let quad = Quad::triple(
                        relabel(data_term(&quad.subject)?, &mut fresh),
                        quad.predicate.as_str(),
                        relabel(data_term(&quad.object)?, &mut fresh),
                    );
                    let ox = ox_quad(&quad)?;
                    changes.push(Change::Insert(quad, ox));
                }
            }
            GraphUpdateOperation::DeleteData { data } => {
                for quad in data {
                    if !matches!(quad.graph_name, DataGraphName::DefaultGraph) {
                        return Err(named_graph_error());
                    }
                    let quad = Quad::triple(
                        data_term(&quad.subject)?,
                        quad.predicate.as_str(),
                        data_term(&quad.object)?,
                    );
                    let ox = ox_quad(&quad)?;
                    changes.push(Change::Delete(quad, ox));
                }
            }
            _ => {
                return Err(WorldgraphError::invalid(
                    "unsupported update operation: only INSERT DATA and DELETE DATA are accepted",
                ));
            }
        }
    }
    Ok(changes)
}

fn named_graph_error() -> WorldgraphError {
    WorldgraphError::invalid("named graphs are not supported; write to the default graph")
}

fn relabel(term: Term, fresh: &mut HashMap<String, String>) -> Term {
    match term {
        Term::BlankNode(label) => Term::BlankNode(
            fresh
                .entry(label)
                .or_insert_with(|| format!("b{}", Uuid::new_v4().simple()))
                .clone(),
        ),
        other => other,
    }
}

fn data_term(term: &impl Display) -> WorldgraphResult<Term> {
    parse_term(&term.to_string())
}

fn stored_term(term: &impl Display) -> WorldgraphResult<Term> {
    let raw = term.to_string();
    parse_term(&raw).map_err(|err| WorldgraphError::upstream(format!("unsupported stored term `{raw}`: {err}")))
}

fn ox_named(iri: &str) -> WorldgraphResult<NamedNode> {
    NamedNode::new(iri).map_err(|err| WorldgraphError::invalid(format!("invalid IRI <{iri}>: {err}")))
}

fn ox_blank(label: &str) -> WorldgraphResult<BlankNode> {
    BlankNode::new(label)
        .map_err(|err| WorldgraphError::invalid(format!("invalid blank node label `{label}`: {err}")))
}

fn ox_subject(term: &Term) -> WorldgraphResult<Subject> {
    match term {
        Term::Iri(iri) => Ok(ox_named(iri)?.into()),
        Term::BlankNode(label) => Ok(ox_blank(label)?.into()),
        Term::Literal(_) => Err(WorldgraphError::invalid(format!("literal subject {term}"))),
    }
}

fn ox_term(term: &Term) -> WorldgraphResult<OxTerm> {
    Ok(match term {
        Term::Iri(iri) => ox_named(iri)?.into(),
        Term::BlankNode(label) => ox_blank(label)?.into(),
        Term::Literal(lit) => match (&lit.language, &lit.datatype) {
            (Some(lang), _) => OxLiteral::new_language_tagged_literal(lit.lexical.as_str(), lang.as_str())
                .map_err(|err| WorldgraphError::invalid(format!("invalid language tag `{lang}`: {err}")))?
                .into(),
            (None, Some(datatype)) => OxLiteral::new_typed_literal(lit.lexical.as_str(), ox_named(datatype)?).into(),
            (None, None) => OxLiteral::new_simple_literal(lit.lexical.as_str()).into(),
        },
    })
}

fn ox_quad(quad: &Quad) -> WorldgraphResult<OxQuad> {
    let graph = match &quad.graph {
        None => GraphName::DefaultGraph,
        Some(Term::Iri(iri)) => ox_named(iri)?.into(),
        Some(other) => {
            return Err(WorldgraphError::invalid(format!("invalid graph name {other}")));
        }
    };
    Ok(OxQuad::new(
        ox_subject(&quad.subject)?,
        ox_named(&quad.predicate)?,
        ox_term(&quad.object)?,
        graph,
    ))
}

fn core_quad(quad: &OxQuad) -> WorldgraphResult<Quad> {
    Ok(Quad {
        subject: stored_term(&quad.subject)?,
        predicate: quad.predicate.as_str().to_string(),
        object: stored_term(&quad.object)?,
        graph: match &quad.graph_name {
            GraphName::DefaultGraph => None,
            other => Some(stored_term(other)?),
        },
    })
}

impl TripleStore for OxigraphTripleStore {
    fn query(&self, db: &ManagedDatabase, text: &str) -> WorldgraphResult<QueryResults> {
        let query = Query::parse(text, None)
            .map_err(|err| WorldgraphError::invalid(format!("invalid SPARQL query: {err}")))?;

        match db.graph.query(query).map_err(query_error)? {
            OxQueryResults::Solutions(solutions) => {
                let variables: Vec<String> = solutions
                    .variables()
                    .iter()
                    .map(|v| v.as_str().to_string())
                    .collect();
                let mut bindings = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(query_error)?;
                    let mut binding = BTreeMap::new();
                    for (variable, value) in solution.iter() {
                        binding.insert(variable.as_str().to_string(), stored_term(value)?);
                    }
                    bindings.push(binding);
                }
                Ok(QueryResults {
                    variables,
                    bindings,
                    boolean: None,
                })
            }
            OxQueryResults::Boolean(value) => Ok(QueryResults {
                boolean: Some(value),
                ..QueryResults::default()
            }),
            OxQueryResults::Graph(triples) => {
                let mut bindings = Vec::new();
                for triple in triples {
                    let triple = triple.map_err(query_error)?;
                    bindings.push(BTreeMap::from([
                        ("subject".to_string(), stored_term(&triple.subject)?),
                        ("predicate".to_string(), Term::iri(triple.predicate.as_str())),
                        ("object".to_string(), stored_term(&triple.object)?),
                    ]));
                }
                Ok(QueryResults {
                    variables: vec!["subject".into(), "predicate".into(), "object".into()],
                    bindings,
                    boolean: None,
                })
            }
        }
    }

    fn update(&self, db: &ManagedDatabase, text: &str) -> WorldgraphResult<Patch> {
        let changes = parse_changes(text)?;
        db.graph
            .transaction(|mut txn| {
                let mut patch = Patch::new();
                for change in &changes {
                    match change {
                        Change::Insert(quad, ox) => {
                            if txn.insert(ox)? {
                                patch.record_insert(quad.clone());
                            }
                        }
                        Change::Delete(quad, ox) => {
                            if txn.remove(ox)? {
                                patch.record_delete(quad.clone());
                            }
                        }
                    }
                }
                Ok::<_, StorageError>(patch)
            })
            .map_err(graph_error)
    }

    fn count(&self, db: &ManagedDatabase) -> WorldgraphResult<u64> {
        Ok(db.graph.len().map_err(graph_error)? as u64)
    }

    fn contains(&self, db: &ManagedDatabase, quad: &Quad) -> WorldgraphResult<bool> {
        db.graph.contains(&ox_quad(quad)?).map_err(graph_error)
    }

    fn quads(&self, db: &ManagedDatabase) -> WorldgraphResult<Vec<Quad>> {
        let mut out = Vec::new();
        for quad in db.graph.iter() {
            out.push(core_quad(&quad.map_err(graph_error)?)?);
        }
        out.sort();
        Ok(out)
    }
}
