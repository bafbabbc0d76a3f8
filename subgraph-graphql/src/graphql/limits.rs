//! Request-shape limits, checked before a request executes.
//!
//! A request which exceeds any configured limit is rejected outright, with no partial execution.
//! Documents which fail to parse are let through, to be rejected with a proper syntax error by the
//! executor.

use crate::config::Limits;
use apollo_parser::{Lexer, Token, TokenKind};
use async_graphql::parser::{
    parse_query,
    types::{ExecutableDocument, Selection, SelectionSet},
};
use snafu::Snafu;
use std::collections::HashMap;

/// A request which exceeded one of the configured [`Limits`].
#[derive(Clone, Debug, Snafu, PartialEq, Eq)]
#[snafu(display("request exceeds {limit} limit: {measured} > {max}"))]
pub struct LimitsExceeded {
    pub limit: &'static str,
    pub measured: usize,
    pub max: usize,
}

/// Measurements of a document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Measured {
    depth: usize,
    aliases: usize,
}

enum Computation<T> {
    InProgress,
    Done(T),
}

/// Check `query` against `limits`.
pub fn check(query: &str, limits: &Limits) -> Result<(), LimitsExceeded> {
    if let Some(max) = limits.max_tokens {
        // Count tokens first; it's cheap and bounds the work done by the parser. Lexing stops as
        // soon as the limit is exceeded.
        exceeds("tokens", tokens(query).take(max.saturating_add(1)).count(), max)?;
    }
    if limits.max_depth.is_none() && limits.max_aliases.is_none() {
        return Ok(());
    }

    let Ok(doc) = parse_query(query) else {
        return Ok(());
    };
    let mut fragment_cache = HashMap::new();
    let mut measured = Measured::default();
    for (_, op) in doc.operations.iter() {
        let op = measure(&doc, &mut fragment_cache, &op.node.selection_set.node);
        measured.depth = measured.depth.max(op.depth);
        measured.aliases += op.aliases;
    }

    if let Some(max) = limits.max_depth {
        exceeds("depth", measured.depth, max)?;
    }
    if let Some(max) = limits.max_aliases {
        exceeds("aliases", measured.aliases, max)?;
    }
    Ok(())
}

fn exceeds(limit: &'static str, measured: usize, max: usize) -> Result<(), LimitsExceeded> {
    if measured > max {
        tracing::warn!(limit, measured, max, "request exceeded limits");
        return Err(LimitsExceeded {
            limit,
            measured,
            max,
        });
    }
    Ok(())
}

/// Recursively measure a selection set.
fn measure(
    doc: &ExecutableDocument,
    fragment_cache: &mut HashMap<String, Computation<Measured>>,
    selection_set: &SelectionSet,
) -> Measured {
    let mut measured = Measured::default();
    for selection in &selection_set.items {
        let nested = match &selection.node {
            Selection::Field(field) => {
                let nested = measure(doc, fragment_cache, &field.node.selection_set.node);
                if field.node.alias.is_some() {
                    measured.aliases += 1;
                }
                Measured {
                    depth: nested.depth + 1,
                    ..nested
                }
            }
            Selection::InlineFragment(fragment) => {
                measure(doc, fragment_cache, &fragment.node.selection_set.node)
            }
            Selection::FragmentSpread(spread) => {
                let name = spread.node.fragment_name.node.to_string();
                match fragment_cache.get(&name) {
                    Some(Computation::Done(cached)) => *cached,
                    // A cycle. The document is invalid and will be rejected by validation.
                    Some(Computation::InProgress) => continue,
                    None => {
                        let Some(def) = doc.fragments.get(spread.node.fragment_name.node.as_str())
                        else {
                            continue;
                        };
                        fragment_cache.insert(name.clone(), Computation::InProgress);
                        let nested = measure(doc, fragment_cache, &def.node.selection_set.node);
                        fragment_cache.insert(name, Computation::Done(nested));
                        nested
                    }
                }
            }
        };
        measured.depth = measured.depth.max(nested.depth);
        measured.aliases += nested.aliases;
    }
    measured
}

/// The lexical tokens of a GraphQL document, produced lazily.
///
/// Whitespace, commas and comments are not tokens. Malformed tokens are skipped; the document will
/// fail to parse later.
fn tokens(query: &str) -> impl Iterator<Item = Token<'_>> {
    Lexer::new(query).filter_map(Result::ok).filter(|token| {
        !matches!(
            token.kind(),
            TokenKind::Whitespace | TokenKind::Comma | TokenKind::Comment | TokenKind::Eof
        )
    })
}
