//! Complexity and access-control enforcement for band expressions.

use std::collections::{HashMap, HashSet};

use crate::error::{BandMathError, BandMathResult};
use crate::parser::BandExpressions;
use crate::token::TokenKind;

/// Per-layer limits on user-supplied band math.
///
/// `token_acl` maps a token-kind name (see [`TokenKind::name`]) to either
/// `None`, forbidding that kind outright, or a deny-list of specific
/// token values.
#[derive(Debug, Clone, Default)]
pub struct ComplexityCriteria {
    pub max_variables: usize,
    pub max_tokens: usize,
    pub max_expressions: usize,
    pub token_acl: HashMap<String, Option<Vec<String>>>,
    /// Variables the layer exposes; empty disables band math entirely.
    pub variable_lookup: HashSet<String>,
}

impl ComplexityCriteria {
    pub fn new(
        max_variables: usize,
        max_tokens: usize,
        max_expressions: usize,
        variables: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            max_variables,
            max_tokens,
            max_expressions,
            token_acl: HashMap::new(),
            variable_lookup: variables.into_iter().collect(),
        }
    }
}

/// Validate a parsed expression set against per-layer criteria.
///
/// The first violated rule fails the whole request with a message citing
/// the offending token.
pub fn check_complexity(
    band_expr: &BandExpressions,
    criteria: &ComplexityCriteria,
) -> BandMathResult<()> {
    if criteria.variable_lookup.is_empty() {
        return Err(BandMathError::Disabled);
    }

    if band_expr.expressions.len() > criteria.max_expressions {
        return Err(BandMathError::TooManyExpressions(
            band_expr.expressions.len(),
        ));
    }

    if band_expr.var_list.len() > criteria.max_variables {
        return Err(BandMathError::TooManyVariables(band_expr.var_list.len()));
    }

    let token_count = band_expr.token_count();
    if token_count > criteria.max_tokens {
        return Err(BandMathError::TooManyTokens(token_count));
    }

    for var in &band_expr.var_list {
        if !criteria.variable_lookup.contains(var) {
            let mut supported: Vec<&str> = criteria
                .variable_lookup
                .iter()
                .map(String::as_str)
                .collect();
            supported.sort_unstable();
            return Err(BandMathError::UnknownVariable {
                name: var.clone(),
                supported: supported.join(", "),
            });
        }
    }

    if criteria.token_acl.is_empty() {
        return Ok(());
    }

    for expr in &band_expr.expressions {
        for token in &expr.tokens {
            let Some(acl) = criteria.token_acl.get(token.kind.name()) else {
                continue;
            };

            let allowed = match acl {
                None => false,
                Some(denied) => !denied.contains(&token.text),
            };

            if !allowed {
                return Err(BandMathError::OperationNotSupported(token.text.clone()));
            }
        }
    }

    Ok(())
}
