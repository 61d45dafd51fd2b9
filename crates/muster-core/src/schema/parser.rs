//! Schema parser implementation using pest

use pest::Parser;
use pest_derive::Parser;

use super::ast::*;
use super::registry::SchemaError;

type Result<T> = std::result::Result<T, SchemaError>;

#[derive(Parser)]
#[grammar = "schema/schema.pest"]
pub struct SchemaParser;

/// Parse a schema from source text
pub fn parse_schema(source: &str) -> Result<Schema> {
    let pairs = SchemaParser::parse(Rule::schema, source)
        .map_err(|e| SchemaError::Parse(format!("{e}")))?;

    let mut types = Vec::new();

    for pair in pairs {
        match pair.as_rule() {
            Rule::schema => {
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::type_def => {
                            types.push(parse_type_def(inner)?);
                        },
                        Rule::EOI => {},
                        _ => unreachable!("Unexpected rule: {:?}", inner.as_rule()),
                    }
                }
            },
            _ => unreachable!("Unexpected rule: {:?}", pair.as_rule()),
        }
    }

    Ok(Schema::new(types))
}

fn parse_type_def(pair: pest::iterators::Pair<Rule>) -> Result<TypeDef> {
    let mut inner = pair.into_inner();

    let name = inner
        .next()
        .ok_or_else(|| SchemaError::Parse("Expected type name".to_string()))?
        .as_str()
        .to_string();

    let mut relations = Vec::new();

    for def_pair in inner {
        if def_pair.as_rule() == Rule::relation_def {
            relations.push(parse_relation_def(def_pair)?);
        }
    }

    Ok(TypeDef::new(name, relations))
}

fn parse_relation_def(pair: pest::iterators::Pair<Rule>) -> Result<RelationDef> {
    let mut inner = pair.into_inner();

    let name = inner
        .next()
        .ok_or_else(|| SchemaError::Parse("Expected relation name".to_string()))?
        .as_str()
        .to_string();

    let expr = if let Some(expr_pair) = inner.next() {
        Some(parse_relation_expr(expr_pair)?)
    } else {
        None
    };

    Ok(RelationDef::new(name, expr))
}

fn parse_relation_expr(pair: pest::iterators::Pair<Rule>) -> Result<RewriteExpr> {
    match pair.as_rule() {
        Rule::relation_expr => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| SchemaError::Parse("Expected expression".to_string()))?;
            parse_relation_expr(inner)
        },
        Rule::union_expr => parse_union_expr(pair),
        Rule::intersection_expr => parse_intersection_expr(pair),
        Rule::exclusion_expr => parse_exclusion_expr(pair),
        Rule::primary_expr => parse_primary_expr(pair),
        _ => Err(SchemaError::Parse(format!(
            "Unexpected rule: {:?}",
            pair.as_rule()
        ))),
    }
}

fn parse_union_expr(pair: pest::iterators::Pair<Rule>) -> Result<RewriteExpr> {
    let mut exprs = Vec::new();

    for inner in pair.into_inner() {
        exprs.push(parse_intersection_expr(inner)?);
    }

    if exprs.len() == 1 {
        Ok(exprs.remove(0))
    } else {
        Ok(RewriteExpr::Union(exprs))
    }
}

fn parse_intersection_expr(pair: pest::iterators::Pair<Rule>) -> Result<RewriteExpr> {
    let mut exprs = Vec::new();

    for inner in pair.into_inner() {
        exprs.push(parse_exclusion_expr(inner)?);
    }

    if exprs.len() == 1 {
        Ok(exprs.remove(0))
    } else {
        Ok(RewriteExpr::Intersection(exprs))
    }
}

fn parse_exclusion_expr(pair: pest::iterators::Pair<Rule>) -> Result<RewriteExpr> {
    let mut inner = pair.into_inner();
    let base = parse_primary_expr(
        inner
            .next()
            .ok_or_else(|| SchemaError::Parse("Expected base expression".to_string()))?,
    )?;

    if let Some(subtract_pair) = inner.next() {
        let subtract = parse_primary_expr(subtract_pair)?;
        Ok(RewriteExpr::Exclusion {
            base: Box::new(base),
            subtract: Box::new(subtract),
        })
    } else {
        Ok(base)
    }
}

fn parse_primary_expr(pair: pest::iterators::Pair<Rule>) -> Result<RewriteExpr> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| SchemaError::Parse("Expected primary expression".to_string()))?;

    match inner.as_rule() {
        Rule::this_ref => Ok(RewriteExpr::This),
        Rule::relation_ref => Ok(RewriteExpr::ComputedUserset {
            relation: inner.as_str().to_string(),
        }),
        Rule::tuple_to_userset => parse_tuple_to_userset(inner),
        Rule::relation_expr => parse_relation_expr(inner),
        _ => Err(SchemaError::Parse(format!(
            "Unexpected primary expression: {:?}",
            inner.as_rule()
        ))),
    }
}

fn parse_tuple_to_userset(pair: pest::iterators::Pair<Rule>) -> Result<RewriteExpr> {
    let mut inner = pair.into_inner();

    let tupleset = inner
        .next()
        .ok_or_else(|| SchemaError::Parse("Expected tupleset name".to_string()))?
        .as_str()
        .to_string();

    let computed = inner
        .next()
        .ok_or_else(|| SchemaError::Parse("Expected computed relation name".to_string()))?
        .as_str()
        .to_string();

    Ok(RewriteExpr::TupleToUserset { tupleset, computed })
}
