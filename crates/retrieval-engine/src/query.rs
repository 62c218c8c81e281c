//! Structured filters to encoded-query strings (`field=value^field2LIKEx`).

use portal_core_types::{Filter, FilterOperator, FilterSpec, JoinOp, PortalError};
use tracing::warn;

/// Turns structured filters into the target's encoded-query grammar.
///
/// Lenient builders (the default) coerce unknown operators to `EQ` and unknown
/// join words to AND, logging a warning. Strict builders reject both.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryBuilder {
    strict: bool,
}

impl QueryBuilder {
    pub fn lenient() -> Self {
        Self { strict: false }
    }

    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Clauses in input order; filters with an empty field are skipped.
    pub fn build(filters: &[Filter], join: JoinOp) -> String {
        filters
            .iter()
            .filter(|filter| !filter.field.trim().is_empty())
            .map(clause)
            .collect::<Vec<_>>()
            .join(join.token())
    }

    /// Parses caller-supplied filters and the join word, then builds.
    pub fn build_specs(&self, specs: &[FilterSpec], join: &str) -> Result<String, PortalError> {
        let join = self.parse_join(join)?;
        let filters = self.compile_specs(specs)?;
        Ok(Self::build(&filters, join))
    }

    pub fn compile_specs(&self, specs: &[FilterSpec]) -> Result<Vec<Filter>, PortalError> {
        specs.iter().map(|spec| self.compile(spec)).collect()
    }

    pub fn parse_join(&self, raw: &str) -> Result<JoinOp, PortalError> {
        if raw.trim().is_empty() {
            return Ok(JoinOp::And);
        }
        match JoinOp::parse(raw) {
            Some(join) => Ok(join),
            None if self.strict => Err(PortalError::QueryBuild(format!(
                "unknown join operator {raw:?}; expected AND or OR"
            ))),
            None => {
                warn!(target: "retrieval", join = raw, "unknown join operator; using AND");
                Ok(JoinOp::And)
            }
        }
    }

    fn compile(&self, spec: &FilterSpec) -> Result<Filter, PortalError> {
        let operator = match FilterOperator::parse(&spec.operator) {
            Some(operator) => operator,
            None if self.strict => {
                return Err(PortalError::QueryBuild(format!(
                    "unknown operator {:?} for field {:?}",
                    spec.operator, spec.field
                )))
            }
            None => {
                warn!(
                    target: "retrieval",
                    field = %spec.field,
                    operator = %spec.operator,
                    "unknown filter operator; treating as EQ"
                );
                FilterOperator::Eq
            }
        };

        let value = spec.value_text();
        if self.strict && operator.takes_value() && value.is_none() {
            return Err(PortalError::QueryBuild(format!(
                "operator {} on field {:?} needs a value",
                operator.token(),
                spec.field
            )));
        }

        Ok(Filter {
            field: spec.field.trim().to_string(),
            operator,
            value: if operator.takes_value() { value } else { None },
        })
    }
}

fn clause(filter: &Filter) -> String {
    let field = filter.field.trim();
    if !filter.operator.takes_value() {
        return format!("{field}{}", filter.operator.token());
    }
    let value = filter.value.as_deref().unwrap_or_default();
    format!("{field}{}{value}", filter.operator.token())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: serde_json::Value) -> FilterSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn single_equality() {
        let filters = [Filter::new("u_lob", FilterOperator::Eq, "SET")];
        assert_eq!(QueryBuilder::build(&filters, JoinOp::And), "u_lob=SET");
    }

    #[test]
    fn mixed_operators_keep_input_order() {
        let filters = [
            Filter::new("u_lob", FilterOperator::Eq, "SET"),
            Filter::new("operational_status", FilterOperator::Ne, "retired"),
            Filter::new("name", FilterOperator::Like, "prod"),
        ];
        assert_eq!(
            QueryBuilder::build(&filters, JoinOp::And),
            "u_lob=SET^operational_status!=retired^nameLIKEprod"
        );
    }

    #[test]
    fn set_and_emptiness_operators() {
        assert_eq!(
            QueryBuilder::build(&[Filter::new("state", FilterOperator::In, "1,2,3")], JoinOp::And),
            "stateIN1,2,3"
        );
        assert_eq!(
            QueryBuilder::build(&[Filter::new("state", FilterOperator::NotIn, "6,7")], JoinOp::And),
            "stateNOTIN6,7"
        );
        assert_eq!(
            QueryBuilder::build(&[Filter::unary("owner", FilterOperator::IsEmpty)], JoinOp::And),
            "ownerISEMPTY"
        );
        assert_eq!(
            QueryBuilder::build(
                &[Filter::unary("owner", FilterOperator::IsNotEmpty)],
                JoinOp::And
            ),
            "ownerISNOTEMPTY"
        );
    }

    #[test]
    fn empty_fields_are_skipped_and_or_joins() {
        let filters = [
            Filter::new("priority", FilterOperator::Le, "2"),
            Filter::new("", FilterOperator::Eq, "ignored"),
            Filter::new("name", FilterOperator::StartsWith, "web"),
            Filter::new("  ", FilterOperator::Eq, "ignored"),
        ];
        let query = QueryBuilder::build(&filters, JoinOp::Or);
        assert_eq!(query, "priority<=2^ORnameSTARTSWITHweb");
        assert_eq!(query.split("^OR").count(), filters.len() - 2);
    }

    #[test]
    fn lenient_mode_falls_back_to_equality() {
        let specs = [
            spec(json!({"field": "name", "operator": "~=", "value": "db"})),
            spec(json!({"field": "state", "operator": "not in", "value": [6, 7]})),
        ];
        let query = QueryBuilder::lenient().build_specs(&specs, "or").unwrap();
        assert_eq!(query, "name=db^ORstateNOTIN6,7");
        assert_eq!(QueryBuilder::lenient().build_specs(&specs, "xor").unwrap(), "name=db^stateNOTIN6,7");
    }

    #[test]
    fn strict_mode_rejects_unknown_words() {
        let specs = [spec(json!({"field": "name", "operator": "~=", "value": "db"}))];
        assert!(matches!(
            QueryBuilder::strict().build_specs(&specs, "AND"),
            Err(PortalError::QueryBuild(_))
        ));
        assert!(matches!(
            QueryBuilder::strict().parse_join("XOR"),
            Err(PortalError::QueryBuild(_))
        ));
        let missing = [spec(json!({"field": "name", "operator": "LIKE"}))];
        assert!(QueryBuilder::strict().build_specs(&missing, "AND").is_err());
    }

    #[test]
    fn operator_defaults_to_equality_and_numbers_render_plainly() {
        let specs = [spec(json!({"field": "active", "value": true})), spec(json!({"field": "priority", "operator": ">=", "value": 2}))];
        assert_eq!(
            QueryBuilder::lenient().build_specs(&specs, "AND").unwrap(),
            "active=true^priority>=2"
        );
    }
}
