//! Document handling: operation selection, argument coercion against
//! variables, and subscription topic/predicate derivation.
//!
//! Only the slice of GraphQL the simulator needs is interpreted here. The
//! root fields of the selected operation are extracted with their coerced
//! arguments; nested selection shaping is the supplied resolvers' business.

use graphql_parser::parse_query;
use graphql_parser::query::{Definition, OperationDefinition, Selection, Value as AstValue};
use serde_json::Value;

use crate::graphql::schema::FieldArguments;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// One root field of the selected operation.
#[derive(Debug, Clone)]
pub struct RootField {
    pub name: String,
    pub alias: Option<String>,
    pub arguments: FieldArguments,
}

impl RootField {
    /// The key this field occupies in the response `data` object.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct ParsedOperation {
    pub kind: OperationKind,
    pub fields: Vec<RootField>,
}

/// Parse `source` and extract the operation selected by `operation_name`,
/// with every root-field argument coerced against `variables`.
pub fn parse_operation(
    source: &str,
    variables: &serde_json::Map<String, Value>,
    operation_name: Option<&str>,
) -> Result<ParsedOperation, String> {
    let document =
        parse_query::<String>(source).map_err(|e| format!("failed to parse document: {e}"))?;

    let operations: Vec<&OperationDefinition<'_, String>> = document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            Definition::Operation(operation) => Some(operation),
            Definition::Fragment(_) => None,
        })
        .collect();

    let operation = match operation_name {
        Some(wanted) => operations
            .iter()
            .find(|op| definition_name(op).is_some_and(|name| name == wanted))
            .ok_or_else(|| format!("operation '{wanted}' not found in document"))?,
        None => match operations.len() {
            0 => return Err("document contains no executable operation".to_string()),
            1 => &operations[0],
            _ => {
                return Err(
                    "operationName is required when the document defines multiple operations"
                        .to_string(),
                )
            }
        },
    };

    let (kind, selection_set) = match operation {
        OperationDefinition::SelectionSet(set) => (OperationKind::Query, set),
        OperationDefinition::Query(q) => (OperationKind::Query, &q.selection_set),
        OperationDefinition::Mutation(m) => (OperationKind::Mutation, &m.selection_set),
        OperationDefinition::Subscription(s) => (OperationKind::Subscription, &s.selection_set),
    };

    let mut fields = Vec::new();
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) => {
                let mut arguments = FieldArguments::new();
                for (name, value) in &field.arguments {
                    arguments.insert(name.clone(), coerce_value(value, variables)?);
                }
                fields.push(RootField {
                    name: field.name.clone(),
                    alias: field.alias.clone(),
                    arguments,
                });
            }
            Selection::FragmentSpread(_) | Selection::InlineFragment(_) => {
                return Err("fragments are not supported at the operation root".to_string());
            }
        }
    }

    if fields.is_empty() {
        return Err("operation selects no root fields".to_string());
    }

    Ok(ParsedOperation { kind, fields })
}

/// Parse a subscription document down to its single root field, the unit the
/// realtime server registers in the broker.
pub fn subscription_field(
    source: &str,
    variables: &serde_json::Map<String, Value>,
    operation_name: Option<&str>,
) -> Result<RootField, String> {
    let operation = parse_operation(source, variables, operation_name)?;
    if operation.kind != OperationKind::Subscription {
        return Err("document is not a subscription operation".to_string());
    }
    if operation.fields.len() != 1 {
        return Err("a subscription must select exactly one root field".to_string());
    }
    operation
        .fields
        .into_iter()
        .next()
        .ok_or_else(|| "a subscription must select exactly one root field".to_string())
}

fn definition_name<'a>(operation: &'a OperationDefinition<'_, String>) -> Option<&'a str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(q) => q.name.as_deref(),
        OperationDefinition::Mutation(m) => m.name.as_deref(),
        OperationDefinition::Subscription(s) => s.name.as_deref(),
    }
}

/// Turn an AST value into JSON, substituting variables. An unbound variable
/// coerces to null, matching how loose the simulated service is about
/// optional inputs.
fn coerce_value(
    value: &AstValue<'_, String>,
    variables: &serde_json::Map<String, Value>,
) -> Result<Value, String> {
    Ok(match value {
        AstValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
        AstValue::Int(n) => n
            .as_i64()
            .map(Value::from)
            .ok_or_else(|| "integer literal out of range".to_string())?,
        AstValue::Float(f) => Value::from(*f),
        AstValue::String(s) => Value::String(s.clone()),
        AstValue::Boolean(b) => Value::Bool(*b),
        AstValue::Null => Value::Null,
        AstValue::Enum(name) => Value::String(name.clone()),
        AstValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| coerce_value(item, variables))
                .collect::<Result<_, _>>()?,
        ),
        AstValue::Object(entries) => {
            let mut map = serde_json::Map::new();
            for (key, entry) in entries {
                map.insert(key.clone(), coerce_value(entry, variables)?);
            }
            Value::Object(map)
        }
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vars(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        }
    }

    #[test]
    fn selects_operation_by_name_and_coerces_variables() {
        let source = r#"
            query First { listTodos { id } }
            mutation Second($input: TodoInput!) {
                created: createTodo(input: $input, urgent: true) { id }
            }
        "#;
        let variables = vars(json!({"input": {"name": "write tests"}}));

        let operation = parse_operation(source, &variables, Some("Second")).unwrap();
        assert_eq!(operation.kind, OperationKind::Mutation);
        assert_eq!(operation.fields.len(), 1);

        let field = &operation.fields[0];
        assert_eq!(field.name, "createTodo");
        assert_eq!(field.response_key(), "created");
        assert_eq!(field.arguments["input"], json!({"name": "write tests"}));
        assert_eq!(field.arguments["urgent"], json!(true));
    }

    #[test]
    fn multiple_operations_without_a_name_is_an_error() {
        let source = "query A { a } query B { b }";
        let err = parse_operation(source, &serde_json::Map::new(), None).unwrap_err();
        assert!(err.contains("operationName"));
    }

    #[test]
    fn bare_selection_set_is_a_query() {
        let operation = parse_operation("{ listTodos { id } }", &serde_json::Map::new(), None).unwrap();
        assert_eq!(operation.kind, OperationKind::Query);
        assert_eq!(operation.fields[0].name, "listTodos");
    }

    #[test]
    fn unbound_variable_coerces_to_null() {
        let operation =
            parse_operation("query Q($id: ID) { getTodo(id: $id) { id } }", &serde_json::Map::new(), None)
                .unwrap();
        assert_eq!(operation.fields[0].arguments["id"], Value::Null);
    }

    #[test]
    fn enum_and_list_arguments_coerce_to_json() {
        let operation = parse_operation(
            r#"{ search(status: OPEN, tags: ["a", "b"]) { id } }"#,
            &serde_json::Map::new(),
            None,
        )
        .unwrap();
        let field = &operation.fields[0];
        assert_eq!(field.arguments["status"], json!("OPEN"));
        assert_eq!(field.arguments["tags"], json!(["a", "b"]));
    }

    #[test]
    fn subscription_field_extracts_topic_arguments() {
        let variables = vars(json!({"owner": "ann"}));
        let field = subscription_field(
            "subscription S($owner: String) { onCreateTodo(owner: $owner) { id } }",
            &variables,
            None,
        )
        .unwrap();
        assert_eq!(field.name, "onCreateTodo");
        assert_eq!(field.arguments["owner"], json!("ann"));
    }

    #[test]
    fn subscription_field_rejects_non_subscriptions() {
        let err =
            subscription_field("query { listTodos { id } }", &serde_json::Map::new(), None).unwrap_err();
        assert!(err.contains("not a subscription"));
    }

    #[test]
    fn parse_errors_are_reported_not_panicked() {
        let err = parse_operation("query {", &serde_json::Map::new(), None).unwrap_err();
        assert!(err.contains("failed to parse"));
    }
}
