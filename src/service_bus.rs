use crate::context::InvocationContext;

/// Key holding the sender-propagated operation id inside the message
/// application-properties bag.
pub const OPERATION_ID_PROPERTY: &str = "operationId";

/// Key holding the sender-propagated parent id.
pub const PARENT_ID_PROPERTY: &str = "parentId";

/// Operation id propagated through a service-bus message's
/// application properties, if the sender attached one.
///
/// The bag may be absent at any nesting level (binding data, the
/// properties object, the key itself); every miss yields `None`. An
/// empty value is treated as absent, never returned as `""`.
pub fn get_operation_id(context: &InvocationContext) -> Option<String> {
    application_property(context, OPERATION_ID_PROPERTY)
}

/// Parent id propagated through a service-bus message's application
/// properties. Same absence semantics as [`get_operation_id`].
pub fn get_parent_id(context: &InvocationContext) -> Option<String> {
    application_property(context, PARENT_ID_PROPERTY)
}

// Only the current runtime's `applicationProperties` binding shape is
// read here. The legacy `userProperties` bag and direct trace-header
// reuse are deprecated and intentionally not consulted.
fn application_property(context: &InvocationContext, key: &str) -> Option<String> {
    context
        .binding_data
        .as_ref()?
        .get("applicationProperties")?
        .get(key)?
        .as_str()
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context_with_properties(properties: serde_json::Value) -> InvocationContext {
        InvocationContext::new().with_binding_data(json!({
            "applicationProperties": properties,
        }))
    }

    #[test]
    fn reads_both_ids_from_the_properties_bag() {
        let context = context_with_properties(json!({
            "operationId": "763230142f4317478bf6bdcee3886ef0",
            "parentId": "2839ff750bf4cc46",
        }));
        assert_eq!(
            get_operation_id(&context).as_deref(),
            Some("763230142f4317478bf6bdcee3886ef0")
        );
        assert_eq!(get_parent_id(&context).as_deref(), Some("2839ff750bf4cc46"));
    }

    #[test]
    fn missing_levels_yield_none() {
        // No binding data at all.
        assert_eq!(get_operation_id(&InvocationContext::new()), None);

        // Binding data without the properties bag.
        let context = InvocationContext::new().with_binding_data(json!({"messageId": "abc"}));
        assert_eq!(get_operation_id(&context), None);
        assert_eq!(get_parent_id(&context), None);

        // Properties bag without the keys.
        let context = context_with_properties(json!({"other": "value"}));
        assert_eq!(get_operation_id(&context), None);
    }

    #[test]
    fn empty_and_non_string_values_are_treated_as_absent() {
        let context = context_with_properties(json!({
            "operationId": "",
            "parentId": 42,
        }));
        assert_eq!(get_operation_id(&context), None);
        assert_eq!(get_parent_id(&context), None);
    }
}
