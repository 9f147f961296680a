//! Event result conventions.
//!
//! Event methods answer a subscription with an acknowledgment schema before
//! any payload arrives. That acknowledgment is a structural marker: it is
//! never promoted, never merged into a payload union and never chosen as the
//! payload type.

use crate::schema::{Schema, SchemaKind};
use crate::store::reference_name;

/// Name of the subscription-acknowledgment schema.
pub const SUBSCRIPTION_ACK: &str = "ListenResponse";

/// Whether `schema` is the subscription acknowledgment, inlined or referenced.
pub fn is_subscription_ack(schema: &Schema) -> bool {
    if schema.title.as_deref() == Some(SUBSCRIPTION_ACK) {
        return true;
    }
    matches!(&schema.kind, SchemaKind::Ref(r) if reference_name(r) == SUBSCRIPTION_ACK)
}

/// Payload selection for event results: the first branch that is not the
/// subscription acknowledgment.
///
/// Only event-context consumers apply this; plain result unions keep every
/// branch.
pub fn payload_branch(branches: &[Schema]) -> Option<&Schema> {
    branches.iter().find(|b| !is_subscription_ack(b))
}

/// Event payload of a result schema: the payload branch of a union, or the
/// schema itself.
pub fn event_payload(schema: &Schema) -> &Schema {
    match &schema.kind {
        SchemaKind::AnyOf(branches) => payload_branch(branches).unwrap_or(schema),
        _ => schema,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Primitive;

    fn ack() -> Schema {
        Schema::primitive(Primitive::Boolean).with_title(SUBSCRIPTION_ACK)
    }

    #[test]
    fn recognizes_inline_and_referenced_ack() {
        assert!(is_subscription_ack(&ack()));
        assert!(is_subscription_ack(&Schema::reference(
            "https://example.com/types#/definitions/ListenResponse"
        )));
        assert!(!is_subscription_ack(&Schema::primitive(Primitive::String)));
    }

    #[test]
    fn payload_branch_skips_ack() {
        let payload = Schema::primitive(Primitive::String);
        let branches = vec![ack(), payload.clone()];
        assert_eq!(payload_branch(&branches), Some(&payload));
        assert_eq!(payload_branch(&[ack()]), None);
    }

    #[test]
    fn event_payload_of_plain_schema_is_itself() {
        let schema = Schema::primitive(Primitive::Integer);
        assert_eq!(event_payload(&schema), &schema);

        let union = Schema::new(SchemaKind::AnyOf(vec![ack(), schema.clone()]));
        assert_eq!(event_payload(&union), &schema);
    }
}
