//! Partition key resolution.
//!
//! A strategy may pick a key from the payload. When it does not, the
//! correlation id is used, then the event id, so related events and retries
//! of one event land on the same partition.

use crate::domain::foundation::{StandardEvent, ValidationError};

/// Default rule set: analytics events partition by user.
pub const DEFAULT_PARTITION_KEY_FIELDS: &str = "analytics.*:userId";

pub trait PartitionKeyStrategy: Send + Sync {
    /// Key taken from the event payload, or `None` to use the fallback.
    fn key_from_payload(&self, event: &StandardEvent) -> Option<String>;
}

impl<F> PartitionKeyStrategy for F
where
    F: Fn(&StandardEvent) -> Option<String> + Send + Sync,
{
    fn key_from_payload(&self, event: &StandardEvent) -> Option<String> {
        self(event)
    }
}

/// Resolve the record key for an event.
///
/// Dead-letter wrappers resolve against the event they carry.
pub fn resolve_partition_key(strategy: &dyn PartitionKeyStrategy, event: &StandardEvent) -> String {
    let original = event.dead_letter_original();
    let event = original.as_ref().unwrap_or(event);

    strategy
        .key_from_payload(event)
        .filter(|key| !key.is_empty())
        .or_else(|| Some(event.correlation_id.clone()).filter(|c| !c.is_empty()))
        .unwrap_or_else(|| event.event_id.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TypePattern {
    Prefix(String),
    Exact(String),
}

impl TypePattern {
    fn matches(&self, event_type: &str) -> bool {
        match self {
            TypePattern::Prefix(prefix) => event_type.starts_with(prefix.as_str()),
            TypePattern::Exact(exact) => event_type == exact,
        }
    }
}

/// Maps event-type patterns to the payload field that keys them.
///
/// Rules are written `pattern:field`, comma separated. A pattern ending in
/// `*` matches by prefix (`analytics.*` matches `analytics.events.batch`);
/// anything else must match the type exactly. The first matching rule whose
/// field is present wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixFieldPartitioner {
    rules: Vec<(TypePattern, String)>,
}

impl PrefixFieldPartitioner {
    pub fn parse(rules: &str) -> Result<Self, ValidationError> {
        let mut parsed = Vec::new();
        for rule in rules.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            let (pattern, field) = rule.split_once(':').ok_or_else(|| {
                ValidationError::invalid_format(
                    "partition_key_fields",
                    format!("rule '{}' is not of the form pattern:field", rule),
                )
            })?;
            let (pattern, field) = (pattern.trim(), field.trim());
            if pattern.is_empty() || field.is_empty() {
                return Err(ValidationError::invalid_format(
                    "partition_key_fields",
                    format!("rule '{}' has an empty pattern or field", rule),
                ));
            }
            let pattern = match pattern.strip_suffix('*') {
                Some(prefix) => TypePattern::Prefix(prefix.to_string()),
                None => TypePattern::Exact(pattern.to_string()),
            };
            parsed.push((pattern, field.to_string()));
        }
        Ok(Self { rules: parsed })
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for PrefixFieldPartitioner {
    fn default() -> Self {
        Self {
            rules: vec![(
                TypePattern::Prefix("analytics.".to_string()),
                "userId".to_string(),
            )],
        }
    }
}

impl PartitionKeyStrategy for PrefixFieldPartitioner {
    fn key_from_payload(&self, event: &StandardEvent) -> Option<String> {
        self.rules
            .iter()
            .filter(|(pattern, _)| pattern.matches(&event.event_type))
            .find_map(|(_, field)| event.data_field(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{EventId, Timestamp};
    use proptest::prelude::*;
    use serde_json::json;

    fn analytics(user: Option<&str>) -> StandardEvent {
        let data = match user {
            Some(u) => json!({"userId": u, "count": 3}),
            None => json!({"count": 3}),
        };
        StandardEvent::from_json("analytics.events.batch", "svc", data)
            .with_correlation_id("corr-1")
    }

    #[test]
    fn analytics_events_key_by_user() {
        let partitioner = PrefixFieldPartitioner::default();
        assert_eq!(
            resolve_partition_key(&partitioner, &analytics(Some("u-42"))),
            "u-42"
        );
    }

    #[test]
    fn missing_field_falls_back_to_correlation_id() {
        let partitioner = PrefixFieldPartitioner::default();
        assert_eq!(
            resolve_partition_key(&partitioner, &analytics(None)),
            "corr-1"
        );
    }

    #[test]
    fn empty_correlation_falls_back_to_event_id() {
        let partitioner = PrefixFieldPartitioner::empty();
        let event = StandardEvent::from_json("user.created", "svc", json!({}))
            .with_event_id(EventId::from_string("evt-9"))
            .with_correlation_id("");
        assert_eq!(resolve_partition_key(&partitioner, &event), "evt-9");
    }

    #[test]
    fn unmatched_type_ignores_rules() {
        let partitioner = PrefixFieldPartitioner::default();
        let event = StandardEvent::from_json("user.created", "svc", json!({"userId": "u-1"}))
            .with_correlation_id("corr-7");
        assert_eq!(resolve_partition_key(&partitioner, &event), "corr-7");
    }

    #[test]
    fn dead_letter_uses_original_key() {
        let partitioner = PrefixFieldPartitioner::default();
        let original = analytics(Some("u-42"));
        let dlq = original.to_dead_letter("boom", Timestamp::now()).unwrap();

        assert_eq!(resolve_partition_key(&partitioner, &dlq), "u-42");
    }

    #[test]
    fn closures_are_strategies() {
        let strategy = |event: &StandardEvent| event.data_field("tenant");
        let event = StandardEvent::from_json("x", "svc", json!({"tenant": "t-1"}));
        assert_eq!(resolve_partition_key(&strategy, &event), "t-1");
    }

    #[test]
    fn parses_prefix_and_exact_rules() {
        let partitioner =
            PrefixFieldPartitioner::parse("analytics.*:userId, billing.invoice.paid:accountId")
                .unwrap();
        assert_eq!(partitioner.rule_count(), 2);

        let paid = StandardEvent::from_json(
            "billing.invoice.paid",
            "svc",
            json!({"accountId": "acc-3"}),
        );
        let refunded = StandardEvent::from_json(
            "billing.invoice.refunded",
            "svc",
            json!({"accountId": "acc-3"}),
        )
        .with_correlation_id("corr-r");

        assert_eq!(resolve_partition_key(&partitioner, &paid), "acc-3");
        assert_eq!(resolve_partition_key(&partitioner, &refunded), "corr-r");
    }

    #[test]
    fn rejects_rule_without_field() {
        assert!(PrefixFieldPartitioner::parse("analytics.*").is_err());
        assert!(PrefixFieldPartitioner::parse("analytics.*:").is_err());
    }

    #[test]
    fn default_rules_match_default_string() {
        assert_eq!(
            PrefixFieldPartitioner::parse(DEFAULT_PARTITION_KEY_FIELDS).unwrap(),
            PrefixFieldPartitioner::default()
        );
    }

    proptest! {
        #[test]
        fn same_correlation_same_key(
            correlation in "[a-z0-9-]{1,36}",
            event_type in "[a-z]{1,8}\\.[a-z]{1,8}",
            a in any::<i64>(),
            b in any::<i64>(),
        ) {
            let partitioner = PrefixFieldPartitioner::default();
            let first = StandardEvent::from_json(&event_type, "svc", json!({"n": a}))
                .with_correlation_id(correlation.clone());
            let second = StandardEvent::from_json(&event_type, "other", json!({"n": b}))
                .with_correlation_id(correlation.clone());

            prop_assert_eq!(
                resolve_partition_key(&partitioner, &first),
                resolve_partition_key(&partitioner, &second)
            );
            prop_assert_eq!(resolve_partition_key(&partitioner, &first), correlation);
        }
    }
}
