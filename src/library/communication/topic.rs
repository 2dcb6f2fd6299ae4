//! Routing key helpers shared by broker implementations

/// Separator between topic segments
pub const SEGMENT_SEPARATOR: char = '.';

const WILDCARD_SINGLE: &str = "*";
const WILDCARD_MULTI: &str = "#";

/// Checks whether a routing key matches a binding pattern of a topic exchange
///
/// Patterns consist of dot separated segments where `*` substitutes exactly one
/// segment and `#` substitutes zero or more segments. Services only bind exact
/// topics but the exchange honors wildcards regardless.
pub fn matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split(SEGMENT_SEPARATOR).collect();
    let key: Vec<&str> = routing_key.split(SEGMENT_SEPARATOR).collect();

    matches_segments(&pattern, &key)
}

fn matches_segments(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&WILDCARD_MULTI, rest)) => {
            (0..=key.len()).any(|skipped| matches_segments(rest, &key[skipped..]))
        }
        Some((segment, rest)) => match key.split_first() {
            Some((head, tail)) if *segment == WILDCARD_SINGLE || segment == head => {
                matches_segments(rest, tail)
            }
            _ => false,
        },
    }
}

/// Builds the conventional name of a durable responder queue
///
/// Follows the `<service-name>.queue.<capability>-responder` scheme, e.g.
/// `admin-auth-service.queue.getMe-responder`.
pub fn responder_queue(service: &str, capability: &str) -> String {
    format!("{}.queue.{}-responder", service, capability)
}

/// Last segment of a topic, commonly naming the invoked capability
pub fn action(topic: &str) -> &str {
    topic.rsplit(SEGMENT_SEPARATOR).next().unwrap_or(topic)
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn match_exact_topics() {
        assert!(matches("admin.auth.getMe", "admin.auth.getMe"));
        assert!(!matches("admin.auth.getMe", "admin.auth.getMeNot"));
        assert!(!matches("admin.auth", "admin.auth.getMe"));
    }

    #[test]
    fn match_single_segment_wildcard() {
        assert!(matches("admin.*.getMe", "admin.auth.getMe"));
        assert!(!matches("admin.*", "admin.auth.getMe"));
    }

    #[test]
    fn match_multi_segment_wildcard() {
        assert!(matches("admin.#", "admin.auth.getMe"));
        assert!(matches("admin.#", "admin"));
        assert!(matches("#.getMe", "admin.auth.getMe"));
        assert!(matches("#", "store.getStore"));
        assert!(!matches("user.#", "admin.auth.getMe"));
    }

    #[test]
    fn name_responder_queues() {
        assert_eq!(
            responder_queue("admin-auth-service", "getMe"),
            "admin-auth-service.queue.getMe-responder"
        );
        assert_eq!(action("admin.auth.getMe"), "getMe");
        assert_eq!(action("standalone"), "standalone");
    }
}
