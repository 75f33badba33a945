use crate::context::InvocationContext;
use uuid::Uuid;

/// Parsed `traceparent` header.
///
/// `{version}-{trace-id}-{parent-id}-{flags}` with a 2-hex version, a
/// 32-hex trace id and a 16-hex parent id. Anything else is treated as
/// absent by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traceparent {
    pub version: String,
    pub trace_id: String,
    pub parent_id: String,
    pub flags: String,
}

/// Policy applied when an invocation carries no usable trace header.
///
/// `Strict` resolves to the empty string so downstream queries can
/// distinguish "no correlation" from a real id; `Generate` synthesizes
/// a fresh 32-hex id instead. A deployment should pick one policy and
/// stay with it; a `Logger` holds exactly one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OperationIdPolicy {
    #[default]
    Strict,
    Generate,
}

impl OperationIdPolicy {
    /// Operation id to use when no trace header is available.
    pub fn fallback(self) -> String {
        match self {
            OperationIdPolicy::Strict => String::new(),
            OperationIdPolicy::Generate => new_hex_id(),
        }
    }
}

/// Generate an opaque 32-character lowercase hex identifier.
pub fn new_hex_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Resolve the correlation id for an invocation.
///
/// Returns the trace-id segment of the context's `traceparent` header,
/// never the full header and never the parent-id segment. Absent or
/// malformed headers resolve through the policy fallback; this never
/// fails.
pub fn resolve(context: &InvocationContext, policy: OperationIdPolicy) -> String {
    match trace_id(context) {
        Some(id) => id,
        None => policy.fallback(),
    }
}

fn trace_id(context: &InvocationContext) -> Option<String> {
    let header = context.trace_context.as_ref()?.traceparent.as_deref()?;
    parse_traceparent(header).map(|t| t.trace_id)
}

/// Parse a `traceparent` header, returning `None` on any malformation.
///
/// Trailing future-version extensions after the flags segment are
/// tolerated; an all-zero trace id is rejected per the W3C contract.
pub fn parse_traceparent(header: &str) -> Option<Traceparent> {
    let mut parts = header.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let parent_id = parts.next()?;
    let flags = parts.next()?;

    if version.len() != 2 || !is_lower_hex(version) {
        return None;
    }
    if trace_id.len() != 32 || !is_lower_hex(trace_id) {
        return None;
    }
    if parent_id.len() != 16 || !is_lower_hex(parent_id) {
        return None;
    }
    if flags.len() != 2 || !is_lower_hex(flags) {
        return None;
    }
    if trace_id.bytes().all(|b| b == b'0') {
        return None;
    }

    Some(Traceparent {
        version: version.to_string(),
        trace_id: trace_id.to_string(),
        parent_id: parent_id.to_string(),
        flags: flags.to_string(),
    })
}

fn is_lower_hex(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "00-763230142f4317478bf6bdcee3886ef0-2839ff750bf4cc46-00";

    fn context_with(header: &str) -> InvocationContext {
        InvocationContext::new().with_traceparent(header)
    }

    #[test]
    fn resolves_trace_id_segment_only() {
        let context = context_with(HEADER);
        assert_eq!(
            resolve(&context, OperationIdPolicy::Strict),
            "763230142f4317478bf6bdcee3886ef0"
        );
    }

    #[test]
    fn resolve_is_idempotent() {
        let context = context_with(HEADER);
        let first = resolve(&context, OperationIdPolicy::Strict);
        let second = resolve(&context, OperationIdPolicy::Strict);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_context_resolves_to_empty_string_under_strict() {
        let context = InvocationContext::new();
        assert_eq!(resolve(&context, OperationIdPolicy::Strict), "");
    }

    #[test]
    fn malformed_headers_are_treated_as_absent() {
        for header in [
            "",
            "garbage",
            "00-shorttrace-2839ff750bf4cc46-00",
            "00-763230142F4317478BF6BDCEE3886EF0-2839ff750bf4cc46-00",
            "00-00000000000000000000000000000000-2839ff750bf4cc46-00",
            "00-763230142f4317478bf6bdcee3886ef0-badparent-00",
        ] {
            let context = context_with(header);
            assert_eq!(resolve(&context, OperationIdPolicy::Strict), "", "{header}");
        }
    }

    #[test]
    fn generate_policy_synthesizes_hex_id_when_header_absent() {
        let context = InvocationContext::new();
        let id = resolve(&context, OperationIdPolicy::Generate);
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));

        // A well-formed header still wins over generation.
        assert_eq!(
            resolve(&context_with(HEADER), OperationIdPolicy::Generate),
            "763230142f4317478bf6bdcee3886ef0"
        );
    }

    #[test]
    fn parse_exposes_parent_segment_for_scope_derivation() {
        let parsed = parse_traceparent(HEADER).expect("valid header");
        assert_eq!(parsed.parent_id, "2839ff750bf4cc46");
        assert_eq!(parsed.version, "00");
        assert_eq!(parsed.flags, "00");
    }
}
