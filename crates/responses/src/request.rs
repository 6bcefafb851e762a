use axum::http::{HeaderMap, header::AUTHORIZATION};
use fastrace::{Span, collector::SpanContext};
use secrecy::SecretString;

/// Header naming a provider tag explicitly, overriding the model id prefix.
pub(crate) const MODEL_PROVIDER_HEADER: &str = "x-model-provider";

/// Runtime context for one gateway request.
///
/// Carries the pass-through bearer credential, the optional provider header
/// and the span context for distributed tracing propagation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Bearer credential forwarded to the upstream as-is.
    pub credential: Option<SecretString>,

    /// Value of the `x-model-provider` header, if present.
    pub provider_tag: Option<String>,

    /// Span context for distributed tracing propagation.
    pub span_context: Option<SpanContext>,
}

impl RequestContext {
    /// Create span with parent context if available, otherwise create a new root
    pub fn new_span(&self, name: &'static str) -> Span {
        if let Some(parent) = self.span_context {
            Span::root(name, parent)
        } else {
            Span::root(name, SpanContext::random())
        }
    }
}

/// Extract the request context from incoming headers.
pub fn extract_context(headers: &HeaderMap, span_context: Option<SpanContext>) -> RequestContext {
    let credential = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| SecretString::from(token.to_string()));

    let provider_tag = headers
        .get(MODEL_PROVIDER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|tag| tag.to_ascii_lowercase());

    RequestContext {
        credential,
        provider_tag,
        span_context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer_and_provider_tag() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sk-test"));
        headers.insert(MODEL_PROVIDER_HEADER, HeaderValue::from_static("Groq"));

        let context = extract_context(&headers, None);

        assert!(context.credential.is_some());
        assert_eq!(context.provider_tag.as_deref(), Some("groq"));
    }

    #[test]
    fn missing_headers_leave_context_empty() {
        let context = extract_context(&HeaderMap::new(), None);

        assert!(context.credential.is_none());
        assert!(context.provider_tag.is_none());
    }
}
