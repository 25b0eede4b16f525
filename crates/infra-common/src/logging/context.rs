use std::collections::BTreeMap;
use std::fmt;
use tracing::{Level, Span};

/// Component-scoped context attached to log spans
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component that is generating the log (e.g. "authority", "route_sync")
    pub component: &'static str,
    /// Operation being performed
    pub operation: Option<String>,
    /// Additional contextual fields, rendered in key order
    pub fields: BTreeMap<String, String>,
}

impl LogContext {
    pub fn new(component: &'static str) -> Self {
        LogContext {
            component,
            operation: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_operation<S: Into<String>>(component: &'static str, operation: S) -> Self {
        LogContext {
            component,
            operation: Some(operation.into()),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field to the context
    pub fn with_field<K: Into<String>, V: fmt::Display>(mut self, key: K, value: V) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    /// Create a span carrying this context.
    ///
    /// Extra fields are folded into a single `ctx` field since span field
    /// names must be known at compile time.
    pub fn span(&self, level: Level) -> Span {
        let operation = self.operation.as_deref().unwrap_or("-");
        let ctx = self.fields_string();
        match level {
            Level::TRACE => tracing::trace_span!("agency", component = self.component, operation, ctx = %ctx),
            Level::DEBUG => tracing::debug_span!("agency", component = self.component, operation, ctx = %ctx),
            Level::INFO => tracing::info_span!("agency", component = self.component, operation, ctx = %ctx),
            Level::WARN => tracing::warn_span!("agency", component = self.component, operation, ctx = %ctx),
            Level::ERROR => tracing::error_span!("agency", component = self.component, operation, ctx = %ctx),
        }
    }

    fn fields_string(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.component)?;

        if let Some(op) = &self.operation {
            write!(f, "[{}]", op)?;
        }

        for (key, value) in &self.fields {
            write!(f, "[{}={}]", key, value)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_orders_fields() {
        let ctx = LogContext::with_operation("authority", "start_viewing_as")
            .with_field("target", "user-42")
            .with_field("admin", "admin-1");
        assert_eq!(
            ctx.to_string(),
            "[authority][start_viewing_as][admin=admin-1][target=user-42]"
        );
    }

    #[test]
    fn span_builds_without_subscriber() {
        let ctx = LogContext::new("route_sync").with_field("path", "/plan-dashboard");
        let span = ctx.span(Level::DEBUG);
        let _guard = span.enter();
    }
}
