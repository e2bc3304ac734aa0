//! Collection of errors raised by a single logical operation.

use std::fmt;

use crate::error::{BoxError, Error};

/// Wraps every error encountered while destroying several resources at once.
///
/// Each original error is kept as-is in [`errors`](Self::errors). The
/// `Display` output lists them one per entry, indenting continuation
/// lines; nested aggregates are re-indented as a block instead.
///
/// ```text
/// AggregateError of:
///   socket closed
///   AggregateError of:
///     first
///     second
/// ```
#[derive(Debug)]
pub struct AggregateError {
    /// The collected errors, in the order they were observed.
    pub errors: Vec<BoxError>,
}

impl AggregateError {
    /// Wrap an ordered sequence of errors.
    #[must_use]
    pub fn new(errors: Vec<BoxError>) -> Self {
        Self { errors }
    }

    /// Number of collected errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `true` when nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate over the collected errors.
    pub fn iter(&self) -> impl Iterator<Item = &(dyn std::error::Error + Send + Sync + 'static)> {
        self.errors.iter().map(AsRef::as_ref)
    }
}

fn as_aggregate<'a>(
    error: &'a (dyn std::error::Error + Send + Sync + 'static),
) -> Option<&'a AggregateError> {
    if let Some(aggregate) = error.downcast_ref::<AggregateError>() {
        return Some(aggregate);
    }
    match error.downcast_ref::<Error>() {
        Some(Error::Aggregate(aggregate)) => Some(aggregate),
        _ => None,
    }
}

fn indent_lines(text: &str, prefix: &str) -> String {
    text.split('\n')
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "AggregateError of:")?;
        for (index, error) in self.errors.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            let rendered = if let Some(nested) = as_aggregate(error.as_ref()) {
                let text = nested.to_string();
                indent_lines(text.strip_suffix('\n').unwrap_or(&text), "  ")
            } else {
                // First line gets two spaces, continuation lines four.
                let text = indent_lines(&error.to_string(), "    ");
                text[2..].to_string()
            };
            f.write_str(&rendered)?;
        }
        writeln!(f)
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn boxed(message: &str) -> BoxError {
        message.to_string().into()
    }

    #[test]
    fn lists_each_error_indented() {
        let err = AggregateError::new(vec![boxed("first"), boxed("second")]);
        assert_eq!(err.to_string(), "AggregateError of:\n  first\n  second\n");
        assert_eq!(err.len(), 2);
    }

    #[test]
    fn continuation_lines_get_deeper_indent() {
        let err = AggregateError::new(vec![boxed("line one\nline two")]);
        assert_eq!(err.to_string(), "AggregateError of:\n  line one\n    line two\n");
    }

    #[test]
    fn nested_aggregate_is_reindented_as_block() {
        let inner = AggregateError::new(vec![boxed("a"), boxed("b")]);
        let outer = AggregateError::new(vec![boxed("top"), Box::new(inner) as BoxError]);
        assert_eq!(
            outer.to_string(),
            "AggregateError of:\n  top\n  AggregateError of:\n    a\n    b\n"
        );
    }

    #[test]
    fn nested_pool_error_aggregate_is_detected() {
        let inner = Error::Aggregate(AggregateError::new(vec![boxed("x")]));
        let outer = AggregateError::new(vec![Box::new(inner) as BoxError]);
        assert_eq!(outer.to_string(), "AggregateError of:\n  AggregateError of:\n    x\n");
    }

    #[test]
    fn errors_are_kept_verbatim() {
        let err = AggregateError::new(vec![Box::new(std::io::Error::other("disk")) as BoxError]);
        let io = err.errors[0].downcast_ref::<std::io::Error>();
        assert!(io.is_some());
        assert_eq!(err.iter().count(), 1);
    }

    #[test]
    fn empty_aggregate_renders_header_only() {
        let err = AggregateError::new(Vec::new());
        assert!(err.is_empty());
        assert_eq!(err.to_string(), "AggregateError of:\n\n");
    }
}
