//! Host-side hooks around the parse entry point.

use super::value::StructuredValue;

/// A hook that rewrites input text or edits parse results.
pub trait Extension: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Rewrite input before it is staged. `None` leaves it unchanged.
    fn preprocess(&self, _input: &str) -> Option<String> {
        None
    }

    /// Edit the resolved parse result.
    fn postprocess(&self, _value: &mut StructuredValue) {}
}

/// Ordered set of extensions.
#[derive(Default)]
pub struct ExtensionHost {
    extensions: Vec<Box<dyn Extension>>,
}

impl ExtensionHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an extension; extensions run in registration order.
    pub fn push(&mut self, extension: impl Extension + 'static) {
        tracing::debug!(extension = extension.name(), "registered extension");
        self.extensions.push(Box::new(extension));
    }

    /// Number of registered extensions.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Whether no extensions are registered.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Run every `preprocess` hook over `input`.
    pub fn preprocess(&self, input: &str) -> Option<String> {
        let mut rewritten: Option<String> = None;
        for extension in &self.extensions {
            let current = rewritten.as_deref().unwrap_or(input);
            if let Some(next) = extension.preprocess(current) {
                tracing::trace!(extension = extension.name(), "input rewritten");
                rewritten = Some(next);
            }
        }
        rewritten
    }

    /// Run every `postprocess` hook over `value`.
    pub fn postprocess(&self, value: &mut StructuredValue) {
        for extension in &self.extensions {
            extension.postprocess(value);
        }
    }
}

impl std::fmt::Debug for ExtensionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.extensions.iter().map(|e| e.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shout;

    impl Extension for Shout {
        fn name(&self) -> &'static str {
            "shout"
        }

        fn preprocess(&self, input: &str) -> Option<String> {
            Some(input.to_uppercase())
        }
    }

    struct Exclaim;

    impl Extension for Exclaim {
        fn name(&self) -> &'static str {
            "exclaim"
        }

        fn preprocess(&self, input: &str) -> Option<String> {
            Some(format!("{}!", input))
        }

        fn postprocess(&self, value: &mut StructuredValue) {
            if let StructuredValue::Array(items) = value {
                items.push(StructuredValue::Bool(true));
            }
        }
    }

    #[test]
    fn test_empty_host_leaves_input_alone() {
        let host = ExtensionHost::new();
        assert!(host.is_empty());
        assert_eq!(host.preprocess("# title"), None);
    }

    #[test]
    fn test_hooks_run_in_registration_order() {
        let mut host = ExtensionHost::new();
        host.push(Shout);
        host.push(Exclaim);
        assert_eq!(host.len(), 2);
        assert_eq!(host.preprocess("hi").as_deref(), Some("HI!"));

        let mut value = StructuredValue::Array(Vec::new());
        host.postprocess(&mut value);
        assert_eq!(
            value,
            StructuredValue::Array(vec![StructuredValue::Bool(true)])
        );
        assert_eq!(format!("{:?}", host), r#"["shout", "exclaim"]"#);
    }
}
