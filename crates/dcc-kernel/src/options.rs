//! Container-wide options

use crate::metadata::HandlerName;

/// Environment variable listing handlers attached to every component type,
/// comma separated, each `"ns:name"` or `"name"`.
pub const AUTO_ATTACHED_ENV: &str = "DCC_HANDLER_AUTO_PRIMITIVE";

/// Options shared by the Type Containers of a process
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Handlers appended to every type's requirement list
    pub auto_attached_handlers: Vec<HandlerName>,
}

impl ContainerConfig {
    /// Read options from the environment
    #[must_use]
    pub fn from_env() -> Self {
        let auto_attached_handlers = std::env::var(AUTO_ATTACHED_ENV)
            .map(|raw| Self::parse_handler_list(&raw))
            .unwrap_or_default();

        if !auto_attached_handlers.is_empty() {
            tracing::info!(
                "Auto-attached handlers: {}",
                auto_attached_handlers
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Self {
            auto_attached_handlers,
        }
    }

    /// Add an auto-attached handler
    #[must_use]
    pub fn with_auto_attached(mut self, handler: HandlerName) -> Self {
        self.auto_attached_handlers.push(handler);
        self
    }

    /// Parse a comma-separated handler list; malformed entries are skipped
    #[must_use]
    pub fn parse_handler_list(raw: &str) -> Vec<HandlerName> {
        raw.split(',')
            .filter_map(|entry| {
                let parsed = HandlerName::parse(entry);
                if parsed.is_none() && !entry.trim().is_empty() {
                    tracing::warn!("Ignoring malformed auto-attached handler: {}", entry);
                }
                parsed
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_handler_list() {
        let list = ContainerConfig::parse_handler_list("ext:audit, trace,, :bad");
        assert_eq!(
            list,
            vec![HandlerName::qualified("ext", "audit"), HandlerName::new("trace")]
        );
    }
}
