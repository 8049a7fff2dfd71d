use std::collections::BTreeMap;

/// Aggregation record for one distinct diagnostic line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStats {
    /// Compile command of the first combo that produced the message.
    pub first_command: String,
    pub count: u64,
}

/// Per-shader diagnostic aggregation.
///
/// Listings are split by line and every line is filed, deduplicated on
/// exact text; only the first offending command string is retained, repeats
/// bump the counter. Lines mentioning `warning X` are warnings, everything
/// else (blank lines included) is an error, matching the external
/// compiler's diagnostic format.
#[derive(Debug, Default)]
pub struct MessageBag {
    pub warnings: BTreeMap<String, MessageStats>,
    pub errors: BTreeMap<String, MessageStats>,
}

impl MessageBag {
    pub fn record_listing(&mut self, command: &str, listing: &str) {
        for line in listing.lines() {
            let map = if line.contains("warning X") {
                &mut self.warnings
            } else {
                &mut self.errors
            };
            let stats = map.entry(line.to_owned()).or_default();
            if stats.count == 0 {
                stats.first_command = command.to_owned();
            }
            stats.count += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }
}

/// All shaders' message bags, keyed by shader name. Shared behind the
/// message-report lock.
#[derive(Debug, Default)]
pub struct MessageBags {
    by_shader: BTreeMap<String, MessageBag>,
}

impl MessageBags {
    pub fn new() -> MessageBags {
        MessageBags::default()
    }

    pub fn shader_mut(&mut self, shader: &str) -> &mut MessageBag {
        self.by_shader.entry(shader.to_owned()).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MessageBag)> {
        self.by_shader
            .iter()
            .map(|(name, bag)| (name.as_str(), bag))
    }

    pub fn is_empty(&self) -> bool {
        self.by_shader.values().all(MessageBag::is_empty)
    }
}
