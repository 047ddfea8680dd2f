use crate::capabilities::standard_capabilities;
use crate::handler::ToolHandler;
use crate::router::ToolRouter;
use herd_core::{HerdError, HerdResult, Parameters, ToolRequest, ToolResponse};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{[^}]+\}|<[^>]+>"));

fn default_priority() -> u8 {
    1
}

/// Keywords and example phrasings that make a tool reachable from free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCapability {
    /// Display name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// Whole words that score the tool in keyword fallback.
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    /// Phrasings with `{placeholder}` or `<placeholder>` slots.
    #[serde(default)]
    pub examples: Vec<String>,
    /// 1 (lowest) to 5 (highest).
    #[serde(default = "default_priority")]
    pub priority: u8,
}

impl ToolCapability {
    /// A capability with no keywords or examples and priority 1.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            keywords: BTreeSet::new(),
            examples: Vec::new(),
            priority: default_priority(),
        }
    }

    /// Add keywords.
    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords
            .extend(keywords.iter().map(|k| (*k).to_string()));
        self
    }

    /// Add example phrasings.
    pub fn with_examples(mut self, examples: &[&str]) -> Self {
        self.examples
            .extend(examples.iter().map(|e| (*e).to_string()));
        self
    }

    /// Sets the priority, clamped to 1..=5.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 5);
        self
    }
}

/// A regex that routes matching queries to `tool_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPattern {
    /// Regex source.
    pub pattern: String,
    /// Tool selected on a match.
    pub tool_id: String,
    /// 1 (lowest) to 5 (highest).
    pub priority: u8,
}

struct CompiledPattern {
    descriptor: ToolPattern,
    regex: Regex,
    /// Generated from a capability example rather than registered by hand.
    derived: bool,
}

struct RegisteredCapability {
    tool_id: String,
    capability: ToolCapability,
    keywords: Vec<Regex>,
}

/// Turn an example phrasing into a case-insensitive pattern. Literal text is
/// escaped and every placeholder becomes a non-greedy wildcard.
pub fn derive_pattern(example: &str) -> HerdResult<String> {
    let placeholder = PLACEHOLDER
        .as_ref()
        .map_err(|e| HerdError::Config(e.to_string()))?;
    let mut pattern = String::from("(?i)");
    let mut last = 0;
    for slot in placeholder.find_iter(example) {
        pattern.push_str(&regex::escape(&example[last..slot.start()]));
        pattern.push_str(".*?");
        last = slot.end();
    }
    pattern.push_str(&regex::escape(&example[last..]));
    Ok(pattern)
}

fn compile(pattern: &str) -> HerdResult<Regex> {
    Regex::new(pattern).map_err(|e| HerdError::Config(format!("invalid pattern '{pattern}': {e}")))
}

/// Natural-language front end for a [`ToolRouter`].
///
/// Queries are matched against patterns derived from each capability's
/// examples; the best match wins by priority, then by the length of the
/// matched text, then by the shorter pattern. When no pattern matches, tools
/// are scored by `whole-word keyword hits × priority`. Ties go to the entry
/// registered first.
pub struct SmartRouter {
    router: Arc<ToolRouter>,
    capabilities: RwLock<Vec<RegisteredCapability>>,
    patterns: RwLock<Vec<CompiledPattern>>,
}

impl SmartRouter {
    /// A smart router with no capabilities or patterns.
    pub fn new(router: Arc<ToolRouter>) -> Self {
        Self {
            router,
            capabilities: RwLock::new(Vec::new()),
            patterns: RwLock::new(Vec::new()),
        }
    }

    /// A smart router preloaded with the standard belter and drummer capabilities.
    pub fn with_standard_capabilities(router: Arc<ToolRouter>) -> HerdResult<Self> {
        let smart = Self::new(router);
        for (tool_id, capability) in standard_capabilities() {
            smart.register_capability(tool_id, capability)?;
        }
        Ok(smart)
    }

    /// The underlying router.
    pub fn router(&self) -> &Arc<ToolRouter> {
        &self.router
    }

    /// Register `handler` on the underlying router.
    pub fn register_handler(&self, tool_id: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.router.register_handler(tool_id, handler);
    }

    /// Store `capability` for `tool_id` and derive one pattern per example.
    ///
    /// Registering again for the same tool replaces its capability and its
    /// derived patterns; hand-written patterns are kept.
    pub fn register_capability(
        &self,
        tool_id: impl Into<String>,
        capability: ToolCapability,
    ) -> HerdResult<()> {
        let tool_id = tool_id.into();

        let mut derived = Vec::with_capacity(capability.examples.len());
        for example in &capability.examples {
            let pattern = derive_pattern(example)?;
            debug!(tool = %tool_id, pattern = %pattern, "Generated pattern");
            derived.push(CompiledPattern {
                regex: compile(&pattern)?,
                descriptor: ToolPattern {
                    pattern,
                    tool_id: tool_id.clone(),
                    priority: capability.priority,
                },
                derived: true,
            });
        }

        let keywords = capability
            .keywords
            .iter()
            .map(|kw| compile(&format!(r"(?i)\b{}\b", regex::escape(kw))))
            .collect::<HerdResult<Vec<_>>>()?;

        {
            let mut patterns = self.patterns.write();
            patterns.retain(|p| !(p.derived && p.descriptor.tool_id == tool_id));
            patterns.extend(derived);
        }

        let entry = RegisteredCapability {
            tool_id: tool_id.clone(),
            capability,
            keywords,
        };
        let mut capabilities = self.capabilities.write();
        match capabilities.iter_mut().find(|c| c.tool_id == tool_id) {
            Some(existing) => *existing = entry,
            None => capabilities.push(entry),
        }
        debug!(tool = %tool_id, "Registered capability");
        Ok(())
    }

    /// Add a hand-written pattern. Its named capture groups become request
    /// parameters.
    pub fn register_pattern(
        &self,
        tool_id: impl Into<String>,
        pattern: &str,
        priority: u8,
    ) -> HerdResult<()> {
        let regex = compile(pattern)?;
        self.patterns.write().push(CompiledPattern {
            descriptor: ToolPattern {
                pattern: pattern.to_string(),
                tool_id: tool_id.into(),
                priority: priority.clamp(1, 5),
            },
            regex,
            derived: false,
        });
        Ok(())
    }

    /// Capability registered for `tool_id`.
    pub fn capability(&self, tool_id: &str) -> Option<ToolCapability> {
        self.capabilities
            .read()
            .iter()
            .find(|c| c.tool_id == tool_id)
            .map(|c| c.capability.clone())
    }

    /// Every registered pattern, in registration order.
    pub fn patterns(&self) -> Vec<ToolPattern> {
        self.patterns.read().iter().map(|p| p.descriptor.clone()).collect()
    }

    /// Resolve a free-text query to a [`ToolRequest`].
    ///
    /// The request parameters always carry `query`, plus any named groups
    /// captured by the winning pattern.
    pub fn route_request(&self, query: &str) -> HerdResult<ToolRequest> {
        debug!(query = %query, "Routing query");
        let mut parameters = Parameters::new();
        parameters.insert("query".into(), serde_json::Value::String(query.to_string()));

        if let Some((tool_id, captures)) = self.best_pattern_match(query) {
            parameters.extend(captures);
            debug!(tool = %tool_id, "Selected tool by pattern");
            return Ok(ToolRequest::new(tool_id).with_parameters(parameters));
        }

        debug!("No pattern matched, falling back to keyword scoring");
        let tool_id = self.best_keyword_match(query).ok_or_else(|| {
            HerdError::Routing("No matching tool found for query".to_string())
        })?;
        debug!(tool = %tool_id, "Selected tool by keywords");
        Ok(ToolRequest::new(tool_id).with_parameters(parameters))
    }

    /// [`SmartRouter::route_request`] followed by [`ToolRouter::execute_tool`].
    pub async fn execute_query(&self, query: &str) -> HerdResult<ToolResponse> {
        let request = self.route_request(query)?;
        Ok(self.router.execute_tool(request).await)
    }

    /// Execute an already routed request.
    pub async fn execute_tool(&self, request: ToolRequest) -> ToolResponse {
        self.router.execute_tool(request).await
    }

    fn best_pattern_match(&self, query: &str) -> Option<(String, Parameters)> {
        let patterns = self.patterns.read();
        let mut best: Option<((u8, usize, isize), &CompiledPattern, regex::Captures<'_>)> = None;

        for candidate in patterns.iter() {
            let Some(caps) = candidate.regex.captures(query) else {
                continue;
            };
            let matched_len = caps.get(0).map_or(0, |m| m.as_str().len());
            let rank = (
                candidate.descriptor.priority,
                matched_len,
                -(candidate.descriptor.pattern.len() as isize),
            );
            if best.as_ref().map_or(true, |(r, _, _)| rank > *r) {
                best = Some((rank, candidate, caps));
            }
        }

        best.map(|(_, pattern, caps)| {
            let mut captured = Parameters::new();
            for name in pattern.regex.capture_names().flatten() {
                if let Some(value) = caps.name(name) {
                    captured.insert(
                        name.to_string(),
                        serde_json::Value::String(value.as_str().to_string()),
                    );
                }
            }
            (pattern.descriptor.tool_id.clone(), captured)
        })
    }

    fn best_keyword_match(&self, query: &str) -> Option<String> {
        let capabilities = self.capabilities.read();
        let mut best: Option<(u32, &str)> = None;

        for entry in capabilities.iter() {
            let hits = entry.keywords.iter().filter(|re| re.is_match(query)).count() as u32;
            if hits == 0 {
                continue;
            }
            let score = hits * u32::from(entry.capability.priority);
            debug!(tool = %entry.tool_id, hits, score, "Keyword score");
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, entry.tool_id.as_str()));
            }
        }

        best.map(|(_, id)| id.to_string())
    }
}
