//! Merged, read-only catalogue of the tools every session advertises.

use std::borrow::Cow;
use std::collections::HashMap;

use serde_json::Value;

use tp_domain::tool::ToolDescriptor;

use crate::error::McpError;
use crate::protocol::{McpToolDef, ToolCallResult};
use crate::session::ServerSession;

/// One resolved tool: its definition and the session that owns it.
#[derive(Clone, Copy)]
pub struct ToolEntry<'a> {
    pub session: &'a ServerSession,
    pub def: &'a McpToolDef,
}

impl<'a> ToolEntry<'a> {
    pub fn name(&self) -> &'a str {
        &self.def.name
    }

    pub fn input_schema(&self) -> &'a Value {
        &self.def.input_schema
    }
}

/// First-seen `(session, tool)` positions for every advertised name.
///
/// Built once per set of ready sessions; collisions are logged here.
#[derive(Debug, Clone, Default)]
pub(crate) struct ToolIndex {
    slots: Vec<(usize, usize)>,
    by_name: HashMap<String, usize>,
    shadowed: usize,
}

impl ToolIndex {
    pub(crate) fn build(sessions: &[ServerSession]) -> Self {
        let mut index = Self::default();

        for (s, session) in sessions.iter().enumerate() {
            for (t, def) in session.tools().iter().enumerate() {
                if let Some(&slot) = index.by_name.get(&def.name) {
                    let (winner, _) = index.slots[slot];
                    tracing::warn!(
                        tool = %def.name,
                        kept = %sessions[winner].label(),
                        shadowed = %session.label(),
                        "tool name collision, keeping the earlier server"
                    );
                    index.shadowed += 1;
                    continue;
                }
                index.by_name.insert(def.name.clone(), index.slots.len());
                index.slots.push((s, t));
            }
        }

        index
    }

    /// Definitions dropped because an earlier server claimed the name.
    pub(crate) fn shadowed(&self) -> usize {
        self.shadowed
    }
}

/// Tool name → owning session, in session order.
///
/// When two sessions advertise the same name the earlier session wins and
/// the later definition is dropped with a warning.
pub struct ToolRegistry<'a> {
    sessions: &'a [ServerSession],
    index: Cow<'a, ToolIndex>,
}

impl<'a> ToolRegistry<'a> {
    pub fn new(sessions: &'a [ServerSession]) -> Self {
        Self {
            sessions,
            index: Cow::Owned(ToolIndex::build(sessions)),
        }
    }

    /// A view over an index built earlier from the same `sessions`.
    pub(crate) fn with_index(sessions: &'a [ServerSession], index: &'a ToolIndex) -> Self {
        Self {
            sessions,
            index: Cow::Borrowed(index),
        }
    }

    #[cfg(test)]
    pub(crate) fn index(&self) -> &ToolIndex {
        &self.index
    }

    fn entry(&self, (s, t): (usize, usize)) -> ToolEntry<'a> {
        let session = &self.sessions[s];
        ToolEntry {
            session,
            def: &session.tools()[t],
        }
    }

    /// `(name, schema)` pairs, first-seen order.
    pub fn list_tools(&self) -> Vec<(&'a str, &'a Value)> {
        self.iter().map(|e| (e.name(), e.input_schema())).collect()
    }

    pub fn get(&self, name: &str) -> Option<ToolEntry<'a>> {
        self.index
            .by_name
            .get(name)
            .map(|&slot| self.entry(self.index.slots[slot]))
    }

    /// The session that should receive calls to `name`.
    pub fn resolve(&self, name: &str) -> Result<&'a ServerSession, McpError> {
        self.get(name)
            .map(|entry| entry.session)
            .ok_or_else(|| McpError::UnknownTool {
                tool: name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.index.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ToolEntry<'a>> + '_ {
        self.index.slots.iter().map(|&slot| self.entry(slot))
    }

    /// Agent-facing descriptions of every tool.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.iter()
            .map(|e| ToolDescriptor {
                name: e.def.name.clone(),
                server: e.session.label().to_string(),
                description: e.def.description.clone(),
                input_schema: e.def.input_schema.clone(),
            })
            .collect()
    }

    /// Resolve `name` and invoke it on its owning session.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let session = self.resolve(name)?;
        tracing::debug!(tool = name, server = %session.label(), "dispatching tool call");
        session.invoke(name, arguments).await
    }
}
