//! Flow lookup: named prompt templates that become a leading system message.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::FlowsConfig;
use crate::error::FlowError;
use crate::message::ChatMessage;

/// A resolved flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
}

/// Listing entry for `GET /api/flows`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSummary {
    pub name: String,
    pub description: String,
}

/// Lookup of flows by name.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Find a flow. `Ok(None)` means the name is unknown.
    async fn get(&self, name: &str) -> Result<Option<Flow>, FlowError>;

    /// Flows available for selection.
    async fn list(&self) -> Vec<FlowSummary>;

    /// Instruction used when a flow has no system prompt.
    fn fallback_instruction(&self) -> &str;
}

/// Flow store backed by `[[flows.entries]]` configuration.
pub struct ConfigFlowStore {
    flows: HashMap<String, Flow>,
    order: Vec<String>,
    allow_unknown: bool,
    fallback_instruction: String,
}

impl ConfigFlowStore {
    pub fn new(config: &FlowsConfig) -> Self {
        let mut flows = HashMap::with_capacity(config.entries.len());
        let mut order = Vec::with_capacity(config.entries.len());

        for entry in &config.entries {
            if flows.contains_key(&entry.name) {
                tracing::warn!(flow = %entry.name, "Duplicate flow definition, keeping the first");
                continue;
            }
            order.push(entry.name.clone());
            flows.insert(
                entry.name.clone(),
                Flow {
                    name: entry.name.clone(),
                    description: entry.description.clone(),
                    system_prompt: entry.system_prompt.clone(),
                },
            );
        }

        Self {
            flows,
            order,
            allow_unknown: config.allow_unknown,
            fallback_instruction: config.fallback_instruction.clone(),
        }
    }

    /// Flow synthesized for names without a definition.
    fn synthesize(name: &str) -> Flow {
        Flow {
            name: name.to_string(),
            description: None,
            system_prompt: Some(format!(
                "You are an AI assistant specialized in restaurant analytics. \
                 You help restaurant owners understand their data and make better business decisions.\n\
                 Flow: {}",
                name
            )),
        }
    }
}

#[async_trait]
impl FlowStore for ConfigFlowStore {
    async fn get(&self, name: &str) -> Result<Option<Flow>, FlowError> {
        if let Some(flow) = self.flows.get(name) {
            return Ok(Some(flow.clone()));
        }
        if self.allow_unknown {
            return Ok(Some(Self::synthesize(name)));
        }
        Ok(None)
    }

    async fn list(&self) -> Vec<FlowSummary> {
        self.order
            .iter()
            .filter_map(|name| self.flows.get(name))
            .map(|flow| FlowSummary {
                name: flow.name.clone(),
                description: flow.description.clone().unwrap_or_default(),
            })
            .collect()
    }

    fn fallback_instruction(&self) -> &str {
        &self.fallback_instruction
    }
}

/// System message for a flow, falling back to the generic instruction.
pub fn system_instruction(flow: &Flow, fallback: &str) -> ChatMessage {
    let content = flow
        .system_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(fallback);
    ChatMessage::system(content)
}

/// Prepend the flow's system instruction to the history.
pub fn apply_flow(flow: &Flow, fallback: &str, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(system_instruction(flow, fallback));
    out.extend(messages);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowEntry;
    use crate::message::Role;

    fn config(allow_unknown: bool) -> FlowsConfig {
        FlowsConfig {
            allow_unknown,
            entries: vec![
                FlowEntry {
                    name: "restaurant_advisor".into(),
                    description: Some("General advice".into()),
                    system_prompt: Some("You advise restaurants.".into()),
                },
                FlowEntry {
                    name: "bare".into(),
                    description: None,
                    system_prompt: None,
                },
            ],
            ..FlowsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_known_flow() {
        let store = ConfigFlowStore::new(&config(false));
        let flow = store.get("restaurant_advisor").await.unwrap().unwrap();
        let msg = system_instruction(&flow, store.fallback_instruction());
        assert_eq!(msg.role, Role::System);
        assert_eq!(msg.content, "You advise restaurants.");
    }

    #[tokio::test]
    async fn test_flow_without_prompt_uses_fallback() {
        let store = ConfigFlowStore::new(&config(false));
        let flow = store.get("bare").await.unwrap().unwrap();
        let msg = system_instruction(&flow, store.fallback_instruction());
        assert_eq!(msg.content, FlowsConfig::default().fallback_instruction);
    }

    #[tokio::test]
    async fn test_unknown_flow() {
        let strict = ConfigFlowStore::new(&config(false));
        assert_eq!(strict.get("nope").await.unwrap(), None);

        let lenient = ConfigFlowStore::new(&config(true));
        let flow = lenient.get("menu_optimizer").await.unwrap().unwrap();
        assert!(flow.system_prompt.unwrap().contains("Flow: menu_optimizer"));
    }

    #[tokio::test]
    async fn test_list_keeps_config_order() {
        let store = ConfigFlowStore::new(&config(true));
        let names: Vec<_> = store.list().await.into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["restaurant_advisor", "bare"]);
    }

    #[test]
    fn test_apply_flow_prepends() {
        let flow = Flow {
            name: "x".into(),
            description: None,
            system_prompt: Some("sys".into()),
        };
        let out = apply_flow(&flow, "fallback", vec![ChatMessage::user("Hi")]);
        assert_eq!(out, vec![ChatMessage::system("sys"), ChatMessage::user("Hi")]);
    }
}
