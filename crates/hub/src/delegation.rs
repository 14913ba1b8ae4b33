// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routing decisions for `chat` and `command` instructions.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Confidence reported when no rule matched and the fallback agent is used.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelegationHints {
    pub keywords: Vec<String>,
}

/// Which agent should take an instruction, and how sure the classifier is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    pub request_id: String,
    pub content: String,
    #[serde(default)]
    pub delegation_hints: DelegationHints,
    pub agent: String,
    pub confidence: f64,
    #[serde(default)]
    pub requires_consensus: bool,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, message: &str, user_id: &str) -> anyhow::Result<Delegation>;
}

/// One agent and the words that route to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRule {
    pub agent: String,
    pub keywords: Vec<String>,
}

/// On-disk shape of `--classifier-rules`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRules {
    pub rules: Vec<AgentRule>,
    pub fallback_agent: String,
}

impl Default for KeywordRules {
    fn default() -> Self {
        let rule = |agent: &str, words: &[&str]| AgentRule {
            agent: agent.to_owned(),
            keywords: words.iter().map(|w| (*w).to_owned()).collect(),
        };
        Self {
            rules: vec![
                rule("coder", &["code", "bug", "fix", "implement", "refactor", "test", "build"]),
                rule(
                    "researcher",
                    &["research", "find", "search", "investigate", "compare", "summarize"],
                ),
                rule("ops", &["deploy", "restart", "server", "logs", "monitor", "incident"]),
                rule("writer", &["write", "draft", "document", "email", "docs"]),
            ],
            fallback_agent: "general".to_owned(),
        }
    }
}

struct CompiledRule {
    agent: String,
    pattern: Regex,
}

/// Scores each agent by how many of its keywords appear in the message.
pub struct KeywordClassifier {
    rules: Vec<CompiledRule>,
    fallback_agent: String,
    consensus_threshold: f64,
}

impl KeywordClassifier {
    pub fn new(rules: KeywordRules, consensus_threshold: f64) -> anyhow::Result<Self> {
        let compiled = rules
            .rules
            .into_iter()
            .filter(|r| !r.keywords.is_empty())
            .map(|r| {
                let alternation: Vec<String> =
                    r.keywords.iter().map(|k| regex::escape(&k.to_lowercase())).collect();
                let pattern = Regex::new(&format!(r"\b(?:{})\b", alternation.join("|")))?;
                Ok(CompiledRule { agent: r.agent, pattern })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { rules: compiled, fallback_agent: rules.fallback_agent, consensus_threshold })
    }

    pub fn load(path: &Path, consensus_threshold: f64) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let rules: KeywordRules = serde_json::from_str(&contents)?;
        Self::new(rules, consensus_threshold)
    }

    fn decide(&self, message: &str) -> (String, f64, bool, Vec<String>) {
        let lowered = message.to_lowercase();
        let mut keywords: Vec<String> = Vec::new();
        let mut scores: Vec<(&str, usize)> = Vec::with_capacity(self.rules.len());

        for rule in &self.rules {
            let mut hits: Vec<&str> =
                rule.pattern.find_iter(&lowered).map(|m| m.as_str()).collect();
            hits.sort_unstable();
            hits.dedup();
            for hit in &hits {
                if !keywords.iter().any(|k| k == hit) {
                    keywords.push((*hit).to_owned());
                }
            }
            scores.push((rule.agent.as_str(), hits.len()));
        }

        let total: usize = scores.iter().map(|(_, s)| s).sum();
        let top = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
        // Ties go to the earliest rule.
        let best = scores.iter().find(|(_, s)| top > 0 && *s == top);
        let Some((agent, _)) = best else {
            let consensus = FALLBACK_CONFIDENCE < self.consensus_threshold;
            return (self.fallback_agent.clone(), FALLBACK_CONFIDENCE, consensus, keywords);
        };

        let tied = scores.iter().filter(|(_, s)| *s == top).count() > 1;
        let confidence = top as f64 / total as f64;
        (agent.to_string(), confidence, tied || confidence < self.consensus_threshold, keywords)
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, message: &str, user_id: &str) -> anyhow::Result<Delegation> {
        let (agent, confidence, requires_consensus, keywords) = self.decide(message);
        tracing::debug!(user = %user_id, %agent, confidence, requires_consensus, "classified");
        Ok(Delegation {
            request_id: uuid::Uuid::new_v4().to_string(),
            content: message.to_owned(),
            delegation_hints: DelegationHints { keywords },
            agent,
            confidence,
            requires_consensus,
        })
    }
}

/// Classifier hosted by a remote service.
pub struct HttpClassifier {
    url: String,
    client: Client,
}

impl HttpClassifier {
    /// Fails when no TLS backend is available to build the client.
    pub fn new(url: String) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, message: &str, user_id: &str) -> anyhow::Result<Delegation> {
        let body = serde_json::json!({ "message": message, "userId": user_id });
        let resp = self.client.post(&self.url).json(&body).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
#[path = "delegation_tests.rs"]
mod tests;
