// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;

use super::{
    AgentRule, Classifier, HttpClassifier, KeywordClassifier, KeywordRules, FALLBACK_CONFIDENCE,
};

fn classifier(threshold: f64) -> anyhow::Result<KeywordClassifier> {
    KeywordClassifier::new(KeywordRules::default(), threshold)
}

#[yare::parameterized(
    coder = { "please fix the bug in the parser", "coder" },
    ops = { "Restart the server and check LOGS", "ops" },
    writer = { "draft an email to the team", "writer" },
    fallback = { "hello there", "general" },
)]
#[test_macro(tokio::test)]
async fn routes_to_agent(message: &str, agent: &str) {
    let decision = match classifier(0.6) {
        Ok(c) => c.classify(message, "u1").await.ok(),
        Err(_) => None,
    };
    assert_eq!(decision.as_ref().map(|d| d.agent.as_str()), Some(agent));
    assert_eq!(decision.map(|d| d.content), Some(message.to_owned()));
}

#[tokio::test]
async fn unanimous_match_is_confident() -> anyhow::Result<()> {
    let decision = classifier(0.6)?.classify("fix the bug and add a test", "u1").await?;
    assert_eq!(decision.agent, "coder");
    assert!((decision.confidence - 1.0).abs() < f64::EPSILON);
    assert!(!decision.requires_consensus);
    assert_eq!(decision.delegation_hints.keywords, vec!["bug", "fix", "test"]);
    Ok(())
}

#[tokio::test]
async fn tie_requires_consensus() -> anyhow::Result<()> {
    let decision = classifier(0.1)?.classify("fix the server", "u1").await?;
    assert!(decision.requires_consensus);
    // First rule in order wins the tie.
    assert_eq!(decision.agent, "coder");
    assert!((decision.confidence - 0.5).abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
async fn fallback_confidence_against_threshold() -> anyhow::Result<()> {
    let low = classifier(0.6)?.classify("good morning", "u1").await?;
    assert!((low.confidence - FALLBACK_CONFIDENCE).abs() < f64::EPSILON);
    assert!(low.requires_consensus);

    let lenient = classifier(0.2)?.classify("good morning", "u1").await?;
    assert!(!lenient.requires_consensus);
    Ok(())
}

#[tokio::test]
async fn keywords_match_whole_words_only() -> anyhow::Result<()> {
    let decision = classifier(0.6)?.classify("the prefix is contested", "u1").await?;
    assert_eq!(decision.agent, "general");
    assert!(decision.delegation_hints.keywords.is_empty());
    Ok(())
}

#[tokio::test]
async fn request_ids_are_unique() -> anyhow::Result<()> {
    let c = classifier(0.6)?;
    let a = c.classify("fix it", "u1").await?;
    let b = c.classify("fix it", "u1").await?;
    assert_ne!(a.request_id, b.request_id);
    Ok(())
}

#[tokio::test]
async fn loads_rules_from_json() -> anyhow::Result<()> {
    let rules = KeywordRules {
        rules: vec![AgentRule {
            agent: "billing".to_owned(),
            keywords: vec!["invoice".to_owned()],
        }],
        fallback_agent: "triage".to_owned(),
    };
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(serde_json::to_string(&rules)?.as_bytes())?;

    let c = KeywordClassifier::load(file.path(), 0.6)?;
    assert_eq!(c.classify("send the invoice", "u1").await?.agent, "billing");
    assert_eq!(c.classify("anything else", "u1").await?.agent, "triage");
    Ok(())
}

#[test]
fn delegation_wire_shape() -> anyhow::Result<()> {
    let json = serde_json::json!({
        "requestId": "r1",
        "content": "hi",
        "delegationHints": { "keywords": ["a"] },
        "agent": "coder",
        "confidence": 0.9,
        "requiresConsensus": false,
    });
    let decoded: super::Delegation = serde_json::from_value(json.clone())?;
    assert_eq!(serde_json::to_value(&decoded)?, json);
    Ok(())
}

#[tokio::test]
async fn unreachable_remote_classifier_is_an_error() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let remote = HttpClassifier::new("http://127.0.0.1:1/classify".to_owned())?;
    assert!(remote.classify("fix the bug", "u1").await.is_err());
    Ok(())
}
