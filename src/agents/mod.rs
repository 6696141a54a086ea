pub mod compliance;
pub mod fraud;
pub mod identity;
pub mod risk;

pub use compliance::ComplianceAgent;
pub use fraud::FraudAgent;
pub use identity::IdentityAgent;
pub use risk::RiskAgent;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{Evidence, Recommendation};

/// A pure, stateless analyzer: evidence in, recommendation out.
///
/// Agents must not write, perform I/O beyond evidence inspection, or mutate
/// shared state; the orchestrator owns persistence and isolation.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Registry name, e.g. `identity_agent`
    fn name(&self) -> &str;

    /// Agent implementation version
    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Analyze the evidence bundle and produce a recommendation
    async fn analyze(&self, evidence: &[Evidence]) -> Result<Recommendation>;
}

/// Open agent registry; iteration order is registration order, which fixes
/// the ordering of recommendation lists and ensemble reasoning
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the four first-class agents
    pub fn with_default_agents() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(IdentityAgent));
        registry.register(Arc::new(FraudAgent));
        registry.register(Arc::new(ComplianceAgent));
        registry.register(Arc::new(RiskAgent));
        registry
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        tracing::debug!(agent = agent.name(), version = agent.version(), "Registered agent");
        self.agents.push(agent);
    }

    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn Agent>> {
        self.agents.iter().find(|agent| agent.name() == name)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Find evidence of a given type (the store already keeps only latest versions
/// in analysis bundles)
pub fn evidence_of_type<'a>(evidence: &'a [Evidence], evidence_type: &str) -> Option<&'a Evidence> {
    evidence.iter().find(|e| e.evidence_type == evidence_type)
}

/// Extract a boolean field by dot path, with default
pub fn bool_field(evidence: &Evidence, path: &str, default: bool) -> bool {
    evidence
        .field(path)
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

/// Extract a float field by dot path, with default
pub fn f64_field(evidence: &Evidence, path: &str, default: f64) -> f64 {
    evidence
        .field(path)
        .and_then(Value::as_f64)
        .unwrap_or(default)
}

/// Extract a string field by dot path
pub fn str_field<'a>(evidence: &'a Evidence, path: &str) -> Option<&'a str> {
    evidence.field(path).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_registry_order() {
        let registry = AgentRegistry::with_default_agents();
        let names: Vec<&str> = registry.agents().iter().map(|a| a.name()).collect();
        assert_eq!(
            names,
            vec!["identity_agent", "fraud_agent", "compliance_agent", "risk_agent"]
        );
    }

    #[test]
    fn test_find_by_name() {
        let registry = AgentRegistry::with_default_agents();
        assert!(registry.find("risk_agent").is_some());
        assert!(registry.find("unknown_agent").is_none());
    }

    #[test]
    fn test_field_helpers() {
        let evidence = Evidence::new(
            "case_1",
            "identity",
            json!({"verified": true, "confidence": 0.94, "extracted_fields": {"full_name": "Jane Doe"}}),
        );

        assert!(bool_field(&evidence, "verified", false));
        assert!(!bool_field(&evidence, "missing", false));
        assert_eq!(f64_field(&evidence, "confidence", 0.0), 0.94);
        assert_eq!(str_field(&evidence, "extracted_fields.full_name"), Some("Jane Doe"));
        assert_eq!(str_field(&evidence, "extracted_fields.nope"), None);
    }
}
