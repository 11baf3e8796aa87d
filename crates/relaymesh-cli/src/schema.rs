//! OpenAPI component schemas for the rule and topology types

use relaymesh_topology::{
    AgentWeight, ForwardRule, HopMode, HopPlan, IpVersion, LoadBalanceStrategy, NextHop,
    Outbound, Protocol, RuleScope, RuleType, Target, TunnelType,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Relaymesh Topology",
        description = "Forward rules and the hop plans resolved from them"
    ),
    components(schemas(
        RuleType,
        TunnelType,
        RuleScope,
        LoadBalanceStrategy,
        AgentWeight,
        IpVersion,
        Protocol,
        Target,
        ForwardRule,
        HopMode,
        NextHop,
        Outbound,
        HopPlan,
    ))
)]
pub struct TopologyDoc;

/// Render the component schemas as pretty-printed JSON
pub fn schema_json() -> anyhow::Result<String> {
    Ok(TopologyDoc::openapi().to_pretty_json()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_public_type_has_a_schema() {
        let doc = TopologyDoc::openapi();
        let schemas = &doc.components.expect("components").schemas;
        for name in [
            "RuleType",
            "TunnelType",
            "RuleScope",
            "ForwardRule",
            "HopMode",
            "NextHop",
            "Outbound",
            "HopPlan",
        ] {
            assert!(schemas.contains_key(name), "missing schema {}", name);
        }
    }

    #[test]
    fn test_schema_json_renders() {
        let json = schema_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["components"]["schemas"]["HopPlan"].is_object());
    }
}
