//! Tunnel transport variants used on the tunnelled legs of a chain

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::rule::RuleError;

/// Encrypted tunnel flavour.
///
/// The `_smux` variants add stream multiplexing on top of the base transport.
/// They do not change which hops tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum TunnelType {
    #[default]
    Ws,
    Tls,
    WsSmux,
    TlsSmux,
}

impl TunnelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelType::Ws => "ws",
            TunnelType::Tls => "tls",
            TunnelType::WsSmux => "ws_smux",
            TunnelType::TlsSmux => "tls_smux",
        }
    }

    pub fn is_smux(&self) -> bool {
        matches!(self, TunnelType::WsSmux | TunnelType::TlsSmux)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, TunnelType::Tls | TunnelType::TlsSmux)
    }

    pub fn is_websocket(&self) -> bool {
        !self.is_tls()
    }
}

impl fmt::Display for TunnelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TunnelType {
    type Err = RuleError;

    /// Parses a tunnel type. An empty string is accepted as `ws`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "ws" => Ok(TunnelType::Ws),
            "tls" => Ok(TunnelType::Tls),
            "ws_smux" => Ok(TunnelType::WsSmux),
            "tls_smux" => Ok(TunnelType::TlsSmux),
            other => Err(RuleError::UnknownTunnelType(other.to_string())),
        }
    }
}

impl TryFrom<String> for TunnelType {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_is_ws() {
        assert_eq!("".parse::<TunnelType>().unwrap(), TunnelType::Ws);
        assert_eq!(TunnelType::default(), TunnelType::Ws);
    }

    #[test]
    fn test_unknown_tunnel_type() {
        let err = "quic".parse::<TunnelType>().unwrap_err();
        assert_eq!(err, RuleError::UnknownTunnelType("quic".to_string()));
    }

    #[test]
    fn test_flags() {
        assert!(TunnelType::TlsSmux.is_smux());
        assert!(TunnelType::TlsSmux.is_tls());
        assert!(TunnelType::WsSmux.is_websocket());
        assert!(!TunnelType::Ws.is_smux());
        assert!(!TunnelType::Tls.is_websocket());
    }

    #[test]
    fn test_deserialize_accepts_empty() {
        let t: TunnelType = serde_json::from_str("\"\"").unwrap();
        assert_eq!(t, TunnelType::Ws);
        let t: TunnelType = serde_json::from_str("\"tls_smux\"").unwrap();
        assert_eq!(t, TunnelType::TlsSmux);
        assert!(serde_json::from_str::<TunnelType>("\"h2\"").is_err());
        assert_eq!(
            serde_json::to_string(&TunnelType::WsSmux).unwrap(),
            "\"ws_smux\""
        );
    }
}
