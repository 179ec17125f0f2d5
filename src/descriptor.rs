//! External interface: the JSON-shaped operation descriptor. Loading a
//! *set* of descriptors into a recognized-options structure is out of
//! scope; this module only covers the shape of one descriptor and how
//! it's turned into request-construction fields.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::PacerError;
use crate::operation::Method;

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_port() -> String {
    "80".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationDescriptor {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for OperationDescriptor {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            method: default_method(),
            path: default_path(),
            headers: HashMap::new(),
        }
    }
}

impl OperationDescriptor {
    /// Extract the bare host component from `hostname`, which may be a full
    /// URI.
    pub fn host(&self) -> Result<String, PacerError> {
        let candidate = self.hostname.trim();
        if let Some(rest) = candidate
            .split_once("://")
            .map(|(_, rest)| rest)
            .or(Some(candidate))
        {
            let host_part = rest.split('/').next().unwrap_or(rest);
            let host_part = host_part.split('@').next_back().unwrap_or(host_part);
            let host_only = host_part.split(':').next().unwrap_or(host_part);
            if host_only.is_empty() {
                return Err(PacerError::ConfigInvalid(format!(
                    "empty hostname in descriptor: {}",
                    self.hostname
                )));
            }
            return Ok(host_only.to_string());
        }
        Err(PacerError::ConfigInvalid(format!(
            "could not parse hostname: {}",
            self.hostname
        )))
    }

    pub fn port_number(&self) -> Result<u16, PacerError> {
        self.port
            .trim()
            .parse()
            .map_err(|_| PacerError::ConfigInvalid(format!("malformed port: {}", self.port)))
    }

    pub fn resolved_method(&self) -> Result<Method, PacerError> {
        Method::parse(&self.method)
            .ok_or_else(|| PacerError::ConfigInvalid(format!("unknown method: {}", self.method)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source() {
        let desc: OperationDescriptor = serde_json::from_str("{}").unwrap();
        assert_eq!(desc.hostname, "localhost");
        assert_eq!(desc.port, "80");
        assert_eq!(desc.method, "GET");
        assert_eq!(desc.path, "/");
        assert!(desc.headers.is_empty());
    }

    #[test]
    fn extracts_host_from_full_uri() {
        let desc = OperationDescriptor {
            hostname: "http://example.com:8080/ignored".to_string(),
            ..OperationDescriptor::default()
        };
        assert_eq!(desc.host().unwrap(), "example.com");
    }

    #[test]
    fn extracts_host_from_bare_hostname() {
        let desc = OperationDescriptor {
            hostname: "api.internal".to_string(),
            ..OperationDescriptor::default()
        };
        assert_eq!(desc.host().unwrap(), "api.internal");
    }

    #[test]
    fn malformed_port_is_rejected() {
        let desc = OperationDescriptor {
            port: "notaport".to_string(),
            ..OperationDescriptor::default()
        };
        assert!(desc.port_number().is_err());
    }

    #[test]
    fn unknown_method_is_rejected() {
        let desc = OperationDescriptor {
            method: "PATCH".to_string(),
            ..OperationDescriptor::default()
        };
        assert!(desc.resolved_method().is_err());
    }

    #[test]
    fn headers_round_trip_through_json() {
        let json = r#"{"hostname":"h","port":"8080","method":"post","path":"/x","headers":{"X-Foo":"bar"}}"#;
        let desc: OperationDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.headers.get("X-Foo"), Some(&"bar".to_string()));
        assert_eq!(desc.resolved_method().unwrap(), Method::Post);
    }
}
