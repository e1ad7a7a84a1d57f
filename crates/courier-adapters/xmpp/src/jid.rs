//! XMPP addresses.

use std::fmt;
use std::str::FromStr;

use crate::error::XmppError;

/// A parsed `node@domain/resource` address.
///
/// Node and domain compare case-insensitively, so they are stored
/// lowercased. The resource is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The address without its resource.
    pub fn bare(&self) -> Jid {
        Jid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }

    /// Returns a copy with the given resource.
    pub fn with_resource(&self, resource: impl Into<String>) -> Jid {
        Jid {
            resource: Some(resource.into()),
            ..self.bare()
        }
    }

    /// Returns true when both addresses share node and domain.
    pub fn same_bare(&self, other: &Jid) -> bool {
        self.node == other.node && self.domain == other.domain
    }
}

impl FromStr for Jid {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (rest, resource) = match s.split_once('/') {
            Some((rest, res)) => (rest, Some(res)),
            None => (s, None),
        };
        let (node, domain) = match rest.split_once('@') {
            Some((node, domain)) => (Some(node), domain),
            None => (None, rest),
        };

        let invalid = || XmppError::InvalidJid(s.to_string());
        if domain.is_empty() || domain.contains('@') {
            return Err(invalid());
        }
        if node.is_some_and(str::is_empty) || resource.is_some_and(str::is_empty) {
            return Err(invalid());
        }

        Ok(Jid {
            node: node.map(str::to_lowercase),
            domain: domain.to_lowercase(),
            resource: resource.map(str::to_string),
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(node) = &self.node {
            write!(f, "{node}@")?;
        }
        f.write_str(&self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{resource}")?;
        }
        Ok(())
    }
}
