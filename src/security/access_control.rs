//! Peer admission by host identifier.
//!
//! # Responsibilities
//! - Build the allow/deny table once from inline lists and list files
//! - Derive the identifier set of a peer (address, bare host, reverse names)
//! - Decide admission for an identifier set

use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;

use crate::config::loader::ConfigError;
use crate::config::schema::AccessConfig;
use crate::net::PeerAddr;

/// Host-identifier table with allow-over-deny precedence.
#[derive(Debug, Clone, Default)]
pub struct AccessControl {
    entries: HashMap<String, bool>,
    explicit_allow: bool,
}

impl AccessControl {
    /// An access control that admits everyone.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Build from inline lists. Deny entries go in first so a host present in
    /// both lists ends up allowed.
    pub fn from_lists<A, D>(allow: A, deny: D) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let mut entries = HashMap::new();
        for host in deny {
            entries.insert(host.into(), false);
        }
        let mut explicit_allow = false;
        for host in allow {
            entries.insert(host.into(), true);
            explicit_allow = true;
        }
        Self {
            entries,
            explicit_allow,
        }
    }

    /// Merge the configured inline lists with the configured list files.
    pub fn load(config: &AccessConfig) -> Result<Self, ConfigError> {
        let mut allow = config.allow.clone();
        let mut deny = config.deny.clone();
        if let Some(path) = &config.allow_file {
            allow.extend(read_list(path)?);
        }
        if let Some(path) = &config.deny_file {
            deny.extend(read_list(path)?);
        }

        let acl = Self::from_lists(allow, deny);
        tracing::debug!(
            entries = acl.entries.len(),
            explicit_allow = acl.explicit_allow,
            "Access control loaded"
        );
        Ok(acl)
    }

    pub fn has_explicit_allow(&self) -> bool {
        self.explicit_allow
    }

    /// Decide admission for one peer's identifier set.
    pub fn is_allowed<S: AsRef<str>>(&self, identifiers: &[S]) -> bool {
        let lookup = |id: &S| self.entries.get(id.as_ref()).copied();
        if self.explicit_allow {
            identifiers.iter().any(|id| lookup(id) == Some(true))
        } else {
            !identifiers.iter().any(|id| lookup(id) == Some(false))
        }
    }

    /// Resolve the peer's identifiers and decide admission.
    pub async fn check(&self, peer: &PeerAddr, resolver: &dyn ReverseResolver) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        let identifiers = host_identifiers(peer, resolver).await;
        let allowed = self.is_allowed(&identifiers);
        if !allowed {
            tracing::warn!(peer_addr = %peer, identifiers = ?identifiers, "Access denied");
        }
        allowed
    }
}

fn read_list(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::AccessList {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Reverse name lookup for peer identifiers.
#[async_trait]
pub trait ReverseResolver: Send + Sync {
    async fn reverse(&self, ip: IpAddr) -> io::Result<Vec<String>>;
}

/// Reverse lookups through the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl ReverseResolver for SystemResolver {
    async fn reverse(&self, ip: IpAddr) -> io::Result<Vec<String>> {
        let name = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip))
            .await
            .map_err(io::Error::other)??;
        Ok(vec![name])
    }
}

/// Resolver used when name lookups are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolve;

#[async_trait]
impl ReverseResolver for NoResolve {
    async fn reverse(&self, _ip: IpAddr) -> io::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Every identifier a peer can be matched by.
pub async fn host_identifiers(peer: &PeerAddr, resolver: &dyn ReverseResolver) -> Vec<String> {
    match peer {
        PeerAddr::Inet(addr) => {
            let ip = addr.ip();
            let mut ids = vec![addr.to_string(), ip.to_string()];
            match resolver.reverse(ip).await {
                Ok(names) => ids.extend(names.into_iter().map(|n| n.trim_end_matches('.').to_string())),
                Err(e) => tracing::debug!(ip = %ip, error = %e, "Reverse lookup failed"),
            }
            ids
        }
        PeerAddr::Unix(Some(path)) => vec![path.display().to_string()],
        PeerAddr::Unix(None) => Vec::new(),
        PeerAddr::Other(addr) => vec![addr.clone()],
    }
}
