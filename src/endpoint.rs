//! Candidate endpoints and name resolution.
//!
//! A [`Target`] is what the user typed (`host` or `host:port`); a [`Candidate`] is
//! a target whose host has been resolved to the single address that will be raced.

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::Mutex;

use crate::cli::DEFAULT_PORT;
use crate::error::{Error, Result};

/// A candidate endpoint as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    name: String,
    host: String,
    port: u16,
}

impl Target {
    /// Parses `host`, `host:port`, `[v6]` or `[v6]:port`. The port defaults to 22.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |why: &str| Error::Config(format!("invalid host '{}': {}", spec, why));

        let (host, port) = if let Some(rest) = spec.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| invalid("unterminated '['"))?;
            let port = match after {
                "" => None,
                p => Some(p.strip_prefix(':').ok_or_else(|| invalid("expected ':' after ']'"))?),
            };
            (host, port)
        } else {
            match spec.rsplit_once(':') {
                // A bare IPv6 literal has more than one colon and no port.
                Some((host, _)) if host.contains(':') => (spec, None),
                Some((host, port)) => (host, Some(port)),
                None => (spec, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("empty host name"));
        }

        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid("bad port"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            name: spec.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// The argument exactly as the user gave it.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves the host and binds the first address to this target.
    pub async fn resolve<R: Resolve>(&self, resolver: &R) -> Result<Candidate> {
        let addrs = resolver.resolve(&self.host).await?;
        let ip = addrs.into_iter().next().ok_or_else(|| Error::Resolve {
            host: self.host.clone(),
            reason: "no such host".to_string(),
        })?;

        Ok(Candidate {
            name: self.name.clone(),
            addr: SocketAddr::new(ip, self.port),
        })
    }
}

/// A resolved endpoint, ready to be connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    name: String,
    addr: SocketAddr,
}

impl Candidate {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.addr)
    }
}

/// Host name lookup.
///
/// Returns every address known for `host`; an empty list means the name does not
/// resolve. Only the first address is ever used.
pub trait Resolve {
    fn resolve(&self, host: &str) -> impl Future<Output = Result<Vec<IpAddr>>>;
}

/// System DNS resolver backed by hickory-resolver.
///
/// IP literals are returned without touching the network. The underlying resolver
/// is built on first use and reused afterwards.
pub struct DnsResolver {
    resolver: Mutex<Option<hickory_resolver::TokioResolver>>,
}

impl DnsResolver {
    /// Creates a new DNS resolver.
    pub fn new() -> Self {
        Self {
            resolver: Mutex::new(None),
        }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DnsResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsResolver").finish_non_exhaustive()
    }
}

impl Resolve for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let mut guard = self.resolver.lock().await;
        let resolver = match guard.take() {
            Some(resolver) => resolver,
            None => hickory_resolver::Resolver::builder_tokio()
                .map_err(|e| Error::Config(format!("failed to create DNS resolver: {}", e)))?
                .build(),
        };
        let resolver = guard.insert(resolver);

        match resolver.lookup_ip(host).await {
            Ok(lookup) => Ok(lookup.iter().collect()),
            Err(e) if e.is_no_records_found() => Ok(Vec::new()),
            Err(e) => Err(Error::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
