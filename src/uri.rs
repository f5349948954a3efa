//! Minimal broker URI parsing (§6).
//!
//! Deliberately not a general-purpose URI parser — that's named in §1 as an
//! external collaborator concern. This only recognizes the two forms the
//! connection layer needs: a single endpoint, or a `failover://` list.

use crate::error::{Result, StompError};

pub const DEFAULT_PORT: u16 = 61613;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn to_socket_addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUri {
    pub endpoints: Vec<Endpoint>,
    pub randomize: bool,
}

/// Parses `scheme://host[:port]` or `failover://(url1,url2,…)?randomize=bool`.
pub fn parse(uri: &str) -> Result<BrokerUri> {
    if let Some(rest) = uri.strip_prefix("failover://") {
        parse_failover(rest)
    } else {
        Ok(BrokerUri {
            endpoints: vec![parse_endpoint(uri)?],
            randomize: false,
        })
    }
}

fn parse_failover(rest: &str) -> Result<BrokerUri> {
    let open = rest
        .find('(')
        .ok_or_else(|| StompError::InvalidUri(format!("failover://{rest}")))?;
    let close = rest
        .find(')')
        .ok_or_else(|| StompError::InvalidUri(format!("failover://{rest}")))?;
    if close < open {
        return Err(StompError::InvalidUri(format!("failover://{rest}")));
    }
    let list = &rest[open + 1..close];
    let endpoints = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_endpoint)
        .collect::<Result<Vec<_>>>()?;
    if endpoints.is_empty() {
        return Err(StompError::InvalidUri(format!("failover://{rest}")));
    }

    let mut randomize = false;
    if let Some(query) = rest[close + 1..].strip_prefix('?') {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                if key.eq_ignore_ascii_case("randomize") {
                    randomize = value.eq_ignore_ascii_case("true") || value == "1";
                }
            }
        }
    }

    Ok(BrokerUri { endpoints, randomize })
}

fn parse_endpoint(uri: &str) -> Result<Endpoint> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| StompError::InvalidUri(uri.to_string()))?;
    if rest.is_empty() {
        return Err(StompError::InvalidUri(uri.to_string()));
    }
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| StompError::InvalidUri(uri.to_string()))?;
            (host.to_string(), port)
        }
        None => (rest.to_string(), DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(StompError::InvalidUri(uri.to_string()));
    }
    Ok(Endpoint {
        scheme: scheme.to_string(),
        host,
        port,
    })
}
