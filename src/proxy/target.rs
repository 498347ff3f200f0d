use anyhow::{Context, Result, bail};

const DEFAULT_ORIGIN_PORT: u16 = 80;

/// Extracts the cache/origin key from a request-target.
///
/// An absolute `http://` target loses its scheme; anything else loses everything up to and
/// including its first `/`. A target with no `/` at all yields an empty key.
pub fn request_filename(target: &str) -> &str {
    if let Some(rest) = target.strip_prefix("http://") {
        return rest;
    }
    target.split_once('/').map(|(_, rest)| rest).unwrap_or("")
}

/// Where a cache miss is forwarded to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginTarget {
    pub host: String,
    pub port: u16,
    /// Origin-form request-target, always starting with `/`.
    pub path: String,
    explicit_port: bool,
}

impl OriginTarget {
    /// Value for the forwarded `Host` header.
    pub fn host_header(&self) -> String {
        if self.explicit_port {
            self.authority()
        } else if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Splits a request filename into origin host, optional port and path.
pub fn parse_origin_target(filename: &str) -> Result<OriginTarget> {
    let (authority, rest) = filename.split_once('/').unwrap_or((filename, ""));
    let (host, port) = split_host_port(authority)
        .with_context(|| format!("invalid origin authority '{authority}'"))?;
    if host.is_empty() {
        bail!("origin host must not be empty");
    }
    Ok(OriginTarget {
        host: host.to_string(),
        port: port.unwrap_or(DEFAULT_ORIGIN_PORT),
        path: format!("/{rest}"),
        explicit_port: port.is_some(),
    })
}

fn split_host_port(authority: &str) -> Result<(&str, Option<u16>)> {
    if let Some(bracketed) = authority.strip_prefix('[') {
        let Some((host, after)) = bracketed.split_once(']') else {
            bail!("unterminated IPv6 literal");
        };
        return match after {
            "" => Ok((host, None)),
            other => match other.strip_prefix(':') {
                Some(port) => Ok((host, Some(parse_port(port)?))),
                None => bail!("unexpected data after IPv6 literal"),
            },
        };
    }

    match authority.split_once(':') {
        Some((host, port)) => Ok((host, Some(parse_port(port)?))),
        None => Ok((authority, None)),
    }
}

fn parse_port(port: &str) -> Result<u16> {
    port.parse::<u16>()
        .with_context(|| format!("invalid port '{port}'"))
}
