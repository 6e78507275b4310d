// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service URL value type and registry key derivation.
//!
//! A [`ServiceUrl`] carries everything the registry needs to know about a
//! service or a registry endpoint: scheme, optional host/port, path (the
//! service interface), and a set of string parameters. Equality of
//! registrations and subscriptions is *not* full-URL equality -- it is
//! defined by a canonical key string projected from a fixed subset of URL
//! fields (see [`register_key`], [`cluster_key`], [`config_key`]), carried
//! alongside the URL in a [`UrlKey`].
//!
//! Parsing is deliberately minimal (`scheme://host:port/path?k=v&...`,
//! no percent-decoding); full RFC 3986 handling is out of scope.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// URL option: service alias (group) of a registration or subscription.
pub const ALIAS_OPTION: &str = "alias";
/// URL option: role of the endpoint (`provider` / `consumer`).
pub const ROLE_OPTION: &str = "role";
/// URL option: subscription type discriminator (`cluster` / `config`).
pub const TYPE_OPTION: &str = "type";
/// URL option: logical registry name (defaults to the URL scheme).
pub const NAME_OPTION: &str = "name";
/// URL option: maximum connect retries; `<0` infinite, `0` none, `>0` bound.
pub const MAX_CONNECT_RETRY_TIMES_OPTION: &str = "maxConnectRetryTimes";
/// URL option: milliseconds between task retries.
pub const TASK_RETRY_INTERVAL_OPTION: &str = "taskRetryInterval";
/// URL option: forbid downgrading a non-empty cluster to empty.
pub const PROTECT_NULL_DATUM_OPTION: &str = "protectNullDatum";
/// URL option: region tag propagated to shards.
pub const REGION_OPTION: &str = "region";
/// URL option: data center tag propagated to shards.
pub const DATA_CENTER_OPTION: &str = "dataCenter";

/// Config key used when the subscription URL has no path: the registry-wide
/// global settings document.
pub const GLOBAL_SETTING: &str = "global_setting";

const CLUSTER_TYPE: &str = "cluster";
const CONFIG_TYPE: &str = "config";

/// A service or registry URL.
///
/// Parameters are kept in a `BTreeMap` so rendering and key projection are
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrl {
    scheme: String,
    host: String,
    port: u16,
    path: String,
    params: BTreeMap<String, String>,
}

impl ServiceUrl {
    /// Create a URL with the given scheme and path (no host, no params).
    pub fn new(scheme: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: String::new(),
            port: 0,
            path: path.into(),
            params: BTreeMap::new(),
        }
    }

    /// Builder: set host and port.
    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Builder: set one parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, 0 when unset.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` (empty string when no host).
    pub fn address(&self) -> String {
        if self.host.is_empty() {
            String::new()
        } else if self.port == 0 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Raw parameter lookup.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// String parameter with default.
    pub fn string_param(&self, name: &str, default: &str) -> String {
        match self.param(name) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => default.to_string(),
        }
    }

    /// Integer parameter with default; unparseable values fall back.
    pub fn i32_param(&self, name: &str, default: i32) -> i32 {
        self.param(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Unsigned integer parameter with default; unparseable values fall back.
    pub fn u64_param(&self, name: &str, default: u64) -> u64 {
        self.param(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Boolean parameter with default. Accepts `true`/`false` only.
    pub fn bool_param(&self, name: &str, default: bool) -> bool {
        match self.param(name) {
            Some("true") => true,
            Some("false") => false,
            _ => default,
        }
    }

    /// Canonical key projection: `scheme://path?k=v&...` over the named
    /// parameters, in the order given, skipping absent ones.
    ///
    /// Host and port are deliberately excluded -- a registration's identity
    /// is the service it declares, not the endpoint it happens to live on.
    pub fn projection(&self, keys: &[&str]) -> String {
        let mut out = format!("{}://{}", self.scheme, self.path);
        let mut sep = '?';
        for name in keys {
            if let Some(value) = self.param(name) {
                out.push(sep);
                out.push_str(name);
                out.push('=');
                out.push_str(value);
                sep = '&';
            }
        }
        out
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if !self.host.is_empty() {
            write!(f, "{}", self.host)?;
            if self.port != 0 {
                write!(f, ":{}", self.port)?;
            }
        }
        if !self.path.is_empty() {
            write!(f, "/{}", self.path)?;
        }
        let mut sep = '?';
        for (k, v) in &self.params {
            write!(f, "{}{}={}", sep, k, v)?;
            sep = '&';
        }
        Ok(())
    }
}

/// Error returned by [`ServiceUrl::from_str`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseUrlError(String);

impl fmt::Display for ParseUrlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid service url: {}", self.0)
    }
}

impl std::error::Error for ParseUrlError {}

impl FromStr for ServiceUrl {
    type Err = ParseUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| ParseUrlError(format!("missing scheme in '{}'", s)))?;
        if scheme.is_empty() {
            return Err(ParseUrlError(format!("empty scheme in '{}'", s)));
        }
        let (before_query, query) = match rest.split_once('?') {
            Some((b, q)) => (b, Some(q)),
            None => (rest, None),
        };
        let (authority, path) = match before_query.split_once('/') {
            Some((a, p)) => (a, p),
            None => (before_query, ""),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => {
                let port = p
                    .parse::<u16>()
                    .map_err(|_| ParseUrlError(format!("invalid port '{}' in '{}'", p, s)))?;
                (h.to_string(), port)
            }
            None => (authority.to_string(), 0),
        };
        let mut params = BTreeMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((k, v)) => params.insert(k.to_string(), v.to_string()),
                    None => params.insert(pair.to_string(), String::new()),
                };
            }
        }
        Ok(Self {
            scheme: scheme.to_string(),
            host,
            port,
            path: path.to_string(),
            params,
        })
    }
}

/// Register key: projection over {scheme, path, alias, role}. Providers and
/// consumers both register, so the role participates in identity.
pub fn register_key(url: &ServiceUrl) -> String {
    url.projection(&[ALIAS_OPTION, ROLE_OPTION])
}

/// Cluster subscription key: the register key plus `type=cluster`, so a
/// cluster subscription can never collide with a config subscription.
pub fn cluster_key(url: &ServiceUrl) -> String {
    url.clone()
        .with_param(TYPE_OPTION, CLUSTER_TYPE)
        .projection(&[ALIAS_OPTION, ROLE_OPTION, TYPE_OPTION])
}

/// Config subscription key: the register key plus `type=config`. A URL with
/// no path subscribes to the registry-wide [`GLOBAL_SETTING`] document.
pub fn config_key(url: &ServiceUrl) -> String {
    if url.path().is_empty() {
        GLOBAL_SETTING.to_string()
    } else {
        url.clone()
            .with_param(TYPE_OPTION, CONFIG_TYPE)
            .projection(&[ALIAS_OPTION, ROLE_OPTION, TYPE_OPTION])
    }
}

/// A URL paired with its canonical key. Equality and hashing use the key
/// alone; the URL rides along for drivers and diagnostics.
#[derive(Debug, Clone)]
pub struct UrlKey {
    url: ServiceUrl,
    key: String,
}

impl UrlKey {
    pub fn new(url: ServiceUrl, key: String) -> Self {
        Self { url, key }
    }

    /// Key a URL for registration.
    pub fn register(url: ServiceUrl) -> Self {
        let key = register_key(&url);
        Self { url, key }
    }

    /// Key a URL for a cluster subscription.
    pub fn cluster(url: ServiceUrl) -> Self {
        let key = cluster_key(&url);
        Self { url, key }
    }

    /// Key a URL for a config subscription.
    pub fn config(url: ServiceUrl) -> Self {
        let key = config_key(&url);
        Self { url, key }
    }

    pub fn url(&self) -> &ServiceUrl {
        &self.url
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for UrlKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for UrlKey {}

impl std::hash::Hash for UrlKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for UrlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
