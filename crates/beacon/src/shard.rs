// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shard: one member instance of a service cluster.

use crate::url::{ServiceUrl, DATA_CENTER_OPTION, REGION_OPTION};

/// Default shard weight when the URL carries none.
pub const DEFAULT_WEIGHT: u32 = 100;

/// One member instance of a service cluster: address, weight, and placement
/// attributes. Shards are what cluster subscriptions stream to handlers and
/// what the backup adapter persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    /// Unique shard name within its cluster (typically `host:port`).
    pub name: String,

    /// The shard's service URL.
    pub url: ServiceUrl,

    /// Load-balancing weight.
    pub weight: u32,

    /// Region the shard runs in, if known.
    pub region: Option<String>,

    /// Data center the shard runs in, if known.
    pub data_center: Option<String>,
}

impl Shard {
    /// Create a shard named after the URL's address, picking weight, region,
    /// and data center off the URL parameters.
    pub fn from_url(url: ServiceUrl) -> Self {
        let name = {
            let addr = url.address();
            if addr.is_empty() {
                url.path().to_string()
            } else {
                addr
            }
        };
        let weight = url.u64_param("weight", u64::from(DEFAULT_WEIGHT)) as u32;
        let region = url.param(REGION_OPTION).map(str::to_string);
        let data_center = url.param(DATA_CENTER_OPTION).map(str::to_string);
        Self {
            name,
            url,
            weight,
            region,
            data_center,
        }
    }

    /// Create a shard with an explicit name.
    pub fn named(name: impl Into<String>, url: ServiceUrl) -> Self {
        Self {
            name: name.into(),
            url,
            weight: DEFAULT_WEIGHT,
            region: None,
            data_center: None,
        }
    }

    /// Builder: set weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Builder: set region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Builder: set data center.
    pub fn with_data_center(mut self, data_center: impl Into<String>) -> Self {
        self.data_center = Some(data_center.into());
        self
    }
}
