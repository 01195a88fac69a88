// Copyright 2026 filecache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::borrow::Cow;

use super::{BoxedCounter, BoxedGauge, BoxedHistogram, RegistryOps};

/// Metrics recorded by the file cache and the request server.
#[derive(Debug)]
pub struct Metrics {
    /* file cache metrics */
    /// Lookups that found the key.
    pub cache_hit: BoxedCounter,
    /// Lookups that missed.
    pub cache_miss: BoxedCounter,
    /// Entries placed into the table.
    pub cache_insert: BoxedCounter,
    /// Insertions that found the key already present and attached to it instead.
    pub cache_duplicate: BoxedCounter,
    /// Insertions of files larger than the whole budget.
    pub cache_reject: BoxedCounter,
    /// Evicted entries.
    pub cache_evict: BoxedCounter,
    /// Times an evictor blocked on an entry still in use.
    pub cache_evict_wait: BoxedCounter,
    /// Live bytes held by the cache.
    pub cache_usage: BoxedGauge,

    /* server metrics */
    /// Requests dispatched to the server.
    pub server_request: BoxedCounter,
    /// Requests whose file was sent successfully.
    pub server_served: BoxedCounter,
    /// Requests aborted by a parse, read or send failure.
    pub server_failed: BoxedCounter,
    /// Requests served without caching the file.
    pub server_uncached: BoxedCounter,
    /// Time spent handling one request, in seconds.
    pub server_handle_duration: BoxedHistogram,
}

impl Metrics {
    /// Create a new metric with the given name.
    pub fn new(name: impl Into<Cow<'static, str>>, registry: &dyn RegistryOps) -> Self {
        let name: Cow<'static, str> = name.into();

        let filecache_cache_op_total = registry.register_counter_vec(
            "filecache_cache_op_total".into(),
            "filecache file cache operations".into(),
            &["name", "op"],
        );
        let filecache_cache_usage = registry.register_gauge_vec(
            "filecache_cache_usage_bytes".into(),
            "filecache file cache live bytes".into(),
            &["name"],
        );

        let op = |op: &'static str| filecache_cache_op_total.counter(&[name.clone(), op.into()]);

        let cache_hit = op("hit");
        let cache_miss = op("miss");
        let cache_insert = op("insert");
        let cache_duplicate = op("duplicate");
        let cache_reject = op("reject");
        let cache_evict = op("evict");
        let cache_evict_wait = op("evict_wait");
        let cache_usage = filecache_cache_usage.gauge(&[name.clone()]);

        let filecache_server_request_total = registry.register_counter_vec(
            "filecache_server_request_total".into(),
            "filecache server requests by result".into(),
            &["name", "result"],
        );
        let filecache_server_handle_duration = registry.register_histogram_vec(
            "filecache_server_handle_duration".into(),
            "filecache server request handling durations".into(),
            &["name"],
        );

        let result = |result: &'static str| filecache_server_request_total.counter(&[name.clone(), result.into()]);

        let server_request = result("dispatched");
        let server_served = result("served");
        let server_failed = result("failed");
        let server_uncached = result("uncached");
        let server_handle_duration = filecache_server_handle_duration.histogram(&[name.clone()]);

        Self {
            cache_hit,
            cache_miss,
            cache_insert,
            cache_duplicate,
            cache_reject,
            cache_evict,
            cache_evict_wait,
            cache_usage,
            server_request,
            server_served,
            server_failed,
            server_uncached,
            server_handle_duration,
        }
    }
}

#[cfg(all(test, feature = "prometheus"))]
mod tests {
    use prometheus::{Registry, TextEncoder};

    use super::*;
    use crate::metrics::registry::prometheus::PrometheusMetricsRegistry;

    #[test]
    fn test_metrics_share_registry() {
        let registry = PrometheusMetricsRegistry::new(Registry::new());
        let m1 = Metrics::new("a", &registry);
        let m2 = Metrics::new("b", &registry);

        m1.cache_hit.increase(3);
        m2.cache_hit.increase(4);
        m1.cache_usage.absolute(100);

        let text = TextEncoder::new()
            .encode_to_string(&registry.registry().gather())
            .unwrap();
        assert!(text.contains(r#"filecache_cache_op_total{name="a",op="hit"} 3"#));
        assert!(text.contains(r#"filecache_cache_op_total{name="b",op="hit"} 4"#));
        assert!(text.contains(r#"filecache_cache_usage_bytes{name="a"} 100"#));
    }
}
