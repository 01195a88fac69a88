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

use std::{borrow::Cow, collections::HashMap, sync::Arc};

use itertools::Itertools;
use parking_lot::Mutex;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry,
    Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

use crate::{
    metrics::{
        Boxer, BoxedCounter, BoxedCounterVec, BoxedGauge, BoxedGaugeVec, BoxedHistogram, BoxedHistogramVec, CounterOps,
        CounterVecOps, GaugeOps, GaugeVecOps, HistogramOps, HistogramVecOps, RegistryOps,
    },
    scope::Scope,
};

#[derive(Debug, Clone)]
enum MetricVec {
    Counter(IntCounterVec),
    Gauge(IntGaugeVec),
    Histogram(HistogramVec),
}

impl CounterOps for IntCounter {
    fn increase(&self, val: u64) {
        self.inc_by(val);
    }
}

impl CounterVecOps for IntCounterVec {
    fn counter(&self, labels: &[Cow<'static, str>]) -> BoxedCounter {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

impl GaugeOps for IntGauge {
    fn increase(&self, val: u64) {
        self.add(val as _);
    }

    fn decrease(&self, val: u64) {
        self.sub(val as _);
    }

    fn absolute(&self, val: u64) {
        self.set(val as _);
    }
}

impl GaugeVecOps for IntGaugeVec {
    fn gauge(&self, labels: &[Cow<'static, str>]) -> BoxedGauge {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

impl HistogramOps for Histogram {
    fn record(&self, val: f64) {
        self.observe(val);
    }
}

impl HistogramVecOps for HistogramVec {
    fn histogram(&self, labels: &[Cow<'static, str>]) -> BoxedHistogram {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

/// Prometheus metric registry with lib `prometheus`.
///
/// Clones share the registered vectors, so multiple caches or servers can use the same registry without registering
/// a metric twice.
#[derive(Debug, Clone)]
pub struct PrometheusMetricsRegistry {
    registry: Arc<Registry>,
    vecs: Arc<Mutex<HashMap<Cow<'static, str>, MetricVec>>>,
}

impl PrometheusMetricsRegistry {
    /// Create an Prometheus metrics registry.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            vecs: Arc::default(),
        }
    }

    /// The wrapped prometheus registry, e.g. for gathering and encoding.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn get_or_register(&self, name: Cow<'static, str>, register: impl FnOnce() -> MetricVec) -> MetricVec {
        self.vecs
            .lock()
            .with(|mut vecs| vecs.entry(name).or_insert_with(register).clone())
    }
}

impl RegistryOps for PrometheusMetricsRegistry {
    fn register_counter_vec(
        &self,
        name: Cow<'static, str>,
        desc: Cow<'static, str>,
        label_names: &'static [&'static str],
    ) -> BoxedCounterVec {
        let vec = self.get_or_register(name.clone(), || {
            MetricVec::Counter(
                register_int_counter_vec_with_registry! { name, desc, label_names, self.registry }
                    .expect("counter vec must be registered"),
            )
        });
        match vec {
            MetricVec::Counter(v) => v.boxed(),
            _ => unreachable!("metric registered with another type"),
        }
    }

    fn register_gauge_vec(
        &self,
        name: Cow<'static, str>,
        desc: Cow<'static, str>,
        label_names: &'static [&'static str],
    ) -> BoxedGaugeVec {
        let vec = self.get_or_register(name.clone(), || {
            MetricVec::Gauge(
                register_int_gauge_vec_with_registry! { name, desc, label_names, self.registry }
                    .expect("gauge vec must be registered"),
            )
        });
        match vec {
            MetricVec::Gauge(v) => v.boxed(),
            _ => unreachable!("metric registered with another type"),
        }
    }

    fn register_histogram_vec(
        &self,
        name: Cow<'static, str>,
        desc: Cow<'static, str>,
        label_names: &'static [&'static str],
    ) -> BoxedHistogramVec {
        let vec = self.get_or_register(name.clone(), || {
            MetricVec::Histogram(
                register_histogram_vec_with_registry! { name, desc, label_names, self.registry }
                    .expect("histogram vec must be registered"),
            )
        });
        match vec {
            MetricVec::Histogram(v) => v.boxed(),
            _ => unreachable!("metric registered with another type"),
        }
    }
}
