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

//! Load generator for the filecache server.
//!
//! Generates a file set, serves it through a [`Server`] and drives it from several dispatcher threads.

mod handler;
mod workload;

use std::{
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use bytesize::ByteSize;
use clap::Parser;
use filecache::prelude::*;
use handler::{BenchHandler, BenchRequest};
use itertools::Itertools;
use prometheus::{Registry, TextEncoder};
use workload::{file_name, generate_files, KeyDistribution, KeyPicker};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Directory for the generated files. A temporary directory is used if not set.
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Generated file count.
    #[arg(long, default_value_t = 1000)]
    files: usize,

    /// Min file size.
    #[arg(long, default_value = "1KiB")]
    file_size_min: ByteSize,

    /// Max file size.
    #[arg(long, default_value = "64KiB")]
    file_size_max: ByteSize,

    /// Worker count. `0` handles requests on the dispatcher threads.
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Request queue capacity.
    #[arg(long, default_value_t = 64)]
    queue: usize,

    /// Cache capacity. `0` disables the cache.
    #[arg(long, default_value = "16MiB")]
    cache: ByteSize,

    /// Cache bucket count.
    #[arg(long, default_value_t = 1024)]
    buckets: usize,

    /// Dispatcher count.
    #[arg(long, default_value_t = 4)]
    dispatchers: usize,

    /// Key distribution of requests.
    #[arg(long, value_enum, default_value_t = KeyDistribution::Zipf)]
    distribution: KeyDistribution,

    /// For `--distribution zipf` only.
    #[arg(long, default_value_t = 1.0)]
    distribution_zipf_s: f64,

    /// Bench duration.
    #[arg(short, long, default_value = "10s")]
    time: humantime::Duration,

    /// Dump prometheus metrics after the bench.
    #[arg(long, default_value_t = false)]
    metrics: bool,
}

#[derive(Debug, thiserror::Error)]
enum ArgError {
    #[error("\"--{0}\" value must be greater than 0")]
    Zero(&'static str),
    #[error("invalid file size range: [{min}, {max}]")]
    FileSizeRange { min: ByteSize, max: ByteSize },
    #[error("\"--distribution-zipf-s\" value must be greater than 0, given: {0}")]
    ZipfExponent(f64),
}

impl Args {
    fn validate(&self) -> std::result::Result<(), ArgError> {
        if self.files == 0 {
            return Err(ArgError::Zero("files"));
        }
        if self.dispatchers == 0 {
            return Err(ArgError::Zero("dispatchers"));
        }
        if self.file_size_min > self.file_size_max {
            return Err(ArgError::FileSizeRange {
                min: self.file_size_min,
                max: self.file_size_max,
            });
        }
        if self.distribution == KeyDistribution::Zipf && self.distribution_zipf_s <= 0.0 {
            return Err(ArgError::ZipfExponent(self.distribution_zipf_s));
        }
        Ok(())
    }
}

fn init_logger() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    #[cfg(feature = "tracing")]
    fastrace::set_reporter(fastrace::collector::ConsoleReporter, fastrace::collector::Config::default());

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logger();

    #[cfg(feature = "deadlock")]
    {
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_secs(1));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }

            println!("{} deadlocks detected", deadlocks.len());
            for (i, threads) in deadlocks.iter().enumerate() {
                println!("Deadlock #{}", i);
                for t in threads {
                    println!("Thread Id {:#?}", t.thread_id());
                    println!("{:#?}", t.backtrace());
                }
            }
            panic!()
        });
    }

    let args = Args::parse();
    println!("{:#?}", args);
    args.validate()?;

    // The temporary directory is removed on drop.
    let (dir, _tempdir) = match &args.dir {
        Some(dir) => (dir.clone(), None),
        None => {
            let tempdir = tempfile::tempdir()?;
            (tempdir.path().to_path_buf(), Some(tempdir))
        }
    };

    let sizes = args.file_size_min.as_u64() as usize..=args.file_size_max.as_u64() as usize;
    let total = generate_files(&dir, args.files, sizes)?;
    println!("generated {} files, {} in total, at {:?}", args.files, ByteSize::b(total), dir);

    let registry = args.metrics.then(|| PrometheusMetricsRegistry::new(Registry::new()));

    let mut builder = ServerBuilder::new(BenchHandler::new(&dir)?)
        .with_name("bench")
        .with_workers(args.workers)
        .with_queue_capacity(args.queue)
        .with_cache_capacity(args.cache.as_u64() as usize)
        .with_buckets(args.buckets);
    if let Some(registry) = &registry {
        builder = builder.with_metrics_registry(Box::new(registry.clone()));
    }
    let server = builder.build()?;

    let picker = KeyPicker::new(args.distribution, args.files, args.distribution_zipf_s)?;
    let requests = AtomicU64::new(0);
    let time: Duration = args.time.into();

    let start = Instant::now();
    let deadline = start + time;
    std::thread::scope(|s| {
        for _ in 0..args.dispatchers {
            s.spawn(|| {
                let mut rng = rand::rng();
                while Instant::now() < deadline {
                    let request = BenchRequest {
                        name: file_name(picker.pick(&mut rng)),
                        submitted: Instant::now(),
                    };
                    if server.request(request).is_err() {
                        break;
                    }
                    requests.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });
    server.shutdown();
    let elapsed = start.elapsed();

    let handler = server.handler();
    let requests = requests.load(Ordering::Relaxed);
    let hits = requests.saturating_sub(handler.reads());
    let secs = elapsed.as_secs_f64();
    let latency = handler.latency();

    println!();
    println!("Total:");
    println!("elapsed: {elapsed:?}");
    println!("requests: {requests}, errors: {}", handler.errors());
    println!(
        "throughput: {:.2} req/s, {}/s",
        requests as f64 / secs,
        ByteSize::b((handler.bytes() as f64 / secs) as u64)
    );
    println!("hit ratio: {:.4}", if requests == 0 { 0.0 } else { hits as f64 / requests as f64 });
    println!(
        "latency (us): {}, max: {}",
        [("p50", 0.5), ("p90", 0.9), ("p99", 0.99), ("p999", 0.999)]
            .iter()
            .map(|(label, q)| format!("{label}: {}", latency.value_at_quantile(*q)))
            .join(", "),
        latency.max()
    );

    if let Some(registry) = &registry {
        println!();
        println!("{}", TextEncoder::new().encode_to_string(&registry.registry().gather())?);
    }

    #[cfg(feature = "tracing")]
    fastrace::flush();

    Ok(())
}
