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

use std::{fs::create_dir_all, ops::RangeInclusive, path::Path};

use clap::ValueEnum;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, Zipf};

/// How dispatchers pick the next file to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyDistribution {
    Uniform,
    Zipf,
}

pub fn file_name(index: usize) -> String {
    format!("file-{index:08}")
}

/// Write `count` files of random content with sizes drawn from `sizes` into `dir`.
///
/// Returns the total size in bytes.
pub fn generate_files(dir: &Path, count: usize, sizes: RangeInclusive<usize>) -> std::io::Result<u64> {
    create_dir_all(dir)?;
    let mut rng = rand::rng();
    let mut total = 0;
    for index in 0..count {
        let mut buf = vec![0; rng.random_range(sizes.clone())];
        rng.fill_bytes(&mut buf);
        std::fs::write(dir.join(file_name(index)), &buf)?;
        total += buf.len() as u64;
    }
    Ok(total)
}

/// Picks file indices in `[0, files)`.
#[derive(Debug, Clone)]
pub enum KeyPicker {
    Uniform { files: usize },
    Zipf { files: usize, zipf: Zipf<f64> },
}

impl KeyPicker {
    pub fn new(distribution: KeyDistribution, files: usize, s: f64) -> anyhow::Result<Self> {
        let picker = match distribution {
            KeyDistribution::Uniform => Self::Uniform { files },
            KeyDistribution::Zipf => Self::Zipf {
                files,
                zipf: Zipf::new(files as f64, s)?,
            },
        };
        Ok(picker)
    }

    pub fn pick<R: Rng>(&self, rng: &mut R) -> usize {
        match self {
            Self::Uniform { files } => rng.random_range(0..*files),
            // Zipf samples ranks in [1, n].
            Self::Zipf { files, zipf } => (zipf.sample(rng) as usize).clamp(1, *files) - 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_files() {
        let dir = tempfile::tempdir().unwrap();
        let total = generate_files(dir.path(), 8, 16..=32).unwrap();
        let mut sum = 0;
        for index in 0..8 {
            let len = std::fs::metadata(dir.path().join(file_name(index))).unwrap().len();
            assert!((16..=32).contains(&len));
            sum += len;
        }
        assert_eq!(sum, total);
    }

    #[test]
    fn test_pick_in_range() {
        let mut rng = rand::rng();
        for distribution in [KeyDistribution::Uniform, KeyDistribution::Zipf] {
            let picker = KeyPicker::new(distribution, 10, 1.2).unwrap();
            for _ in 0..1000 {
                assert!(picker.pick(&mut rng) < 10);
            }
        }
    }

    #[test]
    fn test_zipf_skews_to_head() {
        let mut rng = rand::rng();
        let picker = KeyPicker::new(KeyDistribution::Zipf, 100, 1.5).unwrap();
        let head = (0..10_000).filter(|_| picker.pick(&mut rng) == 0).count();
        assert!(head > 10_000 / 100 * 5, "head picked {head} times");
    }
}
