use std::fs;
use std::path::Path;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

use crate::array::hash::{HashFamily, IdentityHash, MixHash};
use crate::array::repl::{LruPolicy, VclLruPolicy};
use crate::array::vcl::VclArray;
use crate::array::zarray::ZArray;
use crate::array::SetAssocArray;
use crate::cache::{ArrayVariant, Cache, DirectFill};

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found, using defaults");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: String,
    pub csv_out: String,
    pub json_out: String,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            csv_out: String::new(),
            json_out: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// Array organization: "set_assoc", "zcache" or "vcl".
    pub kind: String,
    pub lines: u32,
    pub ways: u32,
    /// Replacement candidate budget for the skew array.
    pub candidates: u32,
    /// Per-way sub-line capacities for the variable-line array.
    pub way_sizes: Vec<u8>,
    /// Trailing way indexes acting as FIFO full-line buffers.
    pub buffer_ways: Vec<u8>,
    /// Index hash: "mix" or "identity".
    pub hash: String,
    pub seed: u64,
    pub acc_lat: u32,
    pub fill_lat: u32,
}

impl Config for CacheConfig {}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: "set_assoc".to_string(),
            lines: 4096,
            ways: 8,
            candidates: 16,
            way_sizes: Vec::new(),
            buffer_ways: Vec::new(),
            hash: "mix".to_string(),
            seed: 0,
            acc_lat: 2,
            fill_lat: 120,
        }
    }
}

impl CacheConfig {
    fn hash_family(&self, ways: u32) -> Box<dyn HashFamily> {
        match self.hash.trim().to_ascii_lowercase().as_str() {
            "mix" => Box::new(MixHash::new(ways, self.seed)),
            "identity" => Box::new(IdentityHash),
            other => panic!("unsupported hash kind '{other}' (expected mix|identity)"),
        }
    }

    pub fn build(&self, name: impl Into<String>) -> Cache {
        let array = match self.kind.trim().to_ascii_lowercase().as_str() {
            "set_assoc" => ArrayVariant::SetAssoc(SetAssocArray::new(
                self.lines,
                self.ways,
                Box::new(LruPolicy::new(self.lines)),
                self.hash_family(1),
            )),
            "zcache" => ArrayVariant::Skew(ZArray::new(
                self.lines,
                self.ways,
                self.candidates,
                Box::new(LruPolicy::new(self.lines)),
                self.hash_family(self.ways),
            )),
            "vcl" => {
                assert!(
                    !self.way_sizes.is_empty(),
                    "a vcl cache needs an explicit way_sizes list"
                );
                ArrayVariant::Vcl(VclArray::new(
                    self.lines,
                    self.way_sizes.clone(),
                    self.buffer_ways.clone(),
                    Box::new(VclLruPolicy::new(self.lines, self.way_sizes.clone())),
                    self.hash_family(1),
                ))
            }
            other => panic!("unsupported cache kind '{other}' (expected set_assoc|zcache|vcl)"),
        };
        Cache::new(
            name,
            array,
            Box::new(DirectFill::new(self.fill_lat)),
            self.acc_lat,
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    /// "strided" or "random".
    pub pattern: String,
    pub requests: u64,
    pub req_bytes: u16,
    /// Stride between successive requests, in bytes.
    pub stride: u64,
    /// Wrap-around footprint of the generated address stream, in bytes.
    pub footprint: u64,
    pub write_ratio: f64,
    pub prefetch_ratio: f64,
    pub seed: u64,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            pattern: "strided".to_string(),
            requests: 100_000,
            req_bytes: 8,
            stride: 8,
            footprint: 1 << 20,
            write_ratio: 0.3,
            prefetch_ratio: 0.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimSetup {
    pub sim: SimConfig,
    pub cache: CacheConfig,
    pub traffic: TrafficConfig,
}

impl SimSetup {
    pub fn parse(raw: &str) -> Self {
        let value: Value = raw.parse().expect("cannot parse config file");
        Self {
            sim: SimConfig::from_section(value.get("sim")),
            cache: CacheConfig::from_section(value.get("cache")),
            traffic: TrafficConfig::from_section(value.get("traffic")),
        }
    }

    pub fn load(path: Option<&Path>) -> Self {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .unwrap_or_else(|e| panic!("cannot read config {}: {e}", path.display()));
                Self::parse(&raw)
            }
            None => Self {
                sim: SimConfig::default(),
                cache: CacheConfig::default(),
                traffic: TrafficConfig::default(),
            },
        }
    }
}
