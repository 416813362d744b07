use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::Parser;
use log::info;

use zline::sim::config::SimSetup;
use zline::sim::csv::{CsvBackend, JsonBackend, StatsRecord};
use zline::sim::trace::{TraceReader, TrafficGen};

#[derive(Parser)]
#[command(version, about)]
struct ZlineArgs {
    /// TOML configuration file; defaults apply when omitted.
    config: Option<PathBuf>,

    /// Replay a packed binary trace instead of generating traffic.
    #[arg(long)]
    trace: Option<PathBuf>,

    #[arg(long)]
    requests: Option<u64>,
    #[arg(long)]
    kind: Option<String>,
    #[arg(long)]
    csv_out: Option<PathBuf>,
    #[arg(long)]
    json_out: Option<PathBuf>,
}

pub fn main() {
    let argv = ZlineArgs::parse();

    let mut setup = SimSetup::load(argv.config.as_deref());
    // RUST_LOG wins; the config's log_level is the fallback.
    let mut logger = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        logger.parse_filters(&setup.sim.log_level);
    }
    logger.init();
    if let Some(requests) = argv.requests {
        setup.traffic.requests = requests;
    }
    if let Some(kind) = argv.kind {
        setup.cache.kind = kind;
    }

    let mut cache = setup.cache.build("l1d");
    info!(
        "built {} cache: {} lines, kind {}",
        cache.name(),
        setup.cache.lines,
        setup.cache.kind
    );

    let mut now = 0u64;
    match argv.trace {
        Some(path) => {
            let file = File::open(&path)
                .unwrap_or_else(|e| panic!("cannot open trace {}: {e}", path.display()));
            let mut reader = TraceReader::new(BufReader::new(file));
            while let Some(req) = reader.next_req().expect("trace read failed") {
                now = cache.access(&req).max(now);
            }
        }
        None => {
            let gen = TrafficGen::new(setup.traffic.clone());
            for idx in 0..gen.requests() {
                let req = gen.request(idx, now);
                let resp = cache.access(&req);
                // Serialize the stream: the next request issues no earlier
                // than one cycle after this one, no later than its response.
                now = resp.max(now + 1);
            }
        }
    }

    let stats = *cache.stats();
    let hit_rate = if stats.accesses > 0 {
        stats.hits as f64 / stats.accesses as f64
    } else {
        0.0
    };
    println!(
        "{}: {} accesses, {} hits ({:.2}%), {} misses ({} range), finished at cycle {}",
        cache.name(),
        stats.accesses,
        stats.hits,
        hit_rate * 100.0,
        stats.misses,
        stats.range_misses,
        now
    );

    let csv_path = argv
        .csv_out
        .or_else(|| (!setup.sim.csv_out.is_empty()).then(|| PathBuf::from(&setup.sim.csv_out)));
    if let Some(path) = csv_path {
        let backend = CsvBackend::new(&path).expect("cannot create csv output");
        backend
            .dump(cache.name(), cache.stats(), cache.array_stats())
            .expect("csv dump failed");
        info!("stats written to {}", path.display());
    }

    let json_path = argv
        .json_out
        .or_else(|| (!setup.sim.json_out.is_empty()).then(|| PathBuf::from(&setup.sim.json_out)));
    if let Some(path) = json_path {
        let mut backend = JsonBackend::new(&path).expect("cannot create json output");
        backend
            .dump(&StatsRecord {
                cycle: now,
                name: cache.name(),
                cache: cache.stats(),
                array: cache.array_stats(),
            })
            .expect("json dump failed");
        info!("stats written to {}", path.display());
    }
}
