use std::sync::Arc;

use pacer::{Connection, HttpTransport, OperationDescriptor, Options};
use serde::Deserialize;

/// On-disk shape of the one argument `pacer` accepts: a descriptor/options
/// pair plus a seed, read from the path in `argv[1]` (no flag parsing).
#[derive(Debug, Deserialize)]
struct RunSpec {
    #[serde(default)]
    descriptor: OperationDescriptor,
    #[serde(default)]
    options: RunOptions,
    #[serde(default)]
    seed: u64,
    #[serde(default)]
    sampling: bool,
}

/// `Options` minus the distribution-name fields a human is unlikely to
/// bother overriding by hand; everything else deserializes straight onto
/// `pacer::Options`.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RunOptions {
    records: u64,
    depth: usize,
    lambda: f64,
    ia: String,
    keysize: String,
    valuesize: String,
    update: f64,
    time: f64,
    moderate: bool,
    skip: bool,
    no_nodelay: bool,
    loadonly: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        let d = Options::default();
        Self {
            records: d.records,
            depth: d.depth,
            lambda: d.lambda,
            ia: d.ia,
            keysize: d.keysize,
            valuesize: d.valuesize,
            update: d.update,
            time: d.time,
            moderate: d.moderate,
            skip: d.skip,
            no_nodelay: d.no_nodelay,
            loadonly: d.loadonly,
        }
    }
}

impl From<RunOptions> for Options {
    fn from(r: RunOptions) -> Self {
        Options {
            records: r.records,
            depth: r.depth,
            lambda: r.lambda,
            ia: r.ia,
            keysize: r.keysize,
            valuesize: r.valuesize,
            update: r.update,
            time: r.time,
            moderate: r.moderate,
            skip: r.skip,
            no_nodelay: r.no_nodelay,
            loadonly: r.loadonly,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: pacer <run-spec.json>"))?;

    tracing::info!(path = %path, "pacer starting");

    let raw = std::fs::read_to_string(&path)?;
    let run_spec: RunSpec = serde_json::from_str(&raw)?;
    let options: Options = run_spec.options.into();

    let transport = Arc::new(HttpTransport::new(options.no_nodelay)?);
    let mut connection = Connection::new(
        transport,
        &run_spec.descriptor,
        options,
        run_spec.sampling,
        run_spec.seed,
    )?;

    connection.start(0.0)?;
    connection.run().await?;

    let stats = connection.stats();
    let summary = serde_json::json!({
        "ops": stats.ops,
        "gets": stats.gets(),
        "posts": stats.posts(),
        "get_misses": stats.get_misses,
        "skips": stats.skips,
        "rx_bytes": stats.rx_bytes,
        "tx_bytes": stats.tx_bytes,
        "get_latency": stats.get_latency_summary(),
        "post_latency": stats.post_latency_summary(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    tracing::info!("pacer finished");
    Ok(())
}
