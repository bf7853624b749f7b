//! Command-line front end for chunkscope.
//!
//! Talks to a file-sharing service over HTTP (or serves a local directory
//! in-process) and exercises the clients and render workers end to end.
#![allow(clippy::uninlined_format_args, clippy::too_many_lines)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use thiserror::Error;

use chunkscope_clients::{
    ClientConfig, SpikeQuery, SpikeTrainsClient, UnitSpikeTrain, VideoClient, VideoConfig,
};
use chunkscope_io::{
    ApiTransport, DatasetReader, DirectoryNode, FileSystemClient, HttpTransport, LocalTransport,
    ServiceDatasetReader, TransportConfig,
};
use chunkscope_render::{
    RasterData, RasterPainter, RasterPlot, RasterSurface, RenderConfig, RenderOptions,
    RenderWorker, Rgba,
};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] chunkscope_io::Error),

    #[error("{0}")]
    Client(#[from] chunkscope_core::Error),

    #[error("render error: {0}")]
    Render(#[from] chunkscope_render::RenderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

/// Browse, query and render chunked remote recordings.
#[derive(Parser)]
#[command(name = "chunkscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    source: Source,

    /// Verbose logging (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Source {
    /// Service endpoint accepting API requests
    #[arg(
        long,
        env = "CHUNKSCOPE_ENDPOINT",
        default_value = "http://localhost:61752/api",
        global = true
    )]
    endpoint: String,

    /// Serve this local directory in-process (overrides --endpoint)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// User id attached to service queries
    #[arg(long, env = "CHUNKSCOPE_USER_ID", global = true)]
    user_id: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "60", global = true)]
    timeout_secs: u64,
}

/// Where dataset slices come from.
#[derive(Args)]
struct DatasetSource {
    /// Zarr store URI read through the service
    #[arg(long, required_unless_present = "h5")]
    uri: Option<String>,

    /// Local HDF5 file
    #[arg(long)]
    h5: Option<PathBuf>,

    /// Group holding the data
    #[arg(long, default_value = "/units")]
    group: String,

    /// Elements per chunk
    #[arg(long, default_value = "10000")]
    chunk_size: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the service answers and report its protocol version
    Probe,

    /// List a directory
    Ls {
        /// Directory path
        #[arg(default_value = "")]
        path: String,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a file (or a byte range of it) to stdout or a file
    Cat {
        /// File path or http(s) URL
        path: String,

        /// First byte
        #[arg(long, requires = "end")]
        start: Option<u64>,

        /// One past the last byte
        #[arg(long, requires = "start")]
        end: Option<u64>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Send a raw query to a server-side service
    Query {
        /// Service name
        service: String,

        /// Query as JSON
        query: String,
    },

    /// Print spike trains in a time window
    Spikes {
        #[command(flatten)]
        dataset: DatasetSource,

        /// Window start in seconds (default: recording start)
        #[arg(long)]
        start: Option<f64>,

        /// Window end in seconds (default: recording end)
        #[arg(long)]
        end: Option<f64>,

        /// Restrict to these unit ids
        #[arg(long, value_delimiter = ',')]
        units: Vec<i64>,

        /// Print the trains as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render a spike raster to a PPM image
    Raster {
        #[command(flatten)]
        dataset: DatasetSource,

        /// Window start in seconds
        #[arg(long)]
        start: f64,

        /// Window end in seconds
        #[arg(long)]
        end: f64,

        /// Restrict to these unit ids
        #[arg(long, value_delimiter = ',')]
        units: Vec<i64>,

        /// Image width
        #[arg(long, default_value = "1200")]
        width: u32,

        /// Image height
        #[arg(long, default_value = "600")]
        height: u32,

        /// Output PPM file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Extract one video frame as JPEG
    Frame {
        /// Video URI
        uri: String,

        /// Frame index
        #[arg(conflicts_with = "time", required_unless_present = "time")]
        index: Option<u64>,

        /// Time in seconds instead of a frame index
        #[arg(long)]
        time: Option<f64>,

        /// JPEG quality (1-100)
        #[arg(long, default_value = "40")]
        quality: u8,

        /// Output JPEG file
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Unit colors, cycled by row.
const PALETTE: [Rgba; 6] = [
    Rgba::rgb(31, 119, 180),
    Rgba::rgb(255, 127, 14),
    Rgba::rgb(44, 160, 44),
    Rgba::rgb(214, 39, 40),
    Rgba::rgb(148, 103, 189),
    Rgba::rgb(140, 86, 75),
];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let fs = Arc::new(FileSystemClient::new(transport(&cli.source)?));

    match cli.command {
        Commands::Probe => {
            let probe = fs.probe().await?;
            println!("Protocol version: {}", probe.protocol_version);
            println!("Proxy: {}", probe.proxy);
        }

        Commands::Ls { path, json } => {
            let node = fs.read_dir(&path).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&listing_json(&node))?);
            } else {
                print_listing(&node);
            }
        }

        Commands::Cat {
            path,
            start,
            end,
            output,
        } => {
            let range = match (start, end) {
                (Some(s), Some(e)) if e >= s => Some(s..e),
                (Some(s), Some(e)) => {
                    return Err(CliError::Usage(format!("end {e} precedes start {s}")));
                }
                _ => None,
            };
            let bytes = fs.read_file(&path, range, false).await?;
            match output {
                Some(out) => {
                    std::fs::write(&out, &bytes)?;
                    println!("Wrote {} bytes to {}", bytes.len(), out.display());
                }
                None => std::io::stdout().lock().write_all(&bytes)?,
            }
        }

        Commands::Query { service, query } => {
            let query: serde_json::Value = serde_json::from_str(&query)?;
            let reply = fs.service_query(&service, query).await?;
            println!("{}", serde_json::to_string_pretty(&reply.result)?);
            if let Some(payload) = reply.payload {
                println!("Binary payload: {} bytes", payload.len());
            }
        }

        Commands::Spikes {
            dataset,
            start,
            end,
            units,
            json,
        } => {
            let client = spike_client(&fs, &dataset)?;
            let (t0, t1) = client.time_range().await?;
            let window = (start.unwrap_or(t0), end.unwrap_or(t1 + 1e-9));
            let trains = query_trains(&client, window, units).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&trains)?);
            } else {
                println!("Window: {:.3} - {:.3} s", window.0, window.1);
                for train in &trains {
                    println!("Unit {}: {} spikes", train.unit_id, train.times.len());
                }
            }
            client.close();
        }

        Commands::Raster {
            dataset,
            start,
            end,
            units,
            width,
            height,
            output,
        } => {
            if end <= start {
                return Err(CliError::Usage(format!("end {end} must exceed start {start}")));
            }
            let client = spike_client(&fs, &dataset)?;
            let trains = query_trains(&client, (start, end), units).await?;
            client.close();

            let plots = trains
                .into_iter()
                .enumerate()
                .map(|(i, train)| RasterPlot {
                    unit_id: train.unit_id,
                    color: PALETTE[i % PALETTE.len()],
                    spike_times_sec: train.times,
                })
                .collect();
            let opts = RenderOptions::new(width, height).with_visible_range(start, end);
            let surface = render_raster(opts, RasterData { plots }).await?;
            surface.save_ppm(&output)?;
            println!("Wrote {}x{} raster to {}", width, height, output.display());
        }

        Commands::Frame {
            uri,
            index,
            time,
            quality,
            output,
        } => {
            let config = VideoConfig::default()
                .with_prefetch(false)
                .try_with_quality(quality)?;
            let client = VideoClient::new(Arc::clone(&fs), uri, config, &ClientConfig::default());
            let info = client.info().await?;
            let frame = match (index, time) {
                (Some(i), _) => i,
                (None, Some(t)) => info.frame_for_time(t),
                (None, None) => 0,
            };
            info!("video {}x{} at {} fps, {} frames", info.width, info.height, info.fps, info.frame_count);
            let jpeg = client.frame(frame).await?;
            std::fs::write(&output, &jpeg)?;
            println!(
                "Wrote frame {} ({:.3} s, {} bytes) to {}",
                frame,
                info.time_for_frame(frame),
                jpeg.len(),
                output.display()
            );
            client.close();
        }
    }

    Ok(())
}

fn transport(source: &Source) -> Result<Arc<dyn ApiTransport>> {
    if let Some(root) = &source.root {
        debug!("serving {} in-process", root.display());
        return Ok(Arc::new(LocalTransport::new(root)?));
    }
    let config = TransportConfig::default()
        .try_with_endpoint(source.endpoint.clone())?
        .with_timeout(Duration::from_secs(source.timeout_secs))
        .with_user_id(source.user_id.clone());
    debug!("using endpoint {}", config.endpoint);
    Ok(Arc::new(HttpTransport::new(config)?))
}

fn dataset_reader(
    fs: &Arc<FileSystemClient>,
    source: &DatasetSource,
) -> Result<Arc<dyn DatasetReader>> {
    if let Some(path) = &source.h5 {
        return open_h5(path);
    }
    let uri = source
        .uri
        .clone()
        .ok_or_else(|| CliError::Usage("one of --uri or --h5 is required".into()))?;
    Ok(Arc::new(ServiceDatasetReader::new(Arc::clone(fs), uri)))
}

#[cfg(feature = "hdf5")]
fn open_h5(path: &std::path::Path) -> Result<Arc<dyn DatasetReader>> {
    Ok(Arc::new(chunkscope_io::Hdf5DatasetReader::open(path)?))
}

#[cfg(not(feature = "hdf5"))]
fn open_h5(path: &std::path::Path) -> Result<Arc<dyn DatasetReader>> {
    Err(CliError::Usage(format!(
        "cannot open {}: built without the hdf5 feature",
        path.display()
    )))
}

fn spike_client(fs: &Arc<FileSystemClient>, source: &DatasetSource) -> Result<SpikeTrainsClient> {
    let mut config = ClientConfig::default();
    config.chunking = config.chunking.try_with_chunk_size(source.chunk_size)?;
    Ok(SpikeTrainsClient::new(
        dataset_reader(fs, source)?,
        source.group.clone(),
        config,
    ))
}

async fn query_trains(
    client: &SpikeTrainsClient,
    (t1, t2): (f64, f64),
    units: Vec<i64>,
) -> Result<Vec<UnitSpikeTrain>> {
    let query = if units.is_empty() {
        SpikeQuery::all()
    } else {
        SpikeQuery::units(units)
    };
    let started = Instant::now();
    let trains = client.get_data(t1, t2, &query).await?;
    debug!(
        "fetched {} trains in {:.1} ms",
        trains.len(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(trains)
}

/// Paint on a render worker and take the surface back.
async fn render_raster(opts: RenderOptions, data: RasterData) -> Result<RasterSurface> {
    let mut worker = RenderWorker::spawn(RasterPainter, RenderConfig::default())?;
    worker.transfer_canvas(RasterSurface::new(opts.canvas_width, opts.canvas_height))?;
    worker.send_opts(opts)?;
    worker.send_data(data)?;

    let deadline = Instant::now() + Duration::from_secs(30);
    while worker.stats().paints == 0 {
        if Instant::now() > deadline {
            return Err(CliError::Usage("render timed out".into()));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    worker
        .terminate()?
        .ok_or_else(|| CliError::Usage("render worker returned no surface".into()))
}

fn print_listing(node: &DirectoryNode) {
    for dir in node.dirs.iter().flatten() {
        println!("{}/", dir.name);
    }
    for file in node.files.iter().flatten() {
        println!("{:<40} {:>12}", file.name, file.size);
    }
}

fn listing_json(node: &DirectoryNode) -> serde_json::Value {
    let dirs: Vec<&str> = node.dirs.iter().flatten().map(|d| d.name.as_str()).collect();
    let files: Vec<serde_json::Value> = node
        .files
        .iter()
        .flatten()
        .map(|f| serde_json::json!({"name": f.name, "size": f.size, "mtime": f.mtime}))
        .collect();
    serde_json::json!({"name": node.name, "dirs": dirs, "files": files})
}
