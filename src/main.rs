use anyhow::{Context, Result};
use clap::Parser;
use depth_extract::capture::{load_background, load_roi, plan_chunks, FrameSource, RawDepthReader};
use depth_extract::config::{ExtractConfig, FlipClassifierConfig};
use depth_extract::extract::{create_flip_classifier, ChunkExtractor, FlipClassifier};
use depth_extract::output::{DirectorySink, ResultSink};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Raw depth recording (little-endian u16 mm)
    input: PathBuf,

    /// Frame width in pixels
    #[arg(long, default_value_t = 512)]
    width: usize,

    /// Frame height in pixels
    #[arg(long, default_value_t = 424)]
    height: usize,

    /// Directory for extracted frames and scalars
    /// Defaults to `proc/` next to the input
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Extraction config (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Background depth image (16-bit PNG/TIFF)
    #[arg(long)]
    background: Option<PathBuf>,

    /// ROI mask image; non-zero pixels are inside
    #[arg(long)]
    roi: Option<PathBuf>,

    /// Flip classifier model (.onnx or linear .json)
    /// Overrides the classifier named in the config
    #[arg(long)]
    flip_model: Option<PathBuf>,

    /// Only extract the first N frames
    #[arg(short, long)]
    num_frames: Option<usize>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --debug
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("depth-extract starting");
    tracing::info!("Input: {} ({}x{})", args.input.display(), args.width, args.height);

    let mut config = match &args.config {
        Some(path) => ExtractConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let mut config = ExtractConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Some(path) = &args.flip_model {
        config.flip_classifier = Some(
            FlipClassifierConfig::from_model_path(path).context("Unsupported flip model")?,
        );
    }
    config.validate().context("Invalid extraction config")?;

    let mut source = RawDepthReader::open(&args.input, args.width, args.height)
        .context("Failed to open depth recording")?;
    let resolution = source.resolution();

    let mut extractor = ChunkExtractor::new(config.clone()).context("Failed to build extractor")?;
    if let Some(path) = &args.background {
        let background = load_background(path, resolution).context("Failed to load background")?;
        extractor = extractor.with_background(background);
    }
    if let Some(path) = &args.roi {
        let roi = load_roi(path, resolution).context("Failed to load ROI")?;
        extractor = extractor.with_roi(roi);
    }
    if let Some(classifier_config) = &config.flip_classifier {
        let classifier =
            create_flip_classifier(classifier_config).context("Failed to load flip classifier")?;
        tracing::info!("Flip correction enabled ({})", classifier.name());
        extractor = extractor.with_flip_classifier(classifier);
    } else {
        tracing::info!("No flip classifier, skipping flip correction");
    }

    let output_dir = args.output_dir.clone().unwrap_or_else(|| {
        args.input
            .parent()
            .map(|p| p.join("proc"))
            .unwrap_or_else(|| PathBuf::from("proc"))
    });
    let mut sink =
        DirectorySink::create(&output_dir, config.max_height).context("Failed to create output directory")?;

    let nframes = args
        .num_frames
        .map_or(source.frame_count(), |n| n.min(source.frame_count()));

    run_extraction(&mut source, &mut extractor, &mut sink, nframes, &config)?;

    sink.finish().context("Failed to finalize results")?;
    tracing::info!("Results written to {}", output_dir.display());

    Ok(())
}

fn run_extraction<S, O>(
    source: &mut S,
    extractor: &mut ChunkExtractor,
    sink: &mut O,
    nframes: usize,
    config: &ExtractConfig,
) -> Result<()>
where
    S: FrameSource,
    O: ResultSink,
{
    let plans = plan_chunks(nframes, config.chunk_size, config.chunk_overlap)
        .context("Failed to plan chunks")?;
    tracing::info!("Extracting {} frames in {} chunks", nframes, plans.len());

    let mut total_read_time = Duration::ZERO;
    let mut total_extract_time = Duration::ZERO;
    let mut total_write_time = Duration::ZERO;
    let mut frames_done = 0usize;

    for (index, plan) in plans.iter().enumerate() {
        // Read chunk
        let read_start = Instant::now();
        let chunk = source
            .read_frames(plan.range.clone())
            .with_context(|| format!("Failed to read frames {:?}", plan.range))?;
        total_read_time += read_start.elapsed();

        // Extract
        let extract_start = Instant::now();
        let result = extractor
            .extract(&chunk)
            .with_context(|| format!("Failed to extract frames {:?}", plan.range))?;
        total_extract_time += extract_start.elapsed();

        // Write kept frames
        let write_start = Instant::now();
        sink.write_chunk(&result, plan.keep.clone())
            .context("Failed to write results")?;
        total_write_time += write_start.elapsed();

        frames_done += plan.keep.len();

        let read_ms = total_read_time.as_secs_f64() * 1000.0 / frames_done.max(1) as f64;
        let extract_ms = total_extract_time.as_secs_f64() * 1000.0 / frames_done.max(1) as f64;
        let write_ms = total_write_time.as_secs_f64() * 1000.0 / frames_done.max(1) as f64;
        let total_ms = read_ms + extract_ms + write_ms;

        tracing::info!(
            "Chunk {}/{}: {} frames, read={:.2}ms, extract={:.2}ms, write={:.2}ms per frame, fps={:.1}",
            index + 1,
            plans.len(),
            frames_done,
            read_ms,
            extract_ms,
            write_ms,
            if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 }
        );
    }

    Ok(())
}
