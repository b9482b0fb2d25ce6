use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use lucy_core::compute::{create_backend, DevicePreference};
use lucy_core::consts::DEFAULT_EPSILON;
use lucy_core::deconv::{deconvolve, DeconvOptions, DivisionMode};
use lucy_core::io::{load_image, save_image};
use lucy_core::psf::Psf;

#[derive(Args)]
pub struct DeconvolveArgs {
    /// Input image file (TIFF or PNG)
    pub file: PathBuf,

    /// Output file path
    #[arg(short, long, default_value = "restored.tiff")]
    pub output: PathBuf,

    /// Number of Richardson-Lucy iterations
    #[arg(long, default_value = "10")]
    pub iterations: usize,

    /// Grayscale image file to use as the PSF (normalized to sum 1)
    #[arg(long)]
    pub psf_file: Option<PathBuf>,

    /// Gaussian PSF sigma in pixels (used when no PSF file is given)
    #[arg(long, default_value = "2.0")]
    pub psf_sigma: f32,

    /// Gaussian PSF extent in pixels (odd), used when no PSF file is given
    #[arg(long, default_value = "9")]
    pub psf_size: usize,

    /// Switch to thresholded division: ratios with a predicted blur below
    /// this value are zeroed instead of epsilon-stabilized
    #[arg(long)]
    pub filter_epsilon: Option<f32>,

    /// Disable clamping of the estimate into [-1, 1]
    #[arg(long)]
    pub no_clip: bool,

    /// Channels processed per device working set
    #[arg(long, default_value = "1")]
    pub channel_batch: usize,

    /// Compute device (auto, cpu, gpu)
    #[arg(long, default_value = "auto")]
    pub device: String,

    /// TOML file with deconvolution options, replacing the option flags
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(args: &DeconvolveArgs) -> Result<()> {
    let mut image = load_image(&args.file)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;

    let psf = build_psf(args)?;
    let options = build_options(args)?;
    let preference = parse_device(&args.device)?;
    let backend = create_backend(&preference);
    tracing::debug!(
        "loaded {}x{}x{}, running on {}",
        image.channels(),
        image.height(),
        image.width(),
        backend.name()
    );

    crate::summary::print_deconvolve_summary(
        &args.file,
        &args.output,
        &image,
        &psf,
        &options,
        backend.name(),
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .expect("valid progress template"),
    );
    spinner.set_message("deconvolving");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let started = Instant::now();
    deconvolve(backend.as_ref(), &mut image, &psf, &options)
        .context("Deconvolution failed")?;
    spinner.finish_and_clear();

    println!("Restored in {:.2}s", started.elapsed().as_secs_f64());

    save_image(&image, &args.output)
        .with_context(|| format!("Failed to save {}", args.output.display()))?;
    println!("Saved to {}", args.output.display());

    Ok(())
}

fn build_psf(args: &DeconvolveArgs) -> Result<Psf> {
    if let Some(ref path) = args.psf_file {
        let kernel = load_image(path)
            .with_context(|| format!("Failed to load PSF {}", path.display()))?;
        Ok(Psf::from_image(&kernel)?)
    } else {
        Ok(Psf::gaussian(args.psf_size, args.psf_size, args.psf_sigma)?)
    }
}

fn build_options(args: &DeconvolveArgs) -> Result<DeconvOptions> {
    if let Some(ref path) = args.config {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let options: DeconvOptions = toml::from_str(&text)
            .with_context(|| format!("Invalid options in {}", path.display()))?;
        return Ok(options);
    }

    let division = match args.filter_epsilon {
        Some(threshold) => DivisionMode::Thresholded { threshold },
        None => DivisionMode::Stabilized {
            epsilon: DEFAULT_EPSILON,
        },
    };

    Ok(DeconvOptions {
        iterations: args.iterations,
        clip: !args.no_clip,
        division,
        channel_batch: args.channel_batch,
    })
}

fn parse_device(device: &str) -> Result<DevicePreference> {
    match device {
        "auto" => Ok(DevicePreference::Auto),
        "cpu" => Ok(DevicePreference::Cpu),
        "gpu" => Ok(DevicePreference::Gpu),
        other => bail!("Unknown device '{other}', expected auto, cpu, or gpu"),
    }
}
