use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use lucy_core::io::load_image;

#[derive(Args)]
pub struct InfoArgs {
    /// Input image file (TIFF or PNG)
    pub file: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let image = load_image(&args.file)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;

    let pixels = image.channels() * image.height() * image.width();

    println!("File:        {}", args.file.display());
    println!("Dimensions:  {}x{}", image.width(), image.height());
    println!("Channels:    {}", image.channels());
    println!(
        "Data size:   {:.1} MB (f32)",
        (pixels * std::mem::size_of::<f32>()) as f64 / (1024.0 * 1024.0)
    );

    Ok(())
}
