use std::path::Path;

use console::Style;
use lucy_core::deconv::{DeconvOptions, DivisionMode};
use lucy_core::image::Image;
use lucy_core::psf::Psf;

struct Styles {
    title: Style,
    label: Style,
    value: Style,
    method: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_deconvolve_summary(
    input: &Path,
    output: &Path,
    image: &Image,
    psf: &Psf,
    options: &DeconvOptions,
    device_name: &str,
) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Lucy Deconvolution"));
    println!(
        "  {}",
        s.title
            .apply_to("\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}\u{2550}")
    );
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Input"),
        s.path.apply_to(input.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(output.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Device"),
        s.method.apply_to(device_name)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Image"),
        s.value.apply_to(format!(
            "{}x{} ({} channels)",
            image.width(),
            image.height(),
            image.channels()
        ))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("PSF"),
        s.value
            .apply_to(format!("{}x{}", psf.width(), psf.height()))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Iterations"),
        s.value.apply_to(options.iterations)
    );

    let division = match options.division {
        DivisionMode::Stabilized { epsilon } => format!("stabilized (epsilon = {epsilon:e})"),
        DivisionMode::Thresholded { threshold } => format!("thresholded (< {threshold} -> 0)"),
    };
    println!(
        "  {:<14}{}",
        s.label.apply_to("Division"),
        s.method.apply_to(division)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Clip"),
        s.value
            .apply_to(if options.clip { "[-1, 1]" } else { "off" })
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Batch"),
        s.value
            .apply_to(format!("{} channel(s) per launch", options.channel_batch))
    );
    println!();
}
