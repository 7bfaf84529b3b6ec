#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

use anyhow::Result;
use clap::Parser;
use unmasker_examples::{get_device, DeviceOption};
use unmasker_pipelines::{FillMaskOptions, FillMaskPipeline};

#[derive(Debug, Parser)]
struct Args {
    /// The device to run the pipeline on: `cpu`, `metal` or `cuda:<id>`.
    #[arg(long, default_value = "cpu")]
    device: DeviceOption,

    /// The Hugging Face repository id or local directory of the model.
    #[arg(long, default_value = "distilbert/distilroberta-base")]
    model: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let device = get_device(&args.device)?;
    println!("Device: {:?}", device);

    let pipeline = FillMaskPipeline::new(args.model.as_str(), &device, None, None)?;
    let mask = pipeline
        .get_tokenizer()
        .get_mask_token()
        .unwrap_or_default()
        .to_string();

    let results = pipeline.run(format!("Paris is the {mask} of France."), None)?;
    println!("`pipeline.run` results: {:?}", results);

    let options = FillMaskOptions::default()
        .with_top_k(3)
        .with_targets(vec![" Patrick", " Clara", " Teven"]);
    let results = pipeline.run(format!("My name is {mask}."), Some(options))?;
    println!("`pipeline.run` results with targets: {:?}", results);

    let results = pipeline.run_batch(
        vec![
            format!("Paris is the {mask} of France."),
            format!("The {mask} of Spain is {mask}."),
        ],
        Some(FillMaskOptions::default().with_top_k(2)),
    )?;
    println!(
        "`pipeline.run_batch` results: {}",
        serde_json::to_string_pretty(&results)?
    );

    Ok(())
}
