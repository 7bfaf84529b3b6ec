use anyhow::{anyhow, Result};
use candle_core::{DType, Device};
use clap::Parser;
use std::str::FromStr;
use unmasker_pipelines::FillMaskOptions;

#[derive(Debug, Parser)]
#[command(version, about = "Serves a fill-mask pipeline over HTTP", long_about = None)]
pub(crate) struct Cli {
    /// The host to listen on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    host: String,

    /// The Hugging Face repository id or local directory of the model to be loaded.
    #[arg(short, long)]
    model: String,

    /// The device to run the pipeline on: `cpu`, `metal` or `cuda:<id>`.
    #[arg(short, long, value_parser = parse_device, default_value = "cpu")]
    device: DeviceOption,

    /// The dtype to load the model weights with.
    #[arg(long)]
    dtype: Option<DTypeOption>,

    /// The number of workers to use for inference.
    #[arg(long, default_value = "1")]
    num_workers: usize,

    /// The default number of predictions returned per mask token.
    #[arg(long)]
    top_k: Option<usize>,

    /// A default target token. Can be repeated to restrict predictions to several tokens.
    #[arg(long = "targets")]
    targets: Vec<String>,
}

impl Cli {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Get the [`candle_core::Device`] corresponding to the selected device option.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested device is not available.
    pub fn device(&self) -> Result<Device> {
        match self.device {
            DeviceOption::Cuda(device_id) if cfg!(feature = "cuda") => {
                Ok(Device::new_cuda(device_id)?)
            }
            DeviceOption::Metal if cfg!(feature = "metal") => Ok(Device::new_metal(0)?),
            DeviceOption::Cpu => Ok(Device::Cpu),
            _ => Err(anyhow!("Requested device is not available")),
        }
    }

    /// Get the [`candle_core::DType`] corresponding to the selected dtype option.
    pub fn dtype(&self) -> Option<DType> {
        self.dtype.as_ref().map(|dtype| match dtype {
            DTypeOption::Float16 => DType::F16,
            DTypeOption::BFloat16 => DType::BF16,
            DTypeOption::Float32 => DType::F32,
        })
    }

    /// The options the pipeline is created with. Requests can override them.
    pub fn fill_mask_options(&self) -> FillMaskOptions {
        FillMaskOptions {
            top_k: self.top_k,
            targets: (!self.targets.is_empty()).then(|| self.targets.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DeviceOption {
    Cpu,
    Metal,
    Cuda(usize),
}

#[derive(Debug, Clone, PartialEq, clap::ValueEnum)]
#[clap(rename_all = "lowercase")]
pub(crate) enum DTypeOption {
    Float16,
    BFloat16,
    Float32,
}

impl FromStr for DeviceOption {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(DeviceOption::Cpu),
            "metal" => Ok(DeviceOption::Metal),
            s => match s.strip_prefix("cuda:") {
                Some(id) => Ok(DeviceOption::Cuda(id.parse::<usize>()?)),
                None => Err(anyhow!("Invalid device option: {}", s)),
            },
        }
    }
}

fn parse_device(s: &str) -> Result<DeviceOption, anyhow::Error> {
    DeviceOption::from_str(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["unmasker-serve", "--model", "bert-base-uncased"]).unwrap();
        assert_eq!(cli.host(), "0.0.0.0:8080");
        assert_eq!(cli.model(), "bert-base-uncased");
        assert_eq!(cli.device, DeviceOption::Cpu);
        assert_eq!(cli.dtype(), None);
        assert_eq!(cli.num_workers(), 1);
        assert_eq!(cli.fill_mask_options(), FillMaskOptions::default());
    }

    #[test]
    fn test_options() {
        let cli = Cli::try_parse_from([
            "unmasker-serve",
            "-m",
            "distilroberta-base",
            "--device",
            "cuda:1",
            "--dtype",
            "bfloat16",
            "--num-workers",
            "4",
            "--top-k",
            "3",
            "--targets",
            "paris",
            "--targets",
            "lyon",
        ])
        .unwrap();
        assert_eq!(cli.device, DeviceOption::Cuda(1));
        assert_eq!(cli.dtype(), Some(DType::BF16));
        assert_eq!(cli.num_workers(), 4);

        let options = cli.fill_mask_options();
        assert_eq!(options.top_k, Some(3));
        assert_eq!(
            options.targets,
            Some(vec!["paris".to_string(), "lyon".to_string()])
        );
    }

    #[test]
    fn test_invalid_device() {
        assert!(DeviceOption::from_str("tpu").is_err());
        assert!(DeviceOption::from_str("cuda:x").is_err());
        assert!(Cli::try_parse_from(["unmasker-serve", "-m", "bert", "-d", "gpu"]).is_err());
    }
}
