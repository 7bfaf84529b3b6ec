pub mod fill_mask;

pub use fill_mask::{
    FillMaskInputs, FillMaskOptions, FillMaskOutput, FillMaskPipeline, MaskPredictions,
    Prediction, DEFAULT_TOP_K,
};
