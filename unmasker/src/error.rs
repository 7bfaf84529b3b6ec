use backtrace::Backtrace;
use hf_hub::api::sync::ApiError;
use std::fmt;

#[derive(Debug)]
pub struct WrappedError {
    pub error: Box<dyn std::error::Error + Send + Sync>,
    pub backtrace: Backtrace,
}

impl fmt::Display for WrappedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for WrappedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

// `unmasker` main error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // -----------------------------------
    // From pretrained errors
    // -----------------------------------
    #[error("Repository '{0}' not found.")]
    RepositoryNotFound(String),
    #[error("File '{0}' not found in the repository.")]
    RepositoryFileNotFound(String),
    #[error("Model '{0}' is not implemented. Only masked language models with `model_type` 'bert' or 'roberta' are supported.")]
    ModelNotImplemented(String),
    #[error("Tokenizer '{0}' is not implemented. Only 'BertTokenizer' and 'RobertaTokenizer' are supported.")]
    TokenizerNotImplemented(String),

    // -----------------------------------
    // Load model errors
    // -----------------------------------
    #[error("Model configuration not found. Check the repository contains a `config.json` file.")]
    ModelMissingConfig,

    #[error("Model weights not found in the repo.")]
    ModelWeightsNotFound,

    // -----------------------------------
    // Load tokenizer errors
    // -----------------------------------
    #[error("Tokenizer configuration is missing. Check the repository contains a `tokenizer_config.json` file.")]
    TokenizerMissingConfig,

    #[error("Tokenizer build error: {0}")]
    TokenizerBuildError(String),

    // -----------------------------------
    // Special tokens errors
    // -----------------------------------
    #[error("Missing the special token `{0}`.")]
    MissingSpecialToken(String),

    #[error("Missing the id of the special token `{0}`.")]
    MissingSpecialTokenId(String),

    // -----------------------------------
    // Tokenizer encoding errors
    // -----------------------------------
    #[error("Tokenizer encoding error: {0}.")]
    TokenizerEncodingError(String),

    // -----------------------------------
    // `forward` method errors
    // -----------------------------------
    #[error("Forward param {0} cannot be `None`.")]
    MissingForwardParam(String),

    // -----------------------------------
    // Pipeline errors
    // -----------------------------------
    /// The arguments of a pipeline call are malformed. Raised before running the model.
    #[error("Invalid pipeline input: {0}")]
    InvalidPipelineInput(String),

    /// The pipeline could not process otherwise well-formed arguments.
    #[error("Pipeline execution error: {0}")]
    PipelineExecution(String),

    #[error("{0}")]
    Msg(String),

    // Wrapped errors from other crates
    #[error(transparent)]
    Wrapped(#[from] WrappedError),
}

impl Error {
    pub fn wrap(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Wrapped(WrappedError {
            error: Box::new(e),
            backtrace: Backtrace::new(),
        })
    }

    pub fn msg<T: std::fmt::Display>(msg: T) -> Self {
        Error::Msg(msg.to_string())
    }

    pub fn invalid_input<T: std::fmt::Display>(msg: T) -> Self {
        Error::InvalidPipelineInput(msg.to_string())
    }

    pub fn execution<T: std::fmt::Display>(msg: T) -> Self {
        Error::PipelineExecution(msg.to_string())
    }

    /// Whether the error was caused by malformed pipeline arguments.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidPipelineInput(_))
    }

    /// Whether the error was raised while executing a pipeline.
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Error::PipelineExecution(_))
    }
}

impl From<candle_core::Error> for Error {
    fn from(e: candle_core::Error) -> Self {
        Error::wrap(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::wrap(e)
    }
}

impl From<ApiError> for Error {
    fn from(e: ApiError) -> Self {
        Error::wrap(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::wrap(e)
    }
}

#[macro_export]
macro_rules! bail {
    ($msg:expr) => {
        return Err($crate::error::Error::msg($msg))
    };
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn test_error_kinds() {
        assert!(Error::invalid_input("empty targets").is_invalid_input());
        assert!(!Error::invalid_input("empty targets").is_execution_error());
        assert!(Error::execution("no mask token").is_execution_error());
        assert!(!Error::msg("other").is_invalid_input());
    }

    #[test]
    fn test_wrapped_error_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let error = Error::from(io_error);
        assert_eq!(error.to_string(), "missing file");
    }
}
