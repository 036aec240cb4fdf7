#[derive(Debug, Clone, PartialEq)]
pub enum ScoringError {
    /// Caller supplied an invalid parameter (fold count, π0, iterations ...).
    Config { msg: String },
    /// The input table (or a column handed to it) is malformed.
    Schema { msg: String },
    /// A fold did not have enough confidently labelled rows to train on.
    /// The learner records these instead of failing.
    InsufficientData {
        fold: u8,
        iteration: usize,
        rows: usize,
        required: usize,
    },
    /// There are no decoys, so no error rate can be estimated.
    InsufficientDecoys,
    /// A score became NaN or infinite.
    NumericInstability { context: String },
    /// The concrete classifier failed to train.
    Classifier { msg: String },
}

impl ScoringError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config { msg: msg.into() }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema { msg: msg.into() }
    }

    pub fn numeric(context: impl Into<String>) -> Self {
        Self::NumericInstability {
            context: context.into(),
        }
    }

    /// Whether the error can be tolerated by keeping the previous state.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ScoringError::InsufficientData { .. })
    }
}

impl std::fmt::Display for ScoringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringError::Config { msg } => write!(f, "Invalid configuration: {}", msg),
            ScoringError::Schema { msg } => write!(f, "Malformed peak group table: {}", msg),
            ScoringError::InsufficientData {
                fold,
                iteration,
                rows,
                required,
            } => write!(
                f,
                "Fold {} in iteration {} has {} confident training rows, at least {} required",
                fold, iteration, rows, required
            ),
            ScoringError::InsufficientDecoys => {
                write!(f, "No decoys present, error rates cannot be estimated")
            }
            ScoringError::NumericInstability { context } => {
                write!(f, "Non-finite score encountered: {}", context)
            }
            ScoringError::Classifier { msg } => write!(f, "Classifier training failed: {}", msg),
        }
    }
}

impl std::error::Error for ScoringError {}

pub type Result<T> = std::result::Result<T, ScoringError>;

/// Fails with [`ScoringError::NumericInstability`] at the first non-finite value.
pub(crate) fn check_finite(values: &[f64], context: &str) -> Result<()> {
    match values.iter().position(|x| !x.is_finite()) {
        Some(i) => Err(ScoringError::numeric(format!(
            "{} (row {} = {})",
            context, i, values[i]
        ))),
        None => Ok(()),
    }
}
