use thiserror::Error;

/// Netlist errors. Always carry the 1-based line number of the offending line.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("line {line}: expected {expected}")]
    MalformedLine { line: usize, expected: &'static str },

    #[error("line {line}: unknown circuit element '{kind}'")]
    UnknownElementKind { line: usize, kind: char },

    #[error("line {line}: unknown variable in expression: {name}")]
    UnknownVariable { line: usize, name: String },

    #[error("line {line}: invalid expression: {text}")]
    InvalidExpression { line: usize, text: String },

    #[error("line {line}: invalid value: {text}")]
    InvalidValue { line: usize, text: String },

    #[error("line {line}: inductor not found: {name}")]
    UnknownInductor { line: usize, name: String },

    #[error("line {line}: controlling element not found or has no current: {name}")]
    UnknownControl { line: usize, name: String },

    #[error("line {line}: duplicate element: {name}")]
    DuplicateElement { line: usize, name: String },

    #[error("circuit has no elements or no non-ground nodes")]
    EmptyCircuit,
}

impl ParseError {
    /// Line number of the error, if it is tied to one.
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::MalformedLine { line, .. }
            | ParseError::UnknownElementKind { line, .. }
            | ParseError::UnknownVariable { line, .. }
            | ParseError::InvalidExpression { line, .. }
            | ParseError::InvalidValue { line, .. }
            | ParseError::UnknownInductor { line, .. }
            | ParseError::UnknownControl { line, .. }
            | ParseError::DuplicateElement { line, .. } => Some(*line),
            ParseError::EmptyCircuit => None,
        }
    }
}

/// Input/output selector errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectorError {
    #[error("invalid input expression: {0}")]
    InvalidInput(String),

    #[error("invalid output expression: {0}")]
    InvalidOutput(String),

    #[error("malformed output expression: {0}")]
    MalformedSelector(String),

    #[error("output expression references unknown node: {0}")]
    UnknownNode(String),

    #[error("output expression references unknown element: {0}")]
    UnknownElement(String),

    #[error("V(node,node) selected, output is zero: {0}")]
    ZeroOutput(String),

    #[error("{probe} probes a {probed} source but the input is a {input} source")]
    TypeMismatch {
        probe: String,
        probed: char,
        input: char,
    },
}

/// Structural errors of the symbolic solve.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("unsolvable system (singular matrix, inconsistent equations)")]
    SingularSystem,

    #[error("system has not a unique solution")]
    NonUniqueSystem,

    #[error("system of size {size} is too large for exact elimination (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("incomplete substitution, symbols left: {symbols}")]
    IncompleteSubstitution { symbols: String },

    #[error(transparent)]
    Selector(#[from] SelectorError),
}

/// Frequency-response evaluation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("transfer function is zero, magnitude in dB is undefined")]
    ZeroResponse,

    #[error("incomplete substitution, symbols left: {symbols}")]
    IncompleteSubstitution { symbols: String },

    #[error("frequencies must be strictly positive, got {0}")]
    InvalidFrequency(f64),

    #[error("unsupported expression: {0}")]
    Unsupported(String),
}

/// Errors raised at the optimizer boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizeError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("no free parameters to optimize")]
    NoParameters,

    #[error("invalid bounds for {name}: initial={initial}, min={min}, max={max}")]
    InvalidBounds {
        name: String,
        initial: f64,
        min: f64,
        max: f64,
    },

    #[error("target has {target} points, residuals need {expected}")]
    TargetMismatch { target: usize, expected: usize },

    #[error("nothing to optimize: magnitude and phase residuals are both disabled")]
    NoObjective,

    #[error("residual is not finite at {0}")]
    NonFiniteResidual(String),

    #[error(transparent)]
    Evaluation(#[from] EvalError),
}

/// Top-level error for the crate.
#[derive(Debug, Error)]
pub enum OhmfitError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Solve error: {0}")]
    Solve(#[from] SolveError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Optimize error: {0}")]
    Optimize(#[from] OptimizeError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0} has not been run")]
    NotReady(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SelectorError> for OhmfitError {
    fn from(e: SelectorError) -> Self {
        OhmfitError::Solve(SolveError::Selector(e))
    }
}

pub type Result<T> = std::result::Result<T, OhmfitError>;
