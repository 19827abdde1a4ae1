use thiserror::Error;

/// Main error type for the portfel system.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("calendar error: {0}")]
    Calendar(#[from] CalendarError),

    #[error("tax error: {0}")]
    Tax(#[from] TaxError),

    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error("insufficient cash: {0}")]
    InsufficientCash(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Attribute-store, ingestion, and catalog errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("instrument not found: {id}")]
    InstrumentNotFound { id: String },

    #[error("duplicate value for {instrument}/{attribute} from {source_system} at {timestamp}")]
    DuplicateValue {
        instrument: String,
        attribute: String,
        source_system: String,
        timestamp: String,
    },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("required option '{0}' not provided")]
    MissingOption(String),

    #[error("invalid value '{value}' for option '{option}'")]
    InvalidOption { option: String, value: String },

    #[error("row {row}: column {column} out of range")]
    ColumnOutOfRange { row: usize, column: usize },

    #[error("portfolio not found: {name}")]
    PortfolioNotFound { name: String },

    #[error("portfolio already exists: {name}")]
    PortfolioExists { name: String },

    #[error("invalid portfolio: {0}")]
    InvalidPortfolio(String),
}

/// Trading-calendar construction and date-adjustment errors.
#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("no candidate instrument has trading days in the requested window")]
    Unavailable,

    #[error("no trading days after requested date (period ended)")]
    NoFutureTradingDay,

    #[error("no future data available for {id}")]
    NoFutureData { id: String },

    #[error("no data available for {id} in the calendar window")]
    NoDataAtAll { id: String },
}

/// Tax-calculator errors.
#[derive(Error, Debug)]
pub enum TaxError {
    #[error("sale quantity must be positive, got {0}")]
    InvalidQuantity(f64),

    #[error("insufficient quantity in lots: requested {requested}, available {available}")]
    InsufficientLots { requested: f64, available: f64 },
}

/// Strategy property-bag errors.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("property not found: {key}")]
    PropertyNotFound { key: String },

    #[error("type mismatch for property '{key}': expected {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}

/// Result type alias for portfel operations.
pub type Result<T> = std::result::Result<T, Error>;
