//! Error types for the chiphouse ledger
//!
//! Infrastructure failures (configuration, storage) are kept apart from the
//! domain rejections a caller is expected to show to a player.

use std::fmt;

use crate::ledger::types::{Chips, UserId, WithdrawalStatus};

/// Root error type for process-level operations (bootstrap, CLI, tooling)
#[derive(Debug)]
pub enum ChipError {
    /// Configuration related errors
    Configuration(ConfigurationError),

    /// Storage system errors
    Storage(StorageError),

    /// Wager, deposit or withdrawal rejections
    Engine(EngineError),
}

/// Configuration and validation errors
#[derive(Debug)]
pub enum ConfigurationError {
    ValidationFailed(String),
    MissingRequired(String),
    InvalidValue { field: String, value: String, reason: String },
    LoadFailed(String),
}

/// Storage system errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    DatabaseOpenFailed(String),
    ReadFailed(String),
    WriteFailed(String),
    CorruptedData(String),
}

/// Rejections and failures surfaced by the engine.
///
/// Every variant that concerns money carries the balances involved so the
/// front end can report them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Bet of {amount} is outside the allowed range {min}..={max}")]
    InvalidBetAmount { amount: Chips, min: Chips, max: Chips },

    #[error("Rate limited ({reason}), retry in {retry_after_secs:.1}s")]
    RateLimited { retry_after_secs: f64, reason: RateLimitReason },

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Chips, required: Chips },

    #[error("House cannot cover payout: house balance {house_balance}, required {required}")]
    HouseInsufficientFunds { house_balance: Chips, required: Chips },

    #[error("External transaction {external_txid} already processed")]
    AlreadyProcessed { external_txid: String },

    #[error("External feed did not answer within {timeout_ms}ms")]
    ExternalFeedTimeout { timeout_ms: u64 },

    #[error("External feed error: {0}")]
    ExternalFeed(String),

    #[error("Ledger write conflict persisted after {attempts} attempts")]
    LedgerWriteConflict { attempts: u32 },

    #[error("Daily bonus already claimed, retry in {retry_after_secs:.0}s")]
    DailyBonusNotReady { retry_after_secs: f64 },

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Chips),

    #[error("Invalid withdrawal address: {0}")]
    InvalidAddress(String),

    #[error("Deposit address {address} already belongs to user {owner}")]
    AddressInUse { address: String, owner: UserId },

    #[error("User {user_id} has no withdrawal address")]
    MissingWithdrawalAddress { user_id: UserId },

    #[error("Unknown withdrawal {0}")]
    UnknownWithdrawal(u64),

    #[error("Withdrawal {id} is {status:?}, expected Pending")]
    WithdrawalNotPending { id: u64, status: WithdrawalStatus },

    #[error("Invalid game choice: {0}")]
    InvalidChoice(String),

    #[error("User id {0} is reserved for the house")]
    ReservedAccount(UserId),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Which rate-limit rule rejected a wager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    Cooldown,
    Window,
}

impl fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitReason::Cooldown => write!(f, "cooldown"),
            RateLimitReason::Window => write!(f, "rate window"),
        }
    }
}

impl EngineError {
    /// Transient failures a caller may retry as a fresh request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::LedgerWriteConflict { .. } | EngineError::ExternalFeedTimeout { .. }
        )
    }

    /// Stable snake_case name of the error kind, used in logs and receipts
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidBetAmount { .. } => "invalid_bet_amount",
            EngineError::RateLimited { .. } => "rate_limited",
            EngineError::InsufficientFunds { .. } => "insufficient_funds",
            EngineError::HouseInsufficientFunds { .. } => "house_insufficient_funds",
            EngineError::AlreadyProcessed { .. } => "already_processed",
            EngineError::ExternalFeedTimeout { .. } => "external_feed_timeout",
            EngineError::ExternalFeed(_) => "external_feed",
            EngineError::LedgerWriteConflict { .. } => "ledger_write_conflict",
            EngineError::DailyBonusNotReady { .. } => "daily_bonus_not_ready",
            EngineError::InvalidAmount(_) => "invalid_amount",
            EngineError::InvalidAddress(_) => "invalid_address",
            EngineError::AddressInUse { .. } => "address_in_use",
            EngineError::MissingWithdrawalAddress { .. } => "missing_withdrawal_address",
            EngineError::UnknownWithdrawal(_) => "unknown_withdrawal",
            EngineError::WithdrawalNotPending { .. } => "withdrawal_not_pending",
            EngineError::InvalidChoice(_) => "invalid_choice",
            EngineError::ReservedAccount(_) => "reserved_account",
            EngineError::Storage(_) => "storage",
        }
    }
}

// Display implementations
impl fmt::Display for ChipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipError::Configuration(e) => write!(f, "Configuration error: {}", e),
            ChipError::Storage(e) => write!(f, "Storage error: {}", e),
            ChipError::Engine(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::ValidationFailed(msg) => write!(f, "Validation failed: {}", msg),
            ConfigurationError::MissingRequired(field) => write!(f, "Missing required field: {}", field),
            ConfigurationError::InvalidValue { field, value, reason } => {
                write!(f, "Invalid value for {}: '{}' ({})", field, value, reason)
            }
            ConfigurationError::LoadFailed(msg) => write!(f, "Failed to load configuration: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DatabaseOpenFailed(msg) => write!(f, "Database open failed: {}", msg),
            StorageError::ReadFailed(msg) => write!(f, "Read failed: {}", msg),
            StorageError::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
            StorageError::CorruptedData(msg) => write!(f, "Corrupted data: {}", msg),
        }
    }
}

impl std::error::Error for ChipError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChipError::Configuration(e) => Some(e),
            ChipError::Storage(e) => Some(e),
            ChipError::Engine(e) => Some(e),
        }
    }
}

impl std::error::Error for ConfigurationError {}
impl std::error::Error for StorageError {}

impl From<ConfigurationError> for ChipError {
    fn from(e: ConfigurationError) -> Self {
        ChipError::Configuration(e)
    }
}

impl From<StorageError> for ChipError {
    fn from(e: StorageError) -> Self {
        ChipError::Storage(e)
    }
}

impl From<EngineError> for ChipError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Storage(inner) => ChipError::Storage(inner),
            other => ChipError::Engine(other),
        }
    }
}

// External error conversions
impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

impl From<rocksdb::Error> for ChipError {
    fn from(e: rocksdb::Error) -> Self {
        ChipError::Storage(e.into())
    }
}

impl From<std::io::Error> for ChipError {
    fn from(e: std::io::Error) -> Self {
        ChipError::Storage(StorageError::ReadFailed(e.to_string()))
    }
}

impl From<serde_json::Error> for ChipError {
    fn from(e: serde_json::Error) -> Self {
        ChipError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

impl From<toml::de::Error> for ChipError {
    fn from(e: toml::de::Error) -> Self {
        ChipError::Configuration(ConfigurationError::LoadFailed(e.to_string()))
    }
}

// Convenience type alias for Results
pub type ChipResult<T> = Result<T, ChipError>;

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
