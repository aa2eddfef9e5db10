//! Core domain entities, rules, and traits for the stock ledger.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

use sl_utils::{parse_amount, parse_whole, UtilsError, UtilsResult};

mod ledger;
mod memory;
mod report;

pub use ledger::{Ledger, Query, Snapshot};
pub use memory::MemoryStore;
pub use report::{ChartBar, StockReport};

/// Storage key holding the serialized product collection.
pub const PRODUCTS_KEY: &str = "products";
/// Storage key holding the serialized history log.
pub const HISTORY_KEY: &str = "history";
/// Number of history entries retained; older entries are dropped.
pub const HISTORY_LIMIT: usize = 100;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors returned by ledger validation, domain rules, and storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A field failed validation. Nothing was changed.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
    /// The referenced product does not exist. Nothing was changed.
    #[error("product {id} not found")]
    NotFound {
        /// The id that failed to resolve.
        id: Uuid,
    },
    /// A stock-out movement asked for more than is on hand. Nothing was changed.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        /// Quantity the movement asked for.
        requested: u64,
        /// Quantity on hand.
        available: u64,
    },
    /// The storage adapter failed. The in-memory state has already changed.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// A snapshot could not be imported. Nothing was changed.
    #[error("import format error: {0}")]
    ImportFormat(String),
    /// Ledger state could not be serialized for output. Nothing was changed.
    #[error("render error: {0}")]
    Render(String),
}

impl LedgerError {
    /// Build a validation error for a field.
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Whether the in-memory ledger advanced before this error was raised.
    pub fn mutated(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

/// How numeric form text that fails to parse is treated.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NumericPolicy {
    /// Reject unparseable numbers with a validation error.
    #[default]
    Strict,
    /// Treat unparseable numbers as zero.
    Lenient,
}

impl std::str::FromStr for NumericPolicy {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(LedgerError::validation(
                "numeric_policy",
                format!("unknown policy `{other}`, expected `strict` or `lenient`"),
            )),
        }
    }
}

/// A tracked product with its current stock level.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Unique identifier, fixed at creation.
    #[serde(default = "Uuid::new_v4", deserialize_with = "id_or_new")]
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Product code; not required to be unique.
    #[serde(default)]
    pub code: String,
    /// Optional category label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Optional supplier name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    /// Units on hand.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub stock: u64,
    /// Reorder threshold.
    #[serde(default, alias = "min", deserialize_with = "null_as_zero")]
    pub min_stock: u64,
    /// Unit purchase price.
    #[serde(default, alias = "buy")]
    pub buy_price: Decimal,
    /// Unit selling price.
    #[serde(default, alias = "sell")]
    pub sell_price: Decimal,
    /// Total units removed by stock-out movements.
    #[serde(default, alias = "sales", deserialize_with = "null_as_zero")]
    pub units_out: u64,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Time of the last edit or movement.
    #[serde(default = "Utc::now")]
    pub last_update: DateTime<Utc>,
}

impl Product {
    /// Create a new product from validated input.
    pub fn new(id: Uuid, input: ProductInput, now: DateTime<Utc>) -> LedgerResult<Self> {
        let fields = CheckedInput::check(input)?;
        Ok(Self {
            id,
            name: fields.name,
            code: fields.code,
            category: fields.category,
            supplier: fields.supplier,
            stock: fields.stock,
            min_stock: fields.min_stock,
            buy_price: fields.buy_price,
            sell_price: fields.sell_price,
            units_out: 0,
            created_at: now,
            last_update: now,
        })
    }

    /// Produce an edited copy, keeping identity, creation time and outflow.
    pub fn revise(&self, input: ProductInput, now: DateTime<Utc>) -> LedgerResult<Self> {
        let mut revised = Self::new(self.id, input, now)?;
        revised.created_at = self.created_at;
        revised.units_out = self.units_out;
        Ok(revised)
    }
}

// Legacy records store unparsed numbers as `null`.
fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Option::<u64>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn id_or_new<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uuid, D::Error> {
    Option::<Uuid>::deserialize(deserializer).map(|id| id.unwrap_or_else(Uuid::new_v4))
}

/// Typed input for creating or editing a product.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProductInput {
    /// Display name, must not be blank.
    pub name: String,
    /// Product code.
    pub code: String,
    /// Optional category.
    pub category: Option<String>,
    /// Optional supplier.
    pub supplier: Option<String>,
    /// Units on hand, must not be negative.
    pub stock: i64,
    /// Reorder threshold, must not be negative.
    pub min_stock: i64,
    /// Unit purchase price, must not be negative.
    pub buy_price: Decimal,
    /// Unit selling price, must not be negative.
    pub sell_price: Decimal,
}

/// Raw product form text as typed by a user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProductForm {
    pub name: String,
    pub code: String,
    pub category: String,
    pub supplier: String,
    pub stock: String,
    pub min_stock: String,
    pub buy_price: String,
    pub sell_price: String,
}

impl ProductForm {
    /// Parse the form into typed input.
    ///
    /// Blank numeric fields become zero. Unparseable ones become zero under
    /// [`NumericPolicy::Lenient`] and fail under [`NumericPolicy::Strict`].
    pub fn parse(&self, policy: NumericPolicy) -> LedgerResult<ProductInput> {
        Ok(ProductInput {
            name: self.name.trim().to_string(),
            code: self.code.trim().to_string(),
            category: optional_text(&self.category),
            supplier: optional_text(&self.supplier),
            stock: numeric_field("stock", parse_whole(&self.stock), policy)?,
            min_stock: numeric_field("min_stock", parse_whole(&self.min_stock), policy)?,
            buy_price: numeric_field("buy_price", parse_amount(&self.buy_price), policy)?,
            sell_price: numeric_field("sell_price", parse_amount(&self.sell_price), policy)?,
        })
    }
}

fn optional_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn numeric_field<T: Default>(
    field: &'static str,
    parsed: UtilsResult<Option<T>>,
    policy: NumericPolicy,
) -> LedgerResult<T> {
    match parsed {
        Ok(value) => Ok(value.unwrap_or_default()),
        Err(err) if policy == NumericPolicy::Lenient => {
            tracing::debug!(field, error = %err, "defaulting unparseable field to zero");
            Ok(T::default())
        }
        Err(err) => Err(LedgerError::validation(field, utils_reason(&err))),
    }
}

fn utils_reason(err: &UtilsError) -> String {
    match err {
        UtilsError::Parse(reason) | UtilsError::OutOfRange(reason) => reason.clone(),
    }
}

/// Input that passed every field rule.
struct CheckedInput {
    name: String,
    code: String,
    category: Option<String>,
    supplier: Option<String>,
    stock: u64,
    min_stock: u64,
    buy_price: Decimal,
    sell_price: Decimal,
}

impl CheckedInput {
    fn check(input: ProductInput) -> LedgerResult<Self> {
        if input.name.trim().is_empty() {
            return Err(LedgerError::validation("name", "cannot be empty"));
        }
        let stock = u64::try_from(input.stock)
            .map_err(|_| LedgerError::validation("stock", "cannot be negative"))?;
        let min_stock = u64::try_from(input.min_stock)
            .map_err(|_| LedgerError::validation("min_stock", "cannot be negative"))?;
        if input.buy_price.is_sign_negative() && !input.buy_price.is_zero() {
            return Err(LedgerError::validation("buy_price", "cannot be negative"));
        }
        if input.sell_price.is_sign_negative() && !input.sell_price.is_zero() {
            return Err(LedgerError::validation("sell_price", "cannot be negative"));
        }
        Ok(Self {
            name: input.name,
            code: input.code,
            category: input.category,
            supplier: input.supplier,
            stock,
            min_stock,
            buy_price: input.buy_price,
            sell_price: input.sell_price,
        })
    }
}

/// Direction of a stock movement.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    /// Units received.
    In,
    /// Units removed.
    Out,
}

impl fmt::Display for MoveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => f.write_str("in"),
            Self::Out => f.write_str("out"),
        }
    }
}

/// What kind of mutation a history entry records.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Created,
    Updated,
    Deleted,
    StockIn,
    StockOut,
}

/// Quantities captured by a stock movement.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Movement {
    /// Movement direction.
    pub direction: MoveDirection,
    /// Units moved, always positive.
    pub quantity: u64,
    /// Stock before the movement.
    pub before: u64,
    /// Stock after the movement.
    pub after: u64,
}

impl Movement {
    /// Signed change in stock.
    pub fn delta(&self) -> i128 {
        i128::from(self.after) - i128::from(self.before)
    }
}

/// An immutable audit record of one ledger mutation.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Unique identifier.
    pub id: Uuid,
    /// Kind of mutation.
    pub kind: HistoryKind,
    /// Human-readable description.
    pub action: String,
    /// Movement details for stock in/out entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<Movement>,
    /// When the mutation happened.
    pub timestamp: DateTime<Utc>,
}

/// Stock health of a product relative to its reorder threshold.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Ok,
    Low,
    Critical,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Low => f.write_str("low"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

/// Which products a query keeps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlertFilter {
    /// Every product.
    #[default]
    All,
    /// Only products whose status is not [`AlertStatus::Ok`].
    Alert,
}

/// Classify a product's stock health.
pub fn derive_alert_status(product: &Product) -> AlertStatus {
    if product.stock == 0 {
        AlertStatus::Critical
    } else if product.stock <= product.min_stock {
        AlertStatus::Low
    } else {
        AlertStatus::Ok
    }
}

/// Stock level as a percentage of twice the reorder threshold, clamped to 0..=100.
#[allow(clippy::cast_precision_loss)]
pub fn derive_stock_percentage(product: &Product) -> f64 {
    if product.min_stock == 0 {
        return if product.stock > 0 { 100.0 } else { 0.0 };
    }
    let ratio = product.stock as f64 / (product.min_stock as f64 * 2.0) * 100.0;
    ratio.clamp(0.0, 100.0)
}

/// Parse a movement quantity typed by a user.
pub fn parse_quantity(raw: &str) -> LedgerResult<u64> {
    match parse_whole(raw) {
        Ok(Some(value)) if value > 0 => u64::try_from(value)
            .map_err(|_| LedgerError::validation("quantity", "must be a positive whole number")),
        Ok(Some(_)) => Err(LedgerError::validation("quantity", "must be greater than zero")),
        Ok(None) => Err(LedgerError::validation("quantity", "is required")),
        Err(err) => Err(LedgerError::validation("quantity", utils_reason(&err))),
    }
}

/// Key-value persistence for serialized ledger collections.
pub trait StorageAdapter {
    /// Fetch the stored value for a key, or `None` if it was never saved.
    fn load(&self, key: &str) -> LedgerResult<Option<String>>;
    /// Overwrite the stored value for a key.
    fn save(&self, key: &str, value: &str) -> LedgerResult<()>;
}

impl<S: StorageAdapter + ?Sized> StorageAdapter for &S {
    fn load(&self, key: &str) -> LedgerResult<Option<String>> {
        (**self).load(key)
    }

    fn save(&self, key: &str, value: &str) -> LedgerResult<()> {
        (**self).save(key, value)
    }
}
