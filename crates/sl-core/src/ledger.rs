//! The stock ledger: products, movements and their audit trail.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    derive_alert_status, AlertFilter, AlertStatus, HistoryEntry, HistoryKind, LedgerError,
    LedgerResult, MoveDirection, Movement, Product, ProductInput, StockReport, StorageAdapter,
    HISTORY_KEY, HISTORY_LIMIT, PRODUCTS_KEY,
};

/// Full export bundle of products and history.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub products: Vec<Product>,
    pub history: Vec<HistoryEntry>,
    pub export_date: DateTime<Utc>,
}

impl Snapshot {
    /// Render the snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> LedgerResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| LedgerError::Render(err.to_string()))
    }
}

/// Owns the product collection and history log, persisting both after every mutation.
#[derive(Debug)]
pub struct Ledger<S> {
    storage: S,
    products: Vec<Product>,
    history: Vec<HistoryEntry>,
}

impl<S: StorageAdapter> Ledger<S> {
    /// Load the ledger from storage. Missing or unreadable collections start empty.
    ///
    /// Stored products without an id are given one, and the collection is saved
    /// once so the assigned ids survive the next open.
    pub fn open(storage: S) -> LedgerResult<Self> {
        let (products, assigned) = load_products(&storage)?;
        let mut history: Vec<HistoryEntry> = load_collection(&storage, HISTORY_KEY)?;
        trim_history(&mut history);
        debug!(
            products = products.len(),
            history = history.len(),
            "ledger loaded"
        );
        let ledger = Self {
            storage,
            products,
            history,
        };
        if assigned > 0 {
            info!(assigned, "assigned ids to stored products");
            if ledger.persist().is_err() {
                warn!("assigned ids could not be saved and will change on the next open");
            }
        }
        Ok(ledger)
    }

    /// Products in insertion order.
    pub fn list_products(&self) -> &[Product] {
        &self.products
    }

    /// History entries, newest first.
    pub fn list_history(&self) -> std::iter::Rev<std::slice::Iter<'_, HistoryEntry>> {
        self.history.iter().rev()
    }

    /// Fetch a product by id.
    pub fn get_product(&self, id: Uuid) -> Option<&Product> {
        self.products.iter().find(|product| product.id == id)
    }

    /// Resolve a full id or a unique id prefix.
    pub fn find_by_prefix(&self, text: &str) -> LedgerResult<&Product> {
        let text = text.trim().to_ascii_lowercase();
        if let Ok(id) = Uuid::parse_str(&text) {
            return self.get_product(id).ok_or(LedgerError::NotFound { id });
        }
        if text.is_empty() {
            return Err(LedgerError::validation("id", "cannot be empty"));
        }
        let mut matches = self
            .products
            .iter()
            .filter(|product| product.id.to_string().starts_with(&text));
        match (matches.next(), matches.next()) {
            (Some(product), None) => Ok(product),
            (None, _) => Err(LedgerError::validation(
                "id",
                format!("no product id starts with `{text}`"),
            )),
            (Some(_), Some(_)) => Err(LedgerError::validation(
                "id",
                format!("`{text}` matches more than one product"),
            )),
        }
    }

    /// Add a new product.
    pub fn create(&mut self, input: ProductInput) -> LedgerResult<Product> {
        let now = Utc::now();
        let product = Product::new(Uuid::new_v4(), input, now)?;
        self.products.push(product.clone());
        self.record(
            HistoryKind::Created,
            format!("created \"{}\" with stock {}", product.name, product.stock),
            None,
            now,
        );
        info!(id = %product.id, name = %product.name, stock = product.stock, "product created");
        self.persist()?;
        Ok(product)
    }

    /// Replace a product's editable fields.
    pub fn update(&mut self, id: Uuid, input: ProductInput) -> LedgerResult<Product> {
        let now = Utc::now();
        let updated = {
            let product = self.product_mut(id)?;
            let revised = product.revise(input, now)?;
            *product = revised.clone();
            revised
        };
        self.record(
            HistoryKind::Updated,
            format!("updated \"{}\"", updated.name),
            None,
            now,
        );
        info!(id = %id, name = %updated.name, "product updated");
        self.persist()?;
        Ok(updated)
    }

    /// Remove a product, returning the removed record.
    pub fn delete(&mut self, id: Uuid) -> LedgerResult<Product> {
        let position = self
            .products
            .iter()
            .position(|product| product.id == id)
            .ok_or(LedgerError::NotFound { id })?;
        let removed = self.products.remove(position);
        self.record(
            HistoryKind::Deleted,
            format!("deleted \"{}\"", removed.name),
            None,
            Utc::now(),
        );
        info!(id = %id, name = %removed.name, "product deleted");
        self.persist()?;
        Ok(removed)
    }

    /// Receive or remove stock.
    pub fn move_stock(
        &mut self,
        id: Uuid,
        direction: MoveDirection,
        quantity: i64,
    ) -> LedgerResult<Product> {
        let quantity = u64::try_from(quantity)
            .ok()
            .filter(|quantity| *quantity > 0)
            .ok_or_else(|| LedgerError::validation("quantity", "must be greater than zero"))?;
        let now = Utc::now();
        let (moved, movement) = {
            let product = self.product_mut(id)?;
            let before = product.stock;
            let after = match direction {
                MoveDirection::In => before.checked_add(quantity).ok_or_else(|| {
                    LedgerError::validation("quantity", "would overflow the stock counter")
                })?,
                MoveDirection::Out => {
                    before
                        .checked_sub(quantity)
                        .ok_or(LedgerError::InsufficientStock {
                            requested: quantity,
                            available: before,
                        })?
                }
            };
            product.stock = after;
            if direction == MoveDirection::Out {
                product.units_out = product.units_out.saturating_add(quantity);
            }
            product.last_update = now;
            let movement = Movement {
                direction,
                quantity,
                before,
                after,
            };
            (product.clone(), movement)
        };
        let kind = match direction {
            MoveDirection::In => HistoryKind::StockIn,
            MoveDirection::Out => HistoryKind::StockOut,
        };
        self.record(
            kind,
            format!(
                "stock {direction} {quantity} ({}→{}) for \"{}\"",
                movement.before, movement.after, moved.name
            ),
            Some(movement),
            now,
        );
        info!(
            id = %id,
            %direction,
            quantity,
            before = movement.before,
            after = movement.after,
            "stock moved"
        );
        self.persist()?;
        Ok(moved)
    }

    /// Products whose name or code contains `filter_text` (case-insensitive),
    /// restricted to alerting products when asked.
    pub fn query(&self, filter_text: &str, alert_filter: AlertFilter) -> Query<'_> {
        Query {
            products: self.products.iter(),
            needle: filter_text.to_lowercase(),
            alert_filter,
        }
    }

    /// Totals and chart series for the current collection.
    pub fn report(&self) -> StockReport {
        StockReport::from_products(&self.products)
    }

    /// Capture the whole ledger for backup or transfer.
    pub fn export(&self) -> Snapshot {
        Snapshot {
            products: self.products.clone(),
            history: self.history.clone(),
            export_date: Utc::now(),
        }
    }

    /// Replace the ledger wholesale with a snapshot document.
    ///
    /// Returns the number of imported products. Malformed documents leave the
    /// ledger untouched.
    pub fn import(&mut self, json: &str) -> LedgerResult<usize> {
        let (products, mut history) = parse_snapshot(json)?;
        trim_history(&mut history);
        self.products = products;
        self.history = history;
        info!(
            products = self.products.len(),
            history = self.history.len(),
            "snapshot imported"
        );
        self.persist()?;
        Ok(self.products.len())
    }

    fn product_mut(&mut self, id: Uuid) -> LedgerResult<&mut Product> {
        self.products
            .iter_mut()
            .find(|product| product.id == id)
            .ok_or(LedgerError::NotFound { id })
    }

    fn record(
        &mut self,
        kind: HistoryKind,
        action: String,
        movement: Option<Movement>,
        timestamp: DateTime<Utc>,
    ) {
        self.history.push(HistoryEntry {
            id: Uuid::new_v4(),
            kind,
            action,
            movement,
            timestamp,
        });
        trim_history(&mut self.history);
    }

    fn persist(&self) -> LedgerResult<()> {
        let products = serde_json::to_string(&self.products)
            .map_err(|err| LedgerError::Persistence(err.to_string()))?;
        let history = serde_json::to_string(&self.history)
            .map_err(|err| LedgerError::Persistence(err.to_string()))?;
        self.storage
            .save(PRODUCTS_KEY, &products)
            .and_then(|()| self.storage.save(HISTORY_KEY, &history))
            .map_err(|err| {
                warn!(error = %err, "failed to persist ledger; in-memory state is ahead of storage");
                if matches!(err, LedgerError::Persistence(_)) {
                    err
                } else {
                    LedgerError::Persistence(err.to_string())
                }
            })
    }
}

/// Lazy, restartable product query. Clone it to iterate again.
#[derive(Clone, Debug)]
pub struct Query<'a> {
    products: std::slice::Iter<'a, Product>,
    needle: String,
    alert_filter: AlertFilter,
}

impl<'a> Iterator for Query<'a> {
    type Item = &'a Product;

    fn next(&mut self) -> Option<Self::Item> {
        let needle = self.needle.as_str();
        let alert_filter = self.alert_filter;
        self.products
            .by_ref()
            .find(|product| query_matches(product, needle, alert_filter))
    }
}

fn query_matches(product: &Product, needle: &str, alert_filter: AlertFilter) -> bool {
    let text_match = needle.is_empty()
        || product.name.to_lowercase().contains(needle)
        || product.code.to_lowercase().contains(needle);
    let alert_match = match alert_filter {
        AlertFilter::All => true,
        AlertFilter::Alert => derive_alert_status(product) != AlertStatus::Ok,
    };
    text_match && alert_match
}

fn load_collection<T: DeserializeOwned>(
    storage: &impl StorageAdapter,
    key: &str,
) -> LedgerResult<Vec<T>> {
    let Some(raw) = storage.load(key)? else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(&raw) {
        Ok(items) => Ok(items),
        Err(err) => {
            warn!(key, error = %err, "stored collection is unreadable; starting empty");
            Ok(Vec::new())
        }
    }
}

/// Load the product collection, counting records that were stored without an id.
fn load_products(storage: &impl StorageAdapter) -> LedgerResult<(Vec<Product>, usize)> {
    let Some(raw) = storage.load(PRODUCTS_KEY)? else {
        return Ok((Vec::new(), 0));
    };
    let parsed = serde_json::from_str::<Value>(&raw).and_then(|value| {
        let missing = value.as_array().map_or(0, |items| {
            items
                .iter()
                .filter(|item| item.get("id").filter(|id| !id.is_null()).is_none())
                .count()
        });
        serde_json::from_value::<Vec<Product>>(value).map(|products| (products, missing))
    });
    match parsed {
        Ok(loaded) => Ok(loaded),
        Err(err) => {
            warn!(key = PRODUCTS_KEY, error = %err, "stored collection is unreadable; starting empty");
            Ok((Vec::new(), 0))
        }
    }
}

fn trim_history(history: &mut Vec<HistoryEntry>) {
    if history.len() > HISTORY_LIMIT {
        let excess = history.len() - HISTORY_LIMIT;
        history.drain(..excess);
    }
}

fn parse_snapshot(json: &str) -> LedgerResult<(Vec<Product>, Vec<HistoryEntry>)> {
    let document: Value = serde_json::from_str(json)
        .map_err(|err| LedgerError::ImportFormat(format!("not valid JSON: {err}")))?;
    let Value::Object(mut fields) = document else {
        return Err(LedgerError::ImportFormat(
            "snapshot must be a JSON object".into(),
        ));
    };
    let products = match fields.remove("products") {
        Some(value @ Value::Array(_)) => serde_json::from_value::<Vec<Product>>(value)
            .map_err(|err| LedgerError::ImportFormat(format!("invalid product: {err}")))?,
        Some(_) => {
            return Err(LedgerError::ImportFormat(
                "`products` must be a list".into(),
            ))
        }
        None => return Err(LedgerError::ImportFormat("missing `products`".into())),
    };
    let history = match fields.remove("history") {
        None | Some(Value::Null) => Vec::new(),
        Some(value @ Value::Array(_)) => serde_json::from_value::<Vec<HistoryEntry>>(value)
            .map_err(|err| LedgerError::ImportFormat(format!("invalid history entry: {err}")))?,
        Some(_) => {
            return Err(LedgerError::ImportFormat(
                "`history` must be a list".into(),
            ))
        }
    };

    let mut seen = HashSet::new();
    for product in &products {
        if product.name.trim().is_empty() {
            return Err(LedgerError::ImportFormat(format!(
                "product {} has an empty name",
                product.id
            )));
        }
        if !seen.insert(product.id) {
            return Err(LedgerError::ImportFormat(format!(
                "duplicate product id {}",
                product.id
            )));
        }
    }
    Ok((products, history))
}
