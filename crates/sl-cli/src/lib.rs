use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use sl_core::{
    derive_alert_status, derive_stock_percentage, parse_quantity, AlertFilter, HistoryEntry,
    Ledger, LedgerError, LedgerResult, MoveDirection, NumericPolicy, Product, ProductForm,
    StockReport,
};
use sl_fs::{resolve_settings, set_config_path, FsStore};

const BAR_WIDTH: u64 = 20;

#[derive(Parser)]
#[command(name = "sl", version, about = "Stock ledger CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the store.
    Init {
        /// Optional directory to initialize the store in.
        #[arg(long)]
        path: Option<String>,
    },
    /// Add a product.
    Add(ProductArgs),
    /// Edit a product; omitted fields keep their current value.
    Edit {
        /// Product id or unique id prefix.
        id: String,
        #[command(flatten)]
        fields: ProductArgs,
    },
    /// Delete a product.
    Delete {
        /// Product id or unique id prefix.
        id: String,
    },
    /// Receive or remove stock.
    Move {
        /// Product id or unique id prefix.
        id: String,
        /// Movement direction.
        #[arg(value_enum)]
        direction: DirectionArg,
        /// Units to move.
        #[arg(allow_hyphen_values = true)]
        quantity: String,
    },
    /// List products.
    List {
        /// Case-insensitive text matched against name and code.
        #[arg(long)]
        search: Option<String>,
        /// Only show products that are low or out of stock.
        #[arg(long)]
        alerts: bool,
    },
    /// Show a single product.
    Show {
        /// Product id or unique id prefix.
        id: String,
    },
    /// Show recent history, newest first.
    History {
        /// Maximum number of entries to print.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print inventory totals and stock charts.
    Report,
    /// Export products and history to a JSON file.
    Export { path: String },
    /// Replace products and history from a JSON export.
    Import { path: String },
}

#[derive(Args, Default)]
struct ProductArgs {
    /// Display name.
    #[arg(long)]
    name: Option<String>,
    /// Product code.
    #[arg(long)]
    code: Option<String>,
    /// Category label.
    #[arg(long)]
    category: Option<String>,
    /// Supplier name.
    #[arg(long)]
    supplier: Option<String>,
    /// Units on hand.
    #[arg(long, allow_hyphen_values = true)]
    stock: Option<String>,
    /// Reorder threshold.
    #[arg(long, allow_hyphen_values = true)]
    min_stock: Option<String>,
    /// Unit purchase price.
    #[arg(long, allow_hyphen_values = true)]
    buy_price: Option<String>,
    /// Unit selling price.
    #[arg(long, allow_hyphen_values = true)]
    sell_price: Option<String>,
}

impl ProductArgs {
    fn apply_to(self, form: &mut ProductForm) {
        let fields = [
            (self.name, &mut form.name),
            (self.code, &mut form.code),
            (self.category, &mut form.category),
            (self.supplier, &mut form.supplier),
            (self.stock, &mut form.stock),
            (self.min_stock, &mut form.min_stock),
            (self.buy_price, &mut form.buy_price),
            (self.sell_price, &mut form.sell_price),
        ];
        for (value, slot) in fields {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    In,
    Out,
}

impl From<DirectionArg> for MoveDirection {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::In => MoveDirection::In,
            DirectionArg::Out => MoveDirection::Out,
        }
    }
}

pub fn run() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Command::Init { path } = &cli.command {
        let path = match path {
            Some(path) => PathBuf::from(path),
            None => FsStore::default_path()?,
        };
        let store = FsStore::new(path.clone());
        store.init().context("failed to initialize store")?;
        set_config_path(&path)?;
        println!("Store initialized at {}", path.display());
        return Ok(());
    }

    let settings = resolve_settings().context("failed to resolve settings")?;
    tracing::debug!(path = %settings.store_path.display(), policy = ?settings.numeric_policy, "opening store");
    let store = FsStore::new(settings.store_path);
    if !store.exists() {
        bail!("the stock ledger is not initialized. Run `sl init` to get started.");
    }
    let mut ledger = Ledger::open(store).context("failed to open ledger")?;
    let policy = settings.numeric_policy;

    match cli.command {
        Command::Add(fields) => add_product(&mut ledger, fields, policy),
        Command::Edit { id, fields } => edit_product(&mut ledger, &id, fields, policy),
        Command::Delete { id } => delete_product(&mut ledger, &id),
        Command::Move {
            id,
            direction,
            quantity,
        } => move_stock(&mut ledger, &id, direction.into(), &quantity),
        Command::List { search, alerts } => {
            list_products(&ledger, search.as_deref().unwrap_or(""), alerts);
            Ok(())
        }
        Command::Show { id } => show_product(&ledger, &id),
        Command::History { limit } => {
            for entry in ledger.list_history().take(limit) {
                println!("{}", render_history_line(entry));
            }
            Ok(())
        }
        Command::Report => {
            print!("{}", render_report(&ledger.report()));
            Ok(())
        }
        Command::Export { path } => export_snapshot(&ledger, &path),
        Command::Import { path } => import_snapshot(&mut ledger, &path),
        Command::Init { .. } => unreachable!("handled above"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Attach a user-facing message, calling out writes that did not reach disk.
fn checked<T>(result: LedgerResult<T>, action: &str) -> Result<T> {
    result.map_err(|err| {
        let message = if err.mutated() {
            format!("{action} was applied but could not be saved; changes may be lost")
        } else {
            format!("failed to {action}")
        };
        anyhow::Error::new(err).context(message)
    })
}

fn add_product(ledger: &mut Ledger<FsStore>, fields: ProductArgs, policy: NumericPolicy) -> Result<()> {
    let mut form = ProductForm::default();
    fields.apply_to(&mut form);
    let input = checked(form.parse(policy), "add product")?;
    let product = checked(ledger.create(input), "add product")?;
    println!("{}\t{}", product.id, product.name);
    Ok(())
}

fn edit_product(
    ledger: &mut Ledger<FsStore>,
    id: &str,
    fields: ProductArgs,
    policy: NumericPolicy,
) -> Result<()> {
    let existing = checked(ledger.find_by_prefix(id), "find product")?;
    let id = existing.id;
    let mut form = form_from_product(existing);
    fields.apply_to(&mut form);
    let input = checked(form.parse(policy), "edit product")?;
    let product = checked(ledger.update(id, input), "edit product")?;
    println!("{}", render_product_line(&product));
    Ok(())
}

fn delete_product(ledger: &mut Ledger<FsStore>, id: &str) -> Result<()> {
    let id = checked(ledger.find_by_prefix(id), "find product")?.id;
    let removed = checked(ledger.delete(id), "delete product")?;
    println!("deleted {}\t{}", removed.id, removed.name);
    Ok(())
}

fn move_stock(
    ledger: &mut Ledger<FsStore>,
    id: &str,
    direction: MoveDirection,
    quantity: &str,
) -> Result<()> {
    let id = checked(ledger.find_by_prefix(id), "find product")?.id;
    let quantity = checked(parse_quantity(quantity), "move stock")?;
    let quantity = i64::try_from(quantity)
        .map_err(|_| LedgerError::validation("quantity", "is too large"))
        .map_err(anyhow::Error::new)?;
    let product = checked(ledger.move_stock(id, direction, quantity), "move stock")?;
    println!("{}", render_product_line(&product));
    Ok(())
}

fn list_products(ledger: &Ledger<FsStore>, search: &str, alerts: bool) {
    let filter = if alerts {
        AlertFilter::Alert
    } else {
        AlertFilter::All
    };
    for product in ledger.query(search, filter) {
        println!("{}", render_product_line(product));
    }
}

fn show_product(ledger: &Ledger<FsStore>, id: &str) -> Result<()> {
    let product = checked(ledger.find_by_prefix(id), "find product")?;
    print!("{}", render_product_detail(product));
    Ok(())
}

fn export_snapshot(ledger: &Ledger<FsStore>, path: &str) -> Result<()> {
    let target = PathBuf::from(path);
    if let Some(parent) = target.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create export directory")?;
    }
    let json = checked(ledger.export().to_json(), "render snapshot")?;
    std::fs::write(&target, json).context("failed to write export")?;
    println!("exported {} products to {}", ledger.list_products().len(), target.display());
    Ok(())
}

fn import_snapshot(ledger: &mut Ledger<FsStore>, path: &str) -> Result<()> {
    let contents = std::fs::read_to_string(path).context("failed to read import file")?;
    let count = checked(ledger.import(&contents), "import snapshot")?;
    println!("imported {count} products");
    Ok(())
}

fn form_from_product(product: &Product) -> ProductForm {
    ProductForm {
        name: product.name.clone(),
        code: product.code.clone(),
        category: product.category.clone().unwrap_or_default(),
        supplier: product.supplier.clone().unwrap_or_default(),
        stock: product.stock.to_string(),
        min_stock: product.min_stock.to_string(),
        buy_price: product.buy_price.to_string(),
        sell_price: product.sell_price.to_string(),
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn render_product_line(product: &Product) -> String {
    format!(
        "{}\t{}\t{}\t{}/{}\t{}\t{:.0}%",
        product.id,
        product.name,
        product.code,
        product.stock,
        product.min_stock,
        derive_alert_status(product),
        derive_stock_percentage(product)
    )
}

fn render_product_detail(product: &Product) -> String {
    let rows = [
        ("id:", product.id.to_string()),
        ("name:", product.name.clone()),
        ("code:", product.code.clone()),
        ("category:", product.category.clone().unwrap_or_else(|| "-".into())),
        ("supplier:", product.supplier.clone().unwrap_or_else(|| "-".into())),
        ("stock:", format!("{} (min {})", product.stock, product.min_stock)),
        ("status:", derive_alert_status(product).to_string()),
        ("level:", format!("{:.0}%", derive_stock_percentage(product))),
        ("buy price:", format!("{:.2}", product.buy_price)),
        ("sell price:", format!("{:.2}", product.sell_price)),
        ("units out:", product.units_out.to_string()),
        ("created:", format!("{} UTC", format_time(product.created_at))),
        ("updated:", format!("{} UTC", format_time(product.last_update))),
    ];
    let mut out = String::new();
    for (label, value) in rows {
        let _ = writeln!(out, "{label:<12}{value}");
    }
    out
}

fn render_history_line(entry: &HistoryEntry) -> String {
    format!("{}  {}", format_time(entry.timestamp), entry.action)
}

fn render_report(report: &StockReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "products:        {}", report.product_count);
    let _ = writeln!(out, "units on hand:   {}", report.units_on_hand);
    let _ = writeln!(out, "units out:       {}", report.units_out);
    let _ = writeln!(
        out,
        "ok/low/critical: {}/{}/{}",
        report.ok_count, report.low_count, report.critical_count
    );
    let _ = writeln!(out, "value at cost:   {:.2}", report.value_at_cost);
    let _ = writeln!(out, "value at retail: {:.2}", report.value_at_retail);
    if report.bars.is_empty() {
        return out;
    }

    let label_width = report
        .bars
        .iter()
        .map(|bar| bar.label.chars().count())
        .max()
        .unwrap_or(0);
    let max_stock = report.bars.iter().map(|bar| bar.stock).max().unwrap_or(0).max(1);
    out.push('\n');
    for bar in &report.bars {
        let filled = bar.stock.saturating_mul(BAR_WIDTH) / max_stock;
        let filled = usize::try_from(filled).unwrap_or(0);
        let empty = usize::try_from(BAR_WIDTH).unwrap_or(0).saturating_sub(filled);
        let _ = writeln!(
            out,
            "{:<label_width$} |{}{}| {} (out {})",
            bar.label,
            "#".repeat(filled),
            " ".repeat(empty),
            bar.stock,
            bar.units_out
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clap::CommandFactory;
    use rust_decimal::Decimal;
    use sl_core::{HistoryKind, MoveDirection, Movement, ProductInput};
    use uuid::Uuid;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    fn widget() -> Product {
        let mut product = Product::new(
            Uuid::from_u128(1),
            ProductInput {
                name: "Widget".into(),
                code: "W1".into(),
                supplier: Some("Acme".into()),
                stock: 4,
                min_stock: 5,
                buy_price: Decimal::new(250, 2),
                sell_price: Decimal::new(4, 0),
                ..ProductInput::default()
            },
            fixed_time(),
        )
        .unwrap();
        product.units_out = 6;
        product
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn move_accepts_negative_quantity_text() {
        let cli = Cli::try_parse_from(["sl", "move", "abc", "out", "-3"]).expect("parse");
        assert!(matches!(
            cli.command,
            Command::Move { ref quantity, .. } if quantity == "-3"
        ));
    }

    #[test]
    fn edit_args_override_only_given_fields() {
        let mut form = form_from_product(&widget());
        ProductArgs {
            stock: Some("9".into()),
            category: Some("tools".into()),
            ..ProductArgs::default()
        }
        .apply_to(&mut form);
        assert_eq!(form.name, "Widget");
        assert_eq!(form.stock, "9");
        assert_eq!(form.category, "tools");
        assert_eq!(form.min_stock, "5");
        let input = form.parse(NumericPolicy::Strict).expect("parse form");
        assert_eq!(input.buy_price, Decimal::new(250, 2));
    }

    #[test]
    fn product_detail_snapshot() {
        insta::assert_snapshot!(render_product_detail(&widget()), @r"
        id:         00000000-0000-0000-0000-000000000001
        name:       Widget
        code:       W1
        category:   -
        supplier:   Acme
        stock:      4 (min 5)
        status:     low
        level:      40%
        buy price:  2.50
        sell price: 4.00
        units out:  6
        created:    2026-01-02 03:04:05 UTC
        updated:    2026-01-02 03:04:05 UTC
        ");
    }

    #[test]
    fn history_line_snapshot() {
        let entry = HistoryEntry {
            id: Uuid::from_u128(7),
            kind: HistoryKind::StockOut,
            action: "stock out 6 (10→4) for \"Widget\"".into(),
            movement: Some(Movement {
                direction: MoveDirection::Out,
                quantity: 6,
                before: 10,
                after: 4,
            }),
            timestamp: fixed_time(),
        };
        insta::assert_snapshot!(
            render_history_line(&entry),
            @r#"2026-01-02 03:04:05  stock out 6 (10→4) for "Widget""#
        );
    }

    #[test]
    fn product_line_shows_status_and_level() {
        let line = render_product_line(&widget());
        assert_eq!(
            line,
            "00000000-0000-0000-0000-000000000001\tWidget\tW1\t4/5\tlow\t40%"
        );
    }

    #[test]
    fn report_draws_scaled_bars() {
        let mut hammer = widget();
        hammer.name = "Hammer".into();
        hammer.stock = 0;
        let mut nail = widget();
        nail.name = "Nail".into();
        nail.stock = 100;
        nail.units_out = 0;
        let rendered = render_report(&StockReport::from_products(&[hammer, nail]));
        assert!(rendered.contains("products:        2"));
        assert!(rendered.contains("ok/low/critical: 1/0/1"));
        assert!(rendered.contains("Hammer |                    | 0 (out 6)"));
        assert!(rendered.contains("Nail   |####################| 100 (out 0)"));
    }

    #[test]
    fn persistence_errors_are_called_out() {
        let err = checked::<()>(
            Err(LedgerError::Persistence("disk full".into())),
            "move stock",
        )
        .unwrap_err();
        assert!(err.to_string().contains("could not be saved"));

        let err = checked::<()>(
            Err(LedgerError::InsufficientStock {
                requested: 10,
                available: 4,
            }),
            "move stock",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "failed to move stock");

        let err = checked::<()>(
            Err(LedgerError::Render("key must be a string".into())),
            "render snapshot",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "failed to render snapshot");
    }
}
