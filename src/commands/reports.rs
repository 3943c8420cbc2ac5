//! Read-only reports. Revenue and the profit breakdown come from the summary block on the
//! `Orders` tab; everything else is computed from Shopify directly.

use crate::api::Sheet;
use crate::commands::{Out, Session};
use crate::model::order::ORDERS_TAB;
use crate::model::{A1Range, Amount, OrderRow, ShopOrder, ShopProduct};
use crate::Result;
use chrono::{DateTime, Datelike, Duration, Local, NaiveDateTime, NaiveTime, TimeZone};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

const TOP_LIMIT: usize = 10;
const TREND_DAYS: usize = 7;
const LOW_STOCK_BELOW: i64 = 10;
const CRITICAL_STOCK_BELOW: i64 = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueReport {
    pub total_revenue: Option<String>,
    pub net_profit: Option<String>,
    pub units_sold: Option<String>,
    pub shopify_payout: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitBreakdown {
    pub total_revenue: Option<String>,
    pub total_product_costs: Option<String>,
    pub total_costs: Option<String>,
    pub net_profit: Option<String>,
    pub profit_per_shirt: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdersSummary {
    pub total_orders: usize,
    pub total_value: Amount,
    /// Order count per financial status.
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSale {
    pub product: String,
    pub quantity: i64,
    pub revenue: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSpend {
    pub name: String,
    pub email: String,
    pub orders: usize,
    pub total_spent: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRevenue {
    pub date: String,
    pub revenue: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueTrends {
    /// The most recent days, oldest first.
    pub daily: Vec<DailyRevenue>,
    pub total_days: usize,
    pub average_daily: Amount,
    pub total_revenue: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateRange {
    LastWeek,
    ThisWeek,
    LastMonth,
    ThisMonth,
    Yesterday,
    Today,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRangeReport {
    pub range: DateRange,
    pub start: String,
    pub end: String,
    pub orders: usize,
    pub total_value: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockStatus {
    Critical,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockItem {
    pub product: String,
    pub variant: String,
    pub stock: i64,
    pub status: StockStatus,
}

impl DateRange {
    /// Phrases are checked in declaration order.
    const PHRASES: [(&'static str, DateRange); 6] = [
        ("last week", DateRange::LastWeek),
        ("this week", DateRange::ThisWeek),
        ("last month", DateRange::LastMonth),
        ("this month", DateRange::ThisMonth),
        ("yesterday", DateRange::Yesterday),
        ("today", DateRange::Today),
    ];

    /// The first range phrase found in `text`.
    pub fn from_text(text: &str) -> Option<DateRange> {
        let text = text.to_lowercase();
        Self::PHRASES
            .iter()
            .find(|(phrase, _)| text.contains(phrase))
            .map(|(_, range)| *range)
    }

    /// `[start, end]` in wall-clock time. Last week and last month are rolling 7 and 30 days.
    pub fn bounds(&self, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
        let midnight = now.date().and_time(NaiveTime::MIN);
        match self {
            DateRange::LastWeek => (now - Duration::days(7), now),
            DateRange::ThisWeek => {
                let since_monday = now.weekday().num_days_from_monday();
                (midnight - Duration::days(i64::from(since_monday)), now)
            }
            DateRange::LastMonth => (now - Duration::days(30), now),
            DateRange::ThisMonth => {
                let first = now.date().with_day(1).unwrap_or(now.date());
                (first.and_time(NaiveTime::MIN), now)
            }
            DateRange::Yesterday => (midnight - Duration::days(1), midnight),
            DateRange::Today => (midnight, now),
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phrase = Self::PHRASES
            .iter()
            .find(|(_, r)| r == self)
            .map(|(p, _)| *p)
            .unwrap_or_default();
        f.write_str(phrase)
    }
}

/// `Orders!O2:P9` as label/value pairs. Empty if the tab does not exist.
async fn read_summary(sheet: &mut dyn Sheet) -> Result<Vec<(String, String)>> {
    if !sheet.tabs().await?.iter().any(|t| t.title == ORDERS_TAB) {
        return Ok(Vec::new());
    }
    let values = sheet
        .get(&A1Range::columns(ORDERS_TAB, "O", "P", 2, 9)?)
        .await?;
    Ok(values
        .into_iter()
        .filter_map(|row| {
            let mut cells = row.into_iter();
            let label = cells.next()?.trim().to_string();
            let value = cells.next()?;
            (!label.is_empty()).then_some((label, value))
        })
        .collect())
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

fn field_lines(fields: &[(&str, &Option<String>)]) -> String {
    fields
        .iter()
        .filter_map(|(label, value)| value.as_ref().map(|v| format!("\n• {label}: {v}")))
        .collect()
}

pub async fn revenue(session: &mut Session) -> Result<Out<RevenueReport>> {
    let summary = read_summary(session.sheet().await?).await?;
    let mut report = RevenueReport::default();
    for (label, value) in &summary {
        let label = label.to_lowercase();
        if label.contains("revenue") {
            set_once(&mut report.total_revenue, value);
        } else if label.contains("profit") {
            set_once(&mut report.net_profit, value);
        } else if label.contains("units sold") {
            set_once(&mut report.units_sold, value);
        } else if label.contains("shopify payout") {
            set_once(&mut report.shopify_payout, value);
        }
    }
    if report == RevenueReport::default() {
        return Ok(Out::new("No revenue summary found; run a sync first", report));
    }
    let message = format!(
        "Revenue:{}",
        field_lines(&[
            ("Total Revenue", &report.total_revenue),
            ("Net Profit", &report.net_profit),
            ("Units Sold", &report.units_sold),
            ("Shopify Payout", &report.shopify_payout),
        ])
    );
    Ok(Out::new(message, report))
}

pub async fn profit_breakdown(session: &mut Session) -> Result<Out<ProfitBreakdown>> {
    let summary = read_summary(session.sheet().await?).await?;
    let mut report = ProfitBreakdown::default();
    for (label, value) in &summary {
        let label = label.to_lowercase();
        if label.contains("revenue") {
            set_once(&mut report.total_revenue, value);
        } else if label.contains("product costs") {
            set_once(&mut report.total_product_costs, value);
        } else if label.contains("total costs") {
            set_once(&mut report.total_costs, value);
        } else if label.contains("net profit") {
            set_once(&mut report.net_profit, value);
        } else if label.contains("profit per shirt") {
            set_once(&mut report.profit_per_shirt, value);
        }
    }
    if report == ProfitBreakdown::default() {
        return Ok(Out::new("No profit summary found; run a sync first", report));
    }
    let message = format!(
        "Profit breakdown:{}",
        field_lines(&[
            ("Total Revenue", &report.total_revenue),
            ("Total Product Costs", &report.total_product_costs),
            ("TOTAL COSTS", &report.total_costs),
            ("NET PROFIT", &report.net_profit),
            ("Profit Per Shirt", &report.profit_per_shirt),
        ])
    );
    Ok(Out::new(message, report))
}

async fn shop_orders(session: &mut Session) -> Result<Vec<ShopOrder>> {
    let orders = session.shop().await?.orders().await?;
    debug!("Fetched {} orders for a report", orders.len());
    Ok(orders)
}

pub async fn orders_summary(session: &mut Session) -> Result<Out<OrdersSummary>> {
    let orders = shop_orders(session).await?;
    let mut summary = OrdersSummary {
        total_orders: orders.len(),
        total_value: orders.iter().map(|o| o.total_price).sum::<Amount>().round(),
        by_status: BTreeMap::new(),
    };
    for order in &orders {
        let status = order
            .financial_status
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        *summary.by_status.entry(status).or_default() += 1;
    }
    let mut message = format!(
        "{} orders worth {}",
        summary.total_orders, summary.total_value
    );
    for (status, count) in &summary.by_status {
        message.push_str(&format!("\n• {status}: {count}"));
    }
    Ok(Out::new(message, summary))
}

/// Quantity and revenue per product, sorted by product name.
fn sales_by_product(orders: &[ShopOrder]) -> Vec<ProductSale> {
    let rows: Vec<OrderRow> = crate::model::order::order_rows(orders, Amount::ZERO);
    let mut by_product: BTreeMap<&str, (i64, Amount)> = BTreeMap::new();
    for row in &rows {
        let entry = by_product.entry(row.product.as_str()).or_default();
        entry.0 += row.quantity;
        entry.1 = entry.1 + row.revenue();
    }
    by_product
        .into_iter()
        .map(|(product, (quantity, revenue))| ProductSale {
            product: product.to_string(),
            quantity,
            revenue: revenue.round(),
        })
        .collect()
}

fn sales_lines(sales: &[ProductSale]) -> String {
    sales
        .iter()
        .map(|s| format!("\n• {}: {} sold, {}", s.product, s.quantity, s.revenue))
        .collect()
}

pub async fn product_sales(session: &mut Session) -> Result<Out<Vec<ProductSale>>> {
    let sales = sales_by_product(&shop_orders(session).await?);
    if sales.is_empty() {
        return Ok(Out::new("No orders found", sales));
    }
    let message = format!("Sales for {} products:{}", sales.len(), sales_lines(&sales));
    Ok(Out::new(message, sales))
}

pub async fn top_products(session: &mut Session) -> Result<Out<Vec<ProductSale>>> {
    let mut sales = sales_by_product(&shop_orders(session).await?);
    if sales.is_empty() {
        return Ok(Out::new("No orders found", sales));
    }
    // Stable, so ties stay alphabetical.
    sales.sort_by(|a, b| b.quantity.cmp(&a.quantity));
    sales.truncate(TOP_LIMIT);
    let message = format!("Top {} products:{}", sales.len(), sales_lines(&sales));
    Ok(Out::new(message, sales))
}

pub async fn top_customers(session: &mut Session) -> Result<Out<Vec<CustomerSpend>>> {
    let orders = shop_orders(session).await?;
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut customers: Vec<CustomerSpend> = Vec::new();
    for order in &orders {
        let email = order.email().unwrap_or("unknown").to_string();
        let i = *index.entry(email.clone()).or_insert_with(|| {
            customers.push(CustomerSpend {
                name: order.customer_name(),
                email,
                orders: 0,
                total_spent: Amount::ZERO,
            });
            customers.len() - 1
        });
        customers[i].orders += 1;
        customers[i].total_spent = customers[i].total_spent + order.total_price;
    }
    customers.sort_by(|a, b| b.total_spent.cmp(&a.total_spent));
    customers.truncate(TOP_LIMIT);
    if customers.is_empty() {
        return Ok(Out::new("No orders found", customers));
    }

    let mut message = format!("Top {} customers:", customers.len());
    for c in &customers {
        message.push_str(&format!(
            "\n• {} ({}): {} orders, {}",
            c.name, c.email, c.orders, c.total_spent
        ));
    }
    Ok(Out::new(message, customers))
}

fn trends(orders: &[ShopOrder]) -> RevenueTrends {
    let mut by_day: BTreeMap<String, Amount> = BTreeMap::new();
    for order in orders.iter().filter(|o| !o.created_at.is_empty()) {
        let day = by_day.entry(order.date()).or_default();
        *day = *day + order.total_price;
    }
    let total: Amount = by_day.values().copied().sum();
    let average = if by_day.is_empty() {
        Amount::ZERO
    } else {
        Amount::new(total.value() / Decimal::from(by_day.len()))
    };
    let total_days = by_day.len();
    let daily = by_day
        .into_iter()
        .skip(total_days.saturating_sub(TREND_DAYS))
        .map(|(date, revenue)| DailyRevenue {
            date,
            revenue: revenue.round(),
        })
        .collect();
    RevenueTrends {
        daily,
        total_days,
        average_daily: average.round(),
        total_revenue: total.round(),
    }
}

pub async fn revenue_trends(session: &mut Session) -> Result<Out<RevenueTrends>> {
    let trends = trends(&shop_orders(session).await?);
    let mut message = format!(
        "Revenue over {} days: {} total, {} per day on average",
        trends.total_days, trends.total_revenue, trends.average_daily
    );
    for day in &trends.daily {
        message.push_str(&format!("\n• {}: {}", day.date, day.revenue));
    }
    Ok(Out::new(message, trends))
}

/// Orders whose creation time, seen on the wall clock of `now`'s zone, falls in `range`.
fn in_range<Tz: TimeZone>(
    orders: &[ShopOrder],
    range: DateRange,
    now: DateTime<Tz>,
) -> DateRangeReport {
    let zone = now.timezone();
    let (start, end) = range.bounds(now.naive_local());
    let matching: Vec<&ShopOrder> = orders
        .iter()
        .filter(|o| {
            DateTime::parse_from_rfc3339(&o.created_at)
                .map(|dt| dt.with_timezone(&zone).naive_local())
                .is_ok_and(|at| start <= at && at <= end)
        })
        .collect();
    DateRangeReport {
        range,
        start: start.format("%Y-%m-%d").to_string(),
        end: end.format("%Y-%m-%d").to_string(),
        orders: matching.len(),
        total_value: matching.iter().map(|o| o.total_price).sum::<Amount>().round(),
    }
}

pub async fn orders_by_date_range(
    session: &mut Session,
    range: DateRange,
) -> Result<Out<DateRangeReport>> {
    let orders = shop_orders(session).await?;
    let report = in_range(&orders, range, Local::now());
    let message = format!(
        "{} orders {range} ({} to {}) worth {}",
        report.orders, report.start, report.end, report.total_value
    );
    Ok(Out::new(message, report))
}

fn low_stock_items(products: &[ShopProduct]) -> Vec<LowStockItem> {
    products
        .iter()
        .flat_map(|p| {
            p.variants.iter().filter_map(move |v| {
                let stock = v.inventory_quantity.unwrap_or(0);
                (stock < LOW_STOCK_BELOW).then(|| LowStockItem {
                    product: p.title.clone(),
                    variant: v.title.clone(),
                    stock,
                    status: if stock < CRITICAL_STOCK_BELOW {
                        StockStatus::Critical
                    } else {
                        StockStatus::Low
                    },
                })
            })
        })
        .collect()
}

pub async fn low_stock(session: &mut Session) -> Result<Out<Vec<LowStockItem>>> {
    let products = session.shop().await?.products().await?;
    let items = low_stock_items(&products);
    if items.is_empty() {
        return Ok(Out::new("No products are low on stock", items));
    }
    let mut message = format!("{} variants are low on stock:", items.len());
    for item in &items {
        message.push_str(&format!(
            "\n• {} ({}): {} left [{:?}]",
            item.product, item.variant, item.stock, item.status
        ));
    }
    Ok(Out::new(message, items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TestShop;
    use crate::test::TestEnv;
    use chrono::{FixedOffset, Utc};

    fn amount(s: &str) -> Amount {
        Amount::from_cell(s)
    }

    #[tokio::test]
    async fn test_summary_reports_after_sync() {
        let env = TestEnv::new().await;
        let mut session = env.session();

        let out = revenue(&mut session).await.unwrap();
        assert_eq!(out.message(), "No revenue summary found; run a sync first");

        crate::commands::sync(&mut session).await.unwrap();
        let out = revenue(&mut session).await.unwrap();
        let report = out.structure().unwrap();
        assert!(report.total_revenue.as_deref().unwrap().starts_with("=SUMIFS"));
        assert_eq!(report.net_profit.as_deref(), Some("=P2-P4"));
        assert_eq!(report.units_sold.as_deref(), Some("=SUM(D2:D6)"));
        assert_eq!(report.shopify_payout.as_deref(), Some("23.98"));

        let out = profit_breakdown(&mut session).await.unwrap();
        let report = out.structure().unwrap();
        assert_eq!(report.total_product_costs.as_deref(), Some("=SUM(H2:H6)"));
        assert_eq!(report.total_costs.as_deref(), Some("809.32"));
        assert_eq!(report.net_profit.as_deref(), Some("=P2-P4"));
        assert_eq!(report.profit_per_shirt.as_deref(), Some("=SUM(I2:I6)"));
    }

    #[tokio::test]
    async fn test_shop_reports() {
        let env = TestEnv::new().await;
        let mut session = env.session();

        let out = orders_summary(&mut session).await.unwrap();
        let summary = out.structure().unwrap();
        assert_eq!(summary.total_orders, 4);
        assert_eq!(summary.total_value, amount("171.00"));
        assert_eq!(summary.by_status.get("paid"), Some(&2));
        assert_eq!(summary.by_status.get("partially_refunded"), Some(&1));

        let out = product_sales(&mut session).await.unwrap();
        let names: Vec<&str> = out
            .structure()
            .unwrap()
            .iter()
            .map(|s| s.product.as_str())
            .collect();
        assert_eq!(names, vec!["Hoodie", "Logo Tee", "Sticker Pack"]);

        let out = top_products(&mut session).await.unwrap();
        let top = out.structure().unwrap();
        assert_eq!(top[0].product, "Logo Tee");
        assert_eq!(top[0].quantity, 4);
        assert_eq!(top[0].revenue, amount("100"));
        assert_eq!(top[1].product, "Sticker Pack");

        let out = top_customers(&mut session).await.unwrap();
        let customers = out.structure().unwrap();
        assert_eq!(customers[0].email, "pat@example.com");
        assert_eq!(customers[0].orders, 2);
        assert_eq!(customers[0].total_spent, amount("80"));
        assert_eq!(customers[2].name, "jo@example.com");

        let out = revenue_trends(&mut session).await.unwrap();
        let trends = out.structure().unwrap();
        assert_eq!(trends.total_days, 4);
        assert_eq!(trends.daily[0].date, "2024-03-01");
        assert_eq!(trends.total_revenue, amount("171"));
        assert_eq!(trends.average_daily, amount("42.75"));

        let out = low_stock(&mut session).await.unwrap();
        let items = out.structure().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].variant, "Small");
        assert_eq!(items[0].status, StockStatus::Critical);
        assert_eq!(items[1].status, StockStatus::Low);
        assert_eq!(items[2].product, "Hoodie");
    }

    #[tokio::test]
    async fn test_empty_store() {
        let env = TestEnv::new().await;
        TestShop::set_orders(env.store_url(), Vec::new());
        let mut session = env.session();
        assert_eq!(top_products(&mut session).await.unwrap().message(), "No orders found");
        let out = revenue_trends(&mut session).await.unwrap();
        assert_eq!(out.structure().unwrap().average_daily, Amount::ZERO);
    }

    #[test]
    fn test_date_ranges() {
        let orders: Vec<ShopOrder> = serde_json::from_str(
            r#"[
                {"id": 1, "created_at": "2024-03-01T10:00:00-05:00", "total_price": "10.00"},
                {"id": 2, "created_at": "2024-03-03T09:15:00-05:00", "total_price": "20.00"},
                {"id": 3, "created_at": "2024-03-04T18:45:00-05:00", "total_price": "30.00"}
            ]"#,
        )
        .unwrap();
        // A Monday evening.
        let now = FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 4, 20, 0, 0)
            .unwrap();

        let count = |range| in_range(&orders, range, now).orders;
        assert_eq!(count(DateRange::Today), 1);
        assert_eq!(count(DateRange::Yesterday), 1);
        assert_eq!(count(DateRange::ThisWeek), 1);
        assert_eq!(count(DateRange::LastWeek), 3);
        assert_eq!(count(DateRange::ThisMonth), 3);

        let report = in_range(&orders, DateRange::Yesterday, now);
        assert_eq!(report.start, "2024-03-03");
        assert_eq!(report.total_value, amount("20"));
    }

    #[test]
    fn test_date_ranges_use_the_local_day() {
        let orders: Vec<ShopOrder> = serde_json::from_str(
            r#"[{"id": 1, "created_at": "2024-03-04T22:00:00-05:00", "total_price": "10.00"}]"#,
        )
        .unwrap();
        // The same instant: 05:00 on the 5th in New York, 10:00 on the 5th in UTC.
        let new_york = FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 5, 5, 0, 0)
            .unwrap();
        let utc = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();

        assert_eq!(in_range(&orders, DateRange::Yesterday, new_york).orders, 1);
        assert_eq!(in_range(&orders, DateRange::Today, new_york).orders, 0);
        // 03:00 UTC on the 5th.
        assert_eq!(in_range(&orders, DateRange::Today, utc).orders, 1);
        assert_eq!(in_range(&orders, DateRange::Yesterday, utc).orders, 0);
    }

    #[test]
    fn test_date_range_from_text() {
        assert_eq!(
            DateRange::from_text("Show me orders from LAST MONTH"),
            Some(DateRange::LastMonth)
        );
        assert_eq!(DateRange::from_text("orders today"), Some(DateRange::Today));
        assert_eq!(DateRange::from_text("orders"), None);
        assert_eq!(DateRange::ThisWeek.to_string(), "this week");
    }
}
