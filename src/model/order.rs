//! Shopify orders and the flat rows they become on the `Orders` and `RAW_ORDERS` tabs.

use crate::model::Amount;
use chrono::DateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const ORDERS_TAB: &str = "Orders";
pub const RAW_ORDERS_TAB: &str = "RAW_ORDERS";

/// Headers of the `Orders` tab, columns A through M.
pub const ORDERS_HEADERS: [&str; 13] = [
    "Customer Name",
    "Product Name",
    "Size",
    "Quantity",
    "Sold Price",
    "Shipping Cost",
    "PSL",
    "Unit Cost",
    "Profit",
    "Profit Margin %",
    "Date",
    "Order Status",
    "Shipping Status",
];

/// Headers of the hidden `RAW_ORDERS` tab.
pub const RAW_ORDERS_HEADERS: [&str; 12] = [
    "Order ID",
    "Order Number",
    "Created At",
    "Customer",
    "Email",
    "Financial Status",
    "Fulfillment Status",
    "Product",
    "Quantity",
    "Price",
    "Unit Cost",
    "Shipping",
];

pub const SHIPPED: &str = "Shipped";
pub const PENDING: &str = "Pending";
pub const UNFULFILLED: &str = "Unfulfilled";

/// An order as returned by the Shopify Admin REST API. Only the fields we read are modeled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShopOrder {
    pub id: u64,
    /// The display number, e.g. `#1001`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub order_number: Option<u64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub financial_status: Option<String>,
    #[serde(default)]
    pub fulfillment_status: Option<String>,
    #[serde(default)]
    pub total_price: Amount,
    #[serde(default)]
    pub customer: Option<ShopCustomer>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub total_shipping_price_set: Option<PriceSet>,
    #[serde(default)]
    pub shipping_lines: Vec<ShippingLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShopCustomer {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub variant_title: Option<String>,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub price: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSet {
    pub shop_money: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Money {
    #[serde(default)]
    pub amount: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShippingLine {
    #[serde(default)]
    pub price: Amount,
}

/// A product with its variants, used for the low stock report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShopProduct {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub variants: Vec<ShopVariant>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShopVariant {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub inventory_quantity: Option<i64>,
}

impl ShopOrder {
    /// First and last name, falling back to the order email, then `Unknown`.
    pub fn customer_name(&self) -> String {
        let from_customer = self.customer.as_ref().map(|c| {
            [c.first_name.as_deref(), c.last_name.as_deref()]
                .into_iter()
                .flatten()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        });
        match from_customer {
            Some(name) if !name.is_empty() => name,
            _ => self
                .email()
                .filter(|e| !e.is_empty())
                .unwrap_or("Unknown")
                .to_string(),
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .filter(|e| !e.is_empty())
            .or_else(|| self.customer.as_ref().and_then(|c| c.email.as_deref()))
    }

    /// The shipping price set, or the sum of shipping lines when that is zero or missing.
    pub fn shipping(&self) -> Amount {
        let from_set = self
            .total_shipping_price_set
            .as_ref()
            .map(|s| s.shop_money.amount)
            .unwrap_or_default();
        if !from_set.is_zero() {
            return from_set;
        }
        self.shipping_lines.iter().map(|l| l.price).sum()
    }

    /// `created_at` as `YYYY-MM-DD`.
    pub fn date(&self) -> String {
        match DateTime::parse_from_rfc3339(&self.created_at) {
            Ok(dt) => dt.date_naive().format("%Y-%m-%d").to_string(),
            Err(_) => self.created_at.chars().take(10).collect(),
        }
    }

    pub fn display_number(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        match self.order_number {
            Some(n) => format!("#{n}"),
            None => format!("#{}", self.id),
        }
    }
}

/// One line item of one order, flattened into the values the sheet needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderRow {
    pub order_id: String,
    pub order_number: String,
    pub created_at: String,
    pub customer: String,
    pub email: String,
    pub financial_status: String,
    pub fulfillment_status: String,
    pub product: String,
    pub size: String,
    pub quantity: i64,
    pub price: Amount,
    pub unit_cost: Amount,
    /// Only the first line item of an order carries the order's shipping.
    pub shipping: Amount,
}

impl OrderRow {
    /// One row per line item. An order with no line items produces no rows.
    pub fn from_order(order: &ShopOrder, unit_cost: Amount) -> Vec<OrderRow> {
        let shipping = order.shipping();
        order
            .line_items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let size = item
                    .variant_title
                    .as_deref()
                    .map(extract_size)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| extract_size(&item.title));
                OrderRow {
                    order_id: order.id.to_string(),
                    order_number: order.display_number(),
                    created_at: order.created_at.clone(),
                    customer: order.customer_name(),
                    email: order.email().unwrap_or_default().to_string(),
                    financial_status: order.financial_status.clone().unwrap_or_default(),
                    fulfillment_status: order.fulfillment_status.clone().unwrap_or_default(),
                    product: item.title.clone(),
                    size: size.to_string(),
                    quantity: item.quantity,
                    price: item.price,
                    unit_cost,
                    shipping: if i == 0 { shipping } else { Amount::ZERO },
                }
            })
            .collect()
    }

    pub fn date(&self) -> String {
        match DateTime::parse_from_rfc3339(&self.created_at) {
            Ok(dt) => dt.date_naive().format("%Y-%m-%d").to_string(),
            Err(_) => self.created_at.chars().take(10).collect(),
        }
    }

    pub fn order_status(&self) -> String {
        title_case(&self.financial_status)
    }

    pub fn shipping_status(&self) -> String {
        shipping_status(&self.fulfillment_status)
    }

    /// Price × quantity.
    pub fn revenue(&self) -> Amount {
        self.price * Decimal::from(self.quantity)
    }

    /// Unit cost × quantity.
    pub fn cogs(&self) -> Amount {
        self.unit_cost * Decimal::from(self.quantity)
    }

    /// Values for `Orders!A{row}:F{row}`.
    pub fn orders_left(&self) -> Vec<String> {
        vec![
            self.customer.clone(),
            self.product.clone(),
            self.size.clone(),
            self.quantity.to_string(),
            self.price.value().to_string(),
            self.shipping.value().to_string(),
        ]
    }

    /// Values for `Orders!H{row}:M{row}`. `row` is the 1-based sheet row the formulas refer to.
    pub fn orders_right(&self, row: usize) -> Vec<String> {
        vec![
            self.unit_cost.value().to_string(),
            format!("=(E{row}-H{row}-G{row})+F{row}"),
            format!("=IF(E{row}<>0, I{row}/E{row}, 0)"),
            self.date(),
            self.order_status(),
            self.shipping_status(),
        ]
    }

    /// Values for one `RAW_ORDERS` row, in `RAW_ORDERS_HEADERS` order.
    pub fn raw_values(&self) -> Vec<String> {
        vec![
            self.order_id.clone(),
            self.order_number.clone(),
            self.created_at.clone(),
            self.customer.clone(),
            self.email.clone(),
            self.financial_status.clone(),
            self.fulfillment_status.clone(),
            self.product.clone(),
            self.quantity.to_string(),
            self.price.value().to_string(),
            self.unit_cost.value().to_string(),
            self.shipping.value().to_string(),
        ]
    }

    /// Reads a `RAW_ORDERS` row back. Missing trailing cells read as empty. Rows without an
    /// order id are skipped.
    pub fn from_raw_values(values: &[String]) -> Option<OrderRow> {
        let cell = |i: usize| values.get(i).map(|s| s.trim().to_string()).unwrap_or_default();
        let order_id = cell(0);
        if order_id.is_empty() {
            return None;
        }
        Some(OrderRow {
            order_id,
            order_number: cell(1),
            created_at: cell(2),
            customer: cell(3),
            email: cell(4),
            financial_status: cell(5),
            fulfillment_status: cell(6),
            product: cell(7),
            size: extract_size(&cell(7)).to_string(),
            quantity: Amount::from_cell(&cell(8)).value().trunc().to_i64().unwrap_or(0),
            price: Amount::from_cell(&cell(9)),
            unit_cost: Amount::from_cell(&cell(10)),
            shipping: Amount::from_cell(&cell(11)),
        })
    }

    /// True if `reference` names this row's order, by number (`1042`, `#1042`) or by id.
    pub fn matches(&self, reference: &str) -> bool {
        let reference = reference.trim().trim_start_matches('#');
        !reference.is_empty()
            && (self.order_number.trim_start_matches('#') == reference
                || self.order_id == reference)
    }
}

/// Flattens every order into rows.
pub fn order_rows(orders: &[ShopOrder], unit_cost: Amount) -> Vec<OrderRow> {
    orders
        .iter()
        .flat_map(|o| OrderRow::from_order(o, unit_cost))
        .collect()
}

const SIZE_CODES: [&str; 7] = ["XXXL", "XXL", "XL", "XS", "S", "M", "L"];

const SIZE_NAMES: [(&str, &str); 10] = [
    ("EXTRA EXTRA LARGE", "XXL"),
    ("EXTRA LARGE", "XL"),
    ("EXTRA SMALL", "XS"),
    ("EXTRALARGE", "XL"),
    ("EXTRASMALL", "XS"),
    ("XXLARGE", "XXL"),
    ("MEDIUM", "M"),
    ("SMALL", "S"),
    ("LARGE", "L"),
    ("MED", "M"),
];

/// Finds a shirt size in a variant title or product name. Whole-word codes win over size names.
/// Returns an empty string when nothing matches.
pub fn extract_size(text: &str) -> &'static str {
    let upper = text.to_uppercase();
    let words: Vec<&str> = upper
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if let Some(code) = SIZE_CODES.iter().find(|code| words.contains(code)) {
        return *code;
    }
    if let Some((_, code)) = SIZE_NAMES.iter().find(|(name, _)| upper.contains(name)) {
        return *code;
    }
    if words.contains(&"LG") {
        return "L";
    }
    ""
}

/// `partially_refunded` becomes `Partially Refunded`.
pub fn title_case(s: &str) -> String {
    s.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Maps a Shopify fulfillment status to the value shown in the Shipping Status column.
pub fn shipping_status(fulfillment: &str) -> String {
    let lower = fulfillment.trim().to_lowercase();
    match lower.as_str() {
        "" => UNFULFILLED.to_string(),
        "fulfilled" | "shipped" => SHIPPED.to_string(),
        "pending" | "partial" => PENDING.to_string(),
        _ => title_case(&lower),
    }
}
