//! Implements the `Shop` trait with canned orders and products, so the whole app can run without a
//! Shopify store. State is global and keyed by store URL.

use crate::api::Shop;
use crate::model::{ShopOrder, ShopProduct};
use crate::Result;
use anyhow::{bail, Context};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

#[derive(Debug, Clone, Default)]
struct TestShopState {
    /// `None` until first use, then seeded.
    orders: Option<Vec<ShopOrder>>,
    products: Option<Vec<ShopProduct>>,
    failure: Option<String>,
}

fn global() -> MutexGuard<'static, HashMap<String, TestShopState>> {
    static STATE: OnceLock<Mutex<HashMap<String, TestShopState>>> = OnceLock::new();
    STATE
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

pub(crate) struct TestShop {
    store_url: String,
}

impl TestShop {
    pub(crate) fn new(store_url: impl Into<String>) -> Self {
        Self {
            store_url: store_url.into(),
        }
    }

    /// Replaces the orders the store returns.
    #[cfg(test)]
    pub(crate) fn set_orders(store_url: &str, orders: Vec<ShopOrder>) {
        global().entry(store_url.to_string()).or_default().orders = Some(orders);
    }

    /// Makes every call for this store fail with `message`.
    #[cfg(test)]
    pub(crate) fn fail_with(store_url: &str, message: &str) {
        global().entry(store_url.to_string()).or_default().failure = Some(message.to_string());
    }
}

#[async_trait::async_trait]
impl Shop for TestShop {
    async fn orders(&mut self) -> Result<Vec<ShopOrder>> {
        let mut map = global();
        let state = map.entry(self.store_url.clone()).or_default();
        if let Some(message) = &state.failure {
            bail!("{message}");
        }
        if state.orders.is_none() {
            state.orders =
                Some(serde_json::from_str(ORDERS_JSON).context("Invalid seed orders")?);
        }
        Ok(state.orders.clone().unwrap_or_default())
    }

    async fn products(&mut self) -> Result<Vec<ShopProduct>> {
        let mut map = global();
        let state = map.entry(self.store_url.clone()).or_default();
        if let Some(message) = &state.failure {
            bail!("{message}");
        }
        if state.products.is_none() {
            state.products =
                Some(serde_json::from_str(PRODUCTS_JSON).context("Invalid seed products")?);
        }
        Ok(state.products.clone().unwrap_or_default())
    }
}

/// Four orders, five line items.
const ORDERS_JSON: &str = r##"[
  {
    "id": 5001, "name": "#1001", "order_number": 1001, "email": "pat@example.com",
    "created_at": "2024-03-01T10:00:00-05:00", "financial_status": "paid",
    "fulfillment_status": "fulfilled", "total_price": "55.00",
    "customer": {"first_name": "Pat", "last_name": "Lee", "email": "pat@example.com"},
    "line_items": [{"title": "Logo Tee", "variant_title": "Large / Black", "quantity": 2, "price": "25.00"}],
    "total_shipping_price_set": {"shop_money": {"amount": "5.00", "currency_code": "USD"}},
    "shipping_lines": [{"price": "5.00"}]
  },
  {
    "id": 5002, "name": "#1002", "order_number": 1002, "email": "sam@example.com",
    "created_at": "2024-03-02T12:30:00-05:00", "financial_status": "paid",
    "fulfillment_status": null, "total_price": "77.50",
    "customer": {"first_name": "Sam", "last_name": "Diaz", "email": "sam@example.com"},
    "line_items": [
      {"title": "Logo Tee", "variant_title": "Medium", "quantity": 1, "price": "25.00"},
      {"title": "Hoodie", "variant_title": "XL", "quantity": 1, "price": "45.00"}
    ],
    "total_shipping_price_set": {"shop_money": {"amount": "7.50", "currency_code": "USD"}},
    "shipping_lines": [{"price": "7.50"}]
  },
  {
    "id": 5003, "name": "#1003", "order_number": 1003, "email": "jo@example.com",
    "created_at": "2024-03-03T09:15:00-05:00", "financial_status": "partially_refunded",
    "fulfillment_status": "partial", "total_price": "13.50",
    "customer": null,
    "line_items": [{"title": "Sticker Pack", "variant_title": null, "quantity": 3, "price": "4.00"}],
    "total_shipping_price_set": null,
    "shipping_lines": [{"price": "1.50"}]
  },
  {
    "id": 5004, "name": "#1004", "order_number": 1004, "email": "pat@example.com",
    "created_at": "2024-03-04T18:45:00-05:00", "financial_status": "pending",
    "fulfillment_status": null, "total_price": "25.00",
    "customer": {"first_name": "Pat", "last_name": "Lee", "email": "pat@example.com"},
    "line_items": [{"title": "Logo Tee", "variant_title": "Small", "quantity": 1, "price": "25.00"}],
    "total_shipping_price_set": {"shop_money": {"amount": "0.00", "currency_code": "USD"}},
    "shipping_lines": []
  }
]"##;

const PRODUCTS_JSON: &str = r##"[
  {
    "id": 9001, "title": "Logo Tee",
    "variants": [
      {"title": "Small", "sku": "TEE-S", "inventory_quantity": 3},
      {"title": "Medium", "sku": "TEE-M", "inventory_quantity": 12},
      {"title": "Large / Black", "sku": "TEE-L", "inventory_quantity": 8}
    ]
  },
  {
    "id": 9002, "title": "Hoodie",
    "variants": [{"title": "XL", "sku": "HOOD-XL", "inventory_quantity": 0}]
  },
  {
    "id": 9003, "title": "Sticker Pack",
    "variants": [{"title": "Default Title", "sku": null, "inventory_quantity": 40}]
  }
]"##;
