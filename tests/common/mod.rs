#![allow(dead_code)]

use bigdecimal::BigDecimal;
use nfe_intake_rust::config::EngineConfig;
use nfe_intake_rust::models::{NewProduct, Product, RawInvoice, RawInvoiceItem, RawSupplier};
use nfe_intake_rust::{InvoiceLifecycle, MemoryStore};
use std::str::FromStr;
use std::sync::Arc;

pub const SUPPLIER_TAX_ID: &str = "12345678000190";

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub fn access_key(n: u32) -> String {
    format!("3524{:040}", n)
}

pub fn engine(store: &MemoryStore) -> Arc<InvoiceLifecycle> {
    Arc::new(InvoiceLifecycle::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        EngineConfig::default(),
    ))
}

pub async fn seed(store: &MemoryStore, code: &str, name: &str, cost: &str, price: &str) -> Product {
    store
        .seed_product(NewProduct {
            code: code.into(),
            name: name.into(),
            barcode: None,
            cost_price: dec(cost),
            sale_price: dec(price),
            margin: nfe_intake_rust::service::pricing::margin(&dec(price), &dec(cost)),
        })
        .await
        .unwrap()
}

pub fn line(description: &str, quantity: &str, unit: &str) -> RawInvoiceItem {
    RawInvoiceItem {
        description: Some(description.into()),
        quantity: Some(dec(quantity)),
        unit_value: Some(dec(unit)),
        ..Default::default()
    }
}

pub fn invoice(n: u32, items: Vec<RawInvoiceItem>) -> RawInvoice {
    RawInvoice {
        access_key: Some(access_key(n)),
        supplier: Some(RawSupplier {
            tax_id: Some(SUPPLIER_TAX_ID.into()),
            name: Some("Premier Pet Ltda".into()),
        }),
        issue_date: Some("2024-03-01".into()),
        total_value: None,
        items,
    }
}
