//! 原始发票记录校验: 一次收集全部字段错误, 通过后得到可入库的结构。

use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;

use super::pricing::round2;
use crate::error::ValidationErrors;
use crate::models::{RawInvoice, RawInvoiceItem, Supplier};

/// NF-e 访问密钥长度
pub const ACCESS_KEY_LEN: usize = 44;

const NO_BARCODE: &str = "SEM GTIN";

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedInvoice {
    pub access_key: String,
    pub supplier: Supplier,
    pub issue_date: NaiveDate,
    pub total_value: BigDecimal,
    pub items: Vec<ParsedItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
    /// 从 1 开始
    pub line_number: u32,
    pub description: String,
    pub supplier_code: Option<String>,
    pub barcode: Option<String>,
    pub quantity: BigDecimal,
    pub unit_value: BigDecimal,
    pub lot: Option<String>,
    pub expiry: Option<NaiveDate>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// 接受 YYYY-MM-DD 和 DD/MM/YYYY
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .ok()
}

/// 空白与 "SEM GTIN" 视为无条码
pub fn clean_barcode(value: Option<&str>) -> Option<String> {
    non_blank(value).filter(|b| !b.eq_ignore_ascii_case(NO_BARCODE))
}

fn access_key(raw: Option<&str>, errors: &mut ValidationErrors) -> String {
    let Some(value) = non_blank(raw) else {
        errors.push("access_key", "is required");
        return String::new();
    };
    let key: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if key.len() != ACCESS_KEY_LEN || !key.chars().all(|c| c.is_ascii_digit()) {
        errors.push(
            "access_key",
            format!("must be {} digits", ACCESS_KEY_LEN),
        );
    }
    key
}

fn supplier(raw: &RawInvoice, errors: &mut ValidationErrors) -> Supplier {
    let tax_id: String = raw
        .supplier
        .as_ref()
        .and_then(|s| s.tax_id.as_deref())
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if tax_id.is_empty() {
        errors.push("supplier.tax_id", "is required");
    }

    let name = non_blank(raw.supplier.as_ref().and_then(|s| s.name.as_deref()));
    if name.is_none() {
        errors.push("supplier.name", "is required");
    }

    Supplier {
        tax_id,
        name: name.unwrap_or_default(),
    }
}

fn item(index: usize, raw: &RawInvoiceItem, errors: &mut ValidationErrors) -> ParsedItem {
    let line_number = index as u32 + 1;
    let field = |name: &str| format!("items[{}].{}", line_number, name);

    let description = non_blank(raw.description.as_deref());
    if description.is_none() {
        errors.push(field("description"), "is required");
    }

    let quantity = match &raw.quantity {
        None => {
            errors.push(field("quantity"), "is required");
            BigDecimal::zero()
        }
        Some(q) if *q <= BigDecimal::zero() => {
            errors.push(field("quantity"), "must be positive");
            q.clone()
        }
        Some(q) => q.clone(),
    };

    let unit_value = match &raw.unit_value {
        None => {
            errors.push(field("unit_value"), "is required");
            BigDecimal::zero()
        }
        Some(v) if *v < BigDecimal::zero() => {
            errors.push(field("unit_value"), "must not be negative");
            v.clone()
        }
        Some(v) => v.clone(),
    };

    let expiry = match non_blank(raw.expiry.as_deref()) {
        None => None,
        Some(value) => {
            let parsed = parse_date(&value);
            if parsed.is_none() {
                errors.push(field("expiry"), format!("'{}' is not a date", value));
            }
            parsed
        }
    };

    ParsedItem {
        line_number,
        description: description.unwrap_or_default(),
        supplier_code: non_blank(raw.supplier_code.as_deref()),
        barcode: clean_barcode(raw.barcode.as_deref()),
        quantity,
        unit_value,
        lot: non_blank(raw.lot.as_deref()),
        expiry,
    }
}

/// 校验原始记录; 总额缺失时取明细合计
pub fn validate(raw: &RawInvoice) -> Result<ParsedInvoice, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let access_key = access_key(raw.access_key.as_deref(), &mut errors);
    let supplier = supplier(raw, &mut errors);

    let issue_date = match non_blank(raw.issue_date.as_deref()) {
        None => {
            errors.push("issue_date", "is required");
            None
        }
        Some(value) => {
            let parsed = parse_date(&value);
            if parsed.is_none() {
                errors.push("issue_date", format!("'{}' is not a date", value));
            }
            parsed
        }
    };

    if raw.items.is_empty() {
        errors.push("items", "at least one item is required");
    }
    let items: Vec<ParsedItem> = raw
        .items
        .iter()
        .enumerate()
        .map(|(index, raw_item)| item(index, raw_item, &mut errors))
        .collect();

    let total_value = match &raw.total_value {
        Some(v) if *v < BigDecimal::zero() => {
            errors.push("total_value", "must not be negative");
            v.clone()
        }
        Some(v) => v.clone(),
        None => items
            .iter()
            .fold(BigDecimal::zero(), |acc, i| acc + &i.quantity * &i.unit_value),
    };

    match issue_date {
        Some(issue_date) if errors.is_empty() => Ok(ParsedInvoice {
            access_key,
            supplier,
            issue_date,
            total_value: round2(&total_value),
            items,
        }),
        _ => Err(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawSupplier;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn raw() -> RawInvoice {
        RawInvoice {
            access_key: Some("3524 0112 3456 7800 0190 5500 1000 0012 3410 0000 1234".into()),
            supplier: Some(RawSupplier {
                tax_id: Some("12.345.678/0001-90".into()),
                name: Some("Premier Pet Ltda".into()),
            }),
            issue_date: Some("2024-01-15".into()),
            total_value: None,
            items: vec![RawInvoiceItem {
                description: Some("Ração Cão Adulto 15kg".into()),
                supplier_code: Some(" RC-15 ".into()),
                barcode: Some("SEM GTIN".into()),
                quantity: Some(dec("4")),
                unit_value: Some(dec("120.50")),
                lot: Some("".into()),
                expiry: Some("31/12/2025".into()),
            }],
        }
    }

    #[test]
    fn clean_record_is_parsed() {
        let parsed = validate(&raw()).unwrap();
        assert_eq!(parsed.access_key.len(), ACCESS_KEY_LEN);
        assert_eq!(parsed.supplier.tax_id, "12345678000190");
        assert_eq!(parsed.total_value, dec("482.00"));
        let item = &parsed.items[0];
        assert_eq!(item.line_number, 1);
        assert_eq!(item.supplier_code.as_deref(), Some("RC-15"));
        assert_eq!(item.barcode, None);
        assert_eq!(item.lot, None);
        assert_eq!(item.expiry, NaiveDate::from_ymd_opt(2025, 12, 31));
    }

    #[test]
    fn every_problem_is_reported() {
        let mut bad = raw();
        bad.access_key = Some("123".into());
        bad.issue_date = Some("yesterday".into());
        bad.items.push(RawInvoiceItem {
            description: None,
            quantity: Some(dec("0")),
            unit_value: Some(dec("-1")),
            ..Default::default()
        });

        let errors = validate(&bad).unwrap_err();
        assert!(errors.has_field("access_key"));
        assert!(errors.has_field("issue_date"));
        assert!(errors.has_field("items[2].description"));
        assert!(errors.has_field("items[2].quantity"));
        assert!(errors.has_field("items[2].unit_value"));
        assert!(!errors.has_field("items[1].quantity"));
    }

    #[test]
    fn missing_items_and_supplier() {
        let errors = validate(&RawInvoice::default()).unwrap_err();
        assert!(errors.has_field("access_key"));
        assert!(errors.has_field("supplier.tax_id"));
        assert!(errors.has_field("supplier.name"));
        assert!(errors.has_field("items"));
    }

    #[test]
    fn declared_total_is_kept() {
        let mut record = raw();
        record.total_value = Some(dec("500"));
        assert_eq!(validate(&record).unwrap().total_value, dec("500.00"));
    }
}
