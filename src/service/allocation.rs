//! 渠道分配 (rateio) 账本: 只做报表统计, 从不拆分实物库存。

use bigdecimal::{BigDecimal, Zero};

use super::pricing::round2;
use crate::error::ValidationErrors;
use crate::models::{AllocationMode, AllocationSummary, ChannelLine, InvoiceItem};

fn hundred() -> BigDecimal {
    BigDecimal::from(100)
}

/// 按模式计算发票级线上/门店占比
///
/// partial 模式: sum(指定数量 * 单价) / sum(数量 * 单价) * 100, 总额为 0 时为 0
pub fn summarize<'a, I>(mode: AllocationMode, items: I) -> AllocationSummary
where
    I: IntoIterator<Item = &'a InvoiceItem>,
{
    let mut total_value = BigDecimal::zero();
    let mut designated_value = BigDecimal::zero();
    for item in items {
        total_value += item.total_value();
        if let Some(designated) = &item.designated_quantity {
            designated_value += designated * &item.unit_value;
        }
    }

    let online_value = match mode {
        AllocationMode::StoreOnly => BigDecimal::zero(),
        AllocationMode::OnlineOnly => total_value.clone(),
        AllocationMode::Partial => designated_value,
    };

    let online_percentage = if total_value.is_zero() {
        BigDecimal::zero()
    } else {
        match mode {
            AllocationMode::StoreOnly => BigDecimal::zero(),
            AllocationMode::OnlineOnly => hundred(),
            AllocationMode::Partial => &online_value / &total_value * hundred(),
        }
    };
    let online_percentage = round2(&online_percentage);
    let store_percentage = round2(&(hundred() - &online_percentage));

    AllocationSummary {
        mode,
        total_value: round2(&total_value),
        online_value: round2(&online_value),
        online_percentage,
        store_percentage,
    }
}

/// 单行门店/线上数量
pub fn channel_line(mode: AllocationMode, item: &InvoiceItem) -> ChannelLine {
    let online_quantity = match mode {
        AllocationMode::StoreOnly => BigDecimal::zero(),
        AllocationMode::OnlineOnly => item.quantity.clone(),
        AllocationMode::Partial => item
            .designated_quantity
            .clone()
            .unwrap_or_else(BigDecimal::zero),
    };
    ChannelLine {
        item_id: item.id,
        product_id: item.link.as_ref().map(|l| l.product_id),
        store_quantity: &item.quantity - &online_quantity,
        online_quantity,
    }
}

pub fn channel_breakdown<'a, I>(mode: AllocationMode, items: I) -> Vec<ChannelLine>
where
    I: IntoIterator<Item = &'a InvoiceItem>,
{
    items
        .into_iter()
        .map(|item| channel_line(mode, item))
        .collect()
}

/// 0 <= designated <= quantity
pub fn validate_designation(
    item: &InvoiceItem,
    designated: &BigDecimal,
) -> Result<(), ValidationErrors> {
    let field = format!("items[{}].designated_quantity", item.line_number);
    if *designated < BigDecimal::zero() {
        return Err(ValidationErrors::single(field, "must not be negative"));
    }
    if *designated > item.quantity {
        return Err(ValidationErrors::single(
            field,
            format!("must not exceed the received quantity {}", item.quantity),
        ));
    }
    Ok(())
}
