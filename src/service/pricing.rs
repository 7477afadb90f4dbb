//! 成本/售价/毛利计算, 全部为纯函数。
//!
//! 金额与百分比统一四舍五入到两位小数。

use bigdecimal::{BigDecimal, Zero};

use crate::models::{PriceOverride, PriceRevision, Pricing, Product};

fn hundred() -> BigDecimal {
    BigDecimal::from(100)
}

/// 两位小数, 四舍五入
pub fn round2(value: &BigDecimal) -> BigDecimal {
    value.round(2).with_scale(2)
}

/// 毛利率 = (售价 - 成本) / 售价 * 100, 售价 <= 0 时为 0
pub fn margin(price: &BigDecimal, cost: &BigDecimal) -> BigDecimal {
    if *price <= BigDecimal::zero() {
        return round2(&BigDecimal::zero());
    }
    round2(&((price - cost) / price * hundred()))
}

/// 加价率 = (售价 - 成本) / 成本 * 100, 成本 <= 0 时为 0
pub fn markup(price: &BigDecimal, cost: &BigDecimal) -> BigDecimal {
    if *cost <= BigDecimal::zero() {
        return round2(&BigDecimal::zero());
    }
    round2(&((price - cost) / cost * hundred()))
}

/// 报表用名称, 与 markup 相同
pub fn roi(price: &BigDecimal, cost: &BigDecimal) -> BigDecimal {
    markup(price, cost)
}

/// 按目标毛利反推售价; 毛利 >= 100 时取成本的两倍
pub fn price_from_margin(cost: &BigDecimal, margin: &BigDecimal) -> BigDecimal {
    if *margin >= hundred() {
        return round2(&(cost * BigDecimal::from(2)));
    }
    let divisor = BigDecimal::from(1) - margin / hundred();
    round2(&(cost / divisor))
}

/// 成本漂移百分比, 旧成本为 0 时记为 0
pub fn cost_drift(old_cost: &BigDecimal, new_cost: &BigDecimal) -> BigDecimal {
    if old_cost.is_zero() {
        return round2(&BigDecimal::zero());
    }
    round2(&((new_cost - old_cost) / old_cost * hundred()))
}

/// 数量加权平均单价
pub fn weighted_unit_cost(lines: &[(BigDecimal, BigDecimal)]) -> BigDecimal {
    let mut total_quantity = BigDecimal::zero();
    let mut total_value = BigDecimal::zero();
    for (quantity, unit_value) in lines {
        total_quantity += quantity;
        total_value += quantity * unit_value;
    }
    if total_quantity.is_zero() {
        return round2(&BigDecimal::zero());
    }
    round2(&(total_value / total_quantity))
}

/// 由成本和售价得到一致的价格三元组
pub fn pricing_from_price(cost: &BigDecimal, price: &BigDecimal) -> Pricing {
    Pricing {
        cost_price: round2(cost),
        sale_price: round2(price),
        margin: margin(price, cost),
    }
}

/// 由成本和毛利得到一致的价格三元组 (毛利按反推后的售价重算)
pub fn pricing_from_margin(cost: &BigDecimal, target_margin: &BigDecimal) -> Pricing {
    let price = price_from_margin(cost, target_margin);
    pricing_from_price(cost, &price)
}

/// 为一个已关联商品生成价格复核: 保持原毛利不变, 原售价为 0 时用默认毛利
///
/// `lines` 为链接到该商品的所有明细 (数量, 单价)。
pub fn propose_revision(
    product: &Product,
    lines: &[(BigDecimal, BigDecimal)],
    default_margin: &BigDecimal,
) -> PriceRevision {
    let previous_cost = round2(&product.cost_price);
    let previous_price = round2(&product.sale_price);
    let previous_margin = margin(&previous_price, &previous_cost);

    let target_margin = if previous_price <= BigDecimal::zero() {
        default_margin.clone()
    } else {
        previous_margin.clone()
    };

    let new_cost = weighted_unit_cost(lines);
    let proposed = pricing_from_margin(&new_cost, &target_margin);
    let quantity = lines
        .iter()
        .fold(BigDecimal::zero(), |acc, (quantity, _)| acc + quantity);

    PriceRevision {
        product_id: product.id,
        product_code: product.code.clone(),
        product_name: product.name.clone(),
        quantity,
        cost_drift: cost_drift(&previous_cost, &new_cost),
        previous_cost,
        previous_price,
        previous_margin,
        new_cost: proposed.cost_price,
        new_price: proposed.sale_price,
        new_margin: proposed.margin,
    }
}

impl PriceRevision {
    /// 复核人改售价, 毛利随之重算
    pub fn with_sale_price(mut self, price: &BigDecimal) -> Self {
        let pricing = pricing_from_price(&self.new_cost, price);
        self.new_price = pricing.sale_price;
        self.new_margin = pricing.margin;
        self
    }

    /// 复核人改毛利, 售价随之重算
    pub fn with_margin(mut self, target_margin: &BigDecimal) -> Self {
        let pricing = pricing_from_margin(&self.new_cost, target_margin);
        self.new_price = pricing.sale_price;
        self.new_margin = pricing.margin;
        self
    }

    /// 售价优先; 都为空则原样返回
    pub fn apply_override(self, price_override: &PriceOverride) -> Self {
        match (&price_override.sale_price, &price_override.margin) {
            (Some(price), _) => self.with_sale_price(price),
            (None, Some(target)) => self.with_margin(target),
            (None, None) => self,
        }
    }

    pub fn new_pricing(&self) -> Pricing {
        Pricing {
            cost_price: self.new_cost.clone(),
            sale_price: self.new_price.clone(),
            margin: self.new_margin.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn product(cost: &str, price: &str) -> Product {
        Product {
            id: 1,
            code: "RAC-15".into(),
            name: "Ração Cão Adulto 15kg".into(),
            barcode: None,
            cost_price: dec(cost),
            sale_price: dec(price),
            margin: margin(&dec(price), &dec(cost)),
        }
    }

    #[test]
    fn half_margin_doubles_cost() {
        let cost = dec("10.00");
        let price = price_from_margin(&cost, &dec("50"));
        assert_eq!(price, dec("20.00"));
        assert_eq!(margin(&price, &cost), dec("50.00"));
        assert_eq!(markup(&price, &cost), dec("100.00"));
        assert_eq!(roi(&price, &cost), dec("100.00"));
    }

    #[test]
    fn fifteen_over_ten() {
        let cost = dec("10.00");
        let price = dec("15.00");
        assert_eq!(margin(&price, &cost), dec("33.33"));
        assert_eq!(markup(&price, &cost), dec("50.00"));
        assert_eq!(roi(&price, &cost), dec("50.00"));
    }

    #[test]
    fn degenerate_inputs_yield_zero() {
        assert_eq!(margin(&dec("0"), &dec("10")), dec("0"));
        assert_eq!(markup(&dec("10"), &dec("0")), dec("0"));
        assert_eq!(price_from_margin(&dec("10"), &dec("100")), dec("20.00"));
        assert_eq!(price_from_margin(&dec("10"), &dec("150")), dec("20.00"));
    }

    #[test]
    fn margin_round_trips_through_price() {
        for cost in ["1.00", "10.00", "37.50", "120.00", "999.99"] {
            for target in ["-10", "0", "12.5", "25", "33.33", "50", "75.5", "90"] {
                let cost = dec(cost);
                let target = dec(target);
                let price = price_from_margin(&cost, &target);
                let back = margin(&price, &cost);
                let diff = (&back - &target).abs();
                assert!(
                    diff <= dec("0.5"),
                    "cost {} margin {} -> price {} -> margin {}",
                    cost,
                    target,
                    price,
                    back
                );
            }
        }
    }

    #[test]
    fn drift_is_relative_to_old_cost() {
        assert_eq!(cost_drift(&dec("10.00"), &dec("12.00")), dec("20.00"));
        assert_eq!(cost_drift(&dec("10.00"), &dec("8.00")), dec("-20.00"));
        assert_eq!(cost_drift(&dec("0"), &dec("12.00")), dec("0"));
    }

    #[test]
    fn revision_keeps_previous_margin() {
        let p = product("10.00", "20.00");
        let rev = propose_revision(&p, &[(dec("5"), dec("12.00"))], &dec("30"));
        assert_eq!(rev.previous_margin, dec("50.00"));
        assert_eq!(rev.new_cost, dec("12.00"));
        assert_eq!(rev.new_price, dec("24.00"));
        assert_eq!(rev.new_margin, dec("50.00"));
        assert_eq!(rev.cost_drift, dec("20.00"));
        assert_eq!(rev.quantity, dec("5"));
    }

    #[test]
    fn revision_for_unpriced_product_uses_default_margin() {
        let p = product("0", "0");
        let rev = propose_revision(&p, &[(dec("1"), dec("7.00"))], &dec("30"));
        assert_eq!(rev.new_price, dec("10.00"));
        assert_eq!(rev.cost_drift, dec("0"));
    }

    #[test]
    fn several_lines_use_weighted_cost() {
        let cost = weighted_unit_cost(&[(dec("10"), dec("10.00")), (dec("30"), dec("14.00"))]);
        assert_eq!(cost, dec("13.00"));
    }

    #[test]
    fn overrides_recompute_the_other_field() {
        let p = product("10.00", "20.00");
        let rev = propose_revision(&p, &[(dec("1"), dec("10.00"))], &dec("30"));

        let by_price = rev.clone().apply_override(&PriceOverride {
            product_id: 1,
            sale_price: Some(dec("25.00")),
            margin: Some(dec("10")),
        });
        assert_eq!(by_price.new_price, dec("25.00"));
        assert_eq!(by_price.new_margin, dec("60.00"));

        let by_margin = rev.apply_override(&PriceOverride {
            product_id: 1,
            sale_price: None,
            margin: Some(dec("60")),
        });
        assert_eq!(by_margin.new_price, dec("25.00"));
        assert_eq!(by_margin.new_margin, dec("60.00"));
    }
}
