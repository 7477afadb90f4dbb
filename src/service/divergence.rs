//! 发票描述与商品描述的语义差异检测 (规格/颜色/口味/物种)。
//!
//! 只做标注, 不阻止关联; 复核人在提交前看到提示即可。

use bigdecimal::BigDecimal;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use super::text;
use crate::models::{Divergence, DivergenceCategory, Severity};

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:[.,]\d+)?)\s*(kgs?|grs?|g|mg|ml|lts?|l|unidades?|unids?|und|un|pcs?|cx)\b")
        .expect("SIZE_RE is a valid regex pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Species {
    Canine,
    Feline,
}

/// 规格 token: amount + unit 用于比较 (统一到 g / ml), label 用于展示
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SizeToken {
    pub amount: BigDecimal,
    pub unit: &'static str,
    pub label: String,
}

/// 从一段描述中提取出的语义 token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedTokens {
    pub sizes: BTreeSet<SizeToken>,
    pub colors: BTreeSet<String>,
    pub flavors: BTreeSet<String>,
    pub species: BTreeSet<Species>,
}

impl SizeToken {
    /// 件数/箱数, 与重量/容量分开比较
    fn is_count(&self) -> bool {
        matches!(self.unit, "un" | "cx")
    }
}

impl ExtractedTokens {
    fn size_keys(&self, counts: bool) -> BTreeSet<(&BigDecimal, &str)> {
        self.sizes
            .iter()
            .filter(|s| s.is_count() == counts)
            .map(|s| (&s.amount, s.unit))
            .collect()
    }

    fn size_label(&self, counts: bool) -> String {
        self.sizes
            .iter()
            .filter(|s| s.is_count() == counts)
            .map(|s| s.label.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// 只识别出单一物种时返回该物种
    fn single_species(&self) -> Option<Species> {
        let mut iter = self.species.iter();
        match (iter.next(), iter.next()) {
            (Some(s), None) => Some(*s),
            _ => None,
        }
    }
}

/// token 提取策略, 可替换词表或实现
pub trait TokenExtractor: Send + Sync {
    fn extract_tokens(&self, text: &str) -> ExtractedTokens;
}

/// 词表: 变体 -> 标准词
#[derive(Debug, Clone)]
pub struct Vocabulary {
    pub colors: HashMap<String, String>,
    pub flavors: HashMap<String, String>,
    pub canine: Vec<String>,
    pub feline: Vec<String>,
}

/// 每组 "标准词 变体1 变体2 ..."
fn groups(entries: &[&str]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for entry in entries {
        let mut words = entry.split_whitespace();
        let Some(canonical) = words.next() else {
            continue;
        };
        map.insert(canonical.to_string(), canonical.to_string());
        for variant in words {
            map.insert(variant.to_string(), canonical.to_string());
        }
    }
    map
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            colors: groups(&[
                "preto preta black",
                "branco branca white",
                "azul blue",
                "vermelho vermelha red",
                "verde green",
                "amarelo amarela yellow",
                "rosa pink",
                "roxo roxa purple",
                "laranja orange",
                "cinza grey gray",
                "marrom brown",
                "bege",
                "dourado dourada",
                "prateado prateada",
                "lilas",
            ]),
            flavors: groups(&[
                "carne beef bovina",
                "frango chicken",
                "peixe peixes fish",
                "salmao salmon",
                "atum tuna",
                "cordeiro lamb",
                "peru turkey",
                "figado",
                "bacon",
                "queijo",
                "vegetais legumes",
            ]),
            canine: ["cao", "caes", "cachorro", "cachorros", "canino", "canina", "caninos", "dog", "dogs"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            feline: ["gato", "gatos", "gata", "felino", "felina", "felinos", "cat", "cats"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// 默认实现: 正则取规格, 词表取颜色/口味/物种
#[derive(Debug, Clone, Default)]
pub struct VocabularyExtractor {
    vocabulary: Vocabulary,
}

impl VocabularyExtractor {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }
}

/// 统一到基本单位: kg -> g, mg -> g, l -> ml, 计件单位 -> un
fn canonical_size(amount: &str, unit: &str) -> Option<(BigDecimal, &'static str)> {
    let amount = BigDecimal::from_str(&amount.replace(',', ".")).ok()?;
    let (factor, base) = match unit {
        "kg" | "kgs" => (BigDecimal::from(1000), "g"),
        "g" | "gr" | "grs" => (BigDecimal::from(1), "g"),
        "mg" => (BigDecimal::from_str("0.001").ok()?, "g"),
        "l" | "lt" | "lts" => (BigDecimal::from(1000), "ml"),
        "ml" => (BigDecimal::from(1), "ml"),
        "cx" => (BigDecimal::from(1), "cx"),
        _ => (BigDecimal::from(1), "un"),
    };
    Some((amount * factor, base))
}

impl TokenExtractor for VocabularyExtractor {
    fn extract_tokens(&self, input: &str) -> ExtractedTokens {
        let mut tokens = ExtractedTokens::default();

        let folded = text::fold(input);
        for cap in SIZE_RE.captures_iter(&folded) {
            let (Some(amount), Some(unit)) = (cap.get(1), cap.get(2)) else {
                continue;
            };
            if let Some((value, base)) = canonical_size(amount.as_str(), unit.as_str()) {
                tokens.sizes.insert(SizeToken {
                    amount: value,
                    unit: base,
                    label: format!("{}{}", amount.as_str(), unit.as_str()),
                });
            }
        }

        for word in text::tokens(input) {
            if let Some(color) = self.vocabulary.colors.get(&word) {
                tokens.colors.insert(color.clone());
            }
            if let Some(flavor) = self.vocabulary.flavors.get(&word) {
                tokens.flavors.insert(flavor.clone());
            }
            if self.vocabulary.canine.contains(&word) {
                tokens.species.insert(Species::Canine);
            }
            if self.vocabulary.feline.contains(&word) {
                tokens.species.insert(Species::Feline);
            }
        }

        tokens
    }
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn species_label(species: Species) -> String {
    match species {
        Species::Canine => "canine".to_string(),
        Species::Feline => "feline".to_string(),
    }
}

/// 差异检测器
#[derive(Clone)]
pub struct DivergenceDetector {
    extractor: Arc<dyn TokenExtractor>,
}

impl Default for DivergenceDetector {
    fn default() -> Self {
        Self::new(Arc::new(VocabularyExtractor::default()))
    }
}

impl DivergenceDetector {
    pub fn new(extractor: Arc<dyn TokenExtractor>) -> Self {
        Self { extractor }
    }

    /// 结果按严重程度从高到低排列
    pub fn detect(&self, invoice_text: &str, product_text: &str) -> Vec<Divergence> {
        let invoice = self.extractor.extract_tokens(invoice_text);
        let product = self.extractor.extract_tokens(product_text);
        let mut found = Vec::new();

        // 重量/容量一组, 件数一组; 只有两边都有同组 token 时才比较
        for counts in [false, true] {
            let (a, b) = (invoice.size_keys(counts), product.size_keys(counts));
            if !a.is_empty() && !b.is_empty() && a != b {
                found.push(Divergence {
                    category: DivergenceCategory::Size,
                    severity: Severity::High,
                    invoice_value: invoice.size_label(counts),
                    product_value: product.size_label(counts),
                });
            }
        }

        if !invoice.colors.is_empty() && !product.colors.is_empty() && invoice.colors != product.colors {
            found.push(Divergence {
                category: DivergenceCategory::Color,
                severity: Severity::Medium,
                invoice_value: join(&invoice.colors),
                product_value: join(&product.colors),
            });
        }

        if !invoice.flavors.is_empty()
            && !product.flavors.is_empty()
            && invoice.flavors != product.flavors
        {
            found.push(Divergence {
                category: DivergenceCategory::Flavor,
                severity: Severity::High,
                invoice_value: join(&invoice.flavors),
                product_value: join(&product.flavors),
            });
        }

        if let (Some(a), Some(b)) = (invoice.single_species(), product.single_species()) {
            if a != b {
                found.push(Divergence {
                    category: DivergenceCategory::Species,
                    severity: Severity::Critical,
                    invoice_value: species_label(a),
                    product_value: species_label(b),
                });
            }
        }

        found.sort_by(|a, b| b.severity.cmp(&a.severity));
        found
    }
}
