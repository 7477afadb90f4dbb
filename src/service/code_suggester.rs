//! 商品编码建议: 把供应商编码规整为目录编码格式, 冲突时生成备选。
//!
//! 相同输入总是得到相同建议。

use std::collections::HashSet;

use super::text;
use crate::models::{CodeCandidate, CodeSuggestion};

pub const MAX_CODE_LEN: usize = 20;
const FALLBACK_CODE: &str = "ITEM";

/// 大写字母数字, 其余分隔符统一为 '-'
pub fn normalize_code(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in text::fold(raw).chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    trimmed.chars().take(MAX_CODE_LEN).collect::<String>().trim_end_matches('-').to_string()
}

/// 无供应商编码时由描述生成: 前三个有效词各取前三个字母
pub fn fallback_code(description: &str) -> String {
    let parts: Vec<String> = text::significant_tokens(description)
        .into_iter()
        .filter(|t| t.chars().all(|c| c.is_ascii_alphabetic()))
        .take(3)
        .map(|t| t.chars().take(3).collect::<String>().to_ascii_uppercase())
        .collect();
    if parts.is_empty() {
        return FALLBACK_CODE.to_string();
    }
    parts.join("-")
}

/// 供应商限定词: 供应商名称首个词的前三个字母
pub fn supplier_qualifier(supplier_name: &str) -> String {
    let code = normalize_code(supplier_name);
    let first = code.split('-').next().unwrap_or_default();
    first.chars().take(3).collect()
}

/// 主编码: 优先规整后的供应商编码, 否则用描述生成
pub fn primary_code(supplier_code: Option<&str>, description: &str) -> String {
    supplier_code
        .map(normalize_code)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| fallback_code(description))
}

/// 主编码后接后缀, 超长时截短主编码, 总长不超过 MAX_CODE_LEN
fn with_suffix(primary: &str, suffix: &str) -> String {
    let room = MAX_CODE_LEN.saturating_sub(suffix.len());
    let base: String = primary.chars().take(room).collect();
    format!("{}{}", base.trim_end_matches('-'), suffix)
}

/// 主编码未被占用时直接使用; 否则依次尝试 `主编码-限定词`, `主编码-限定词-2`, ...
/// 直到找到未占用编码, 该编码标记为推荐。
pub fn suggest(primary: &str, qualifier: &str, existing: &HashSet<String>) -> CodeSuggestion {
    if !existing.contains(primary) {
        return CodeSuggestion {
            primary: primary.to_string(),
            collision: false,
            alternatives: Vec::new(),
        };
    }

    let mut alternatives = Vec::new();
    let mut n: u32 = if qualifier.is_empty() { 2 } else { 1 };
    loop {
        let suffix = match (qualifier.is_empty(), n) {
            (true, _) => format!("-{}", n),
            (false, 1) => format!("-{}", qualifier),
            (false, _) => format!("-{}-{}", qualifier, n),
        };
        n += 1;
        let code = with_suffix(primary, &suffix);
        if code == primary || alternatives.iter().any(|c: &CodeCandidate| c.code == code) {
            continue;
        }
        let free = !existing.contains(&code);
        alternatives.push(CodeCandidate {
            code,
            recommended: free,
        });
        if free {
            break;
        }
    }

    CodeSuggestion {
        primary: primary.to_string(),
        collision: true,
        alternatives,
    }
}
