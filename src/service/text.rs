//! 文本归一化: 匹配器、差异检测和编码建议共用

/// 小写并去掉葡语重音
pub fn fold(text: &str) -> String {
    text.to_lowercase().chars().map(fold_char).collect()
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// fold + 标点转空格 + 压缩空白
pub fn normalize(text: &str) -> String {
    let replaced: String = fold(text)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn tokens(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// 用于候选检索的 token: 长度 >= 3 或含数字
pub fn significant_tokens(text: &str) -> Vec<String> {
    let mut out: Vec<String> = tokens(text)
        .into_iter()
        .filter(|t| t.len() >= 3 || t.chars().any(|c| c.is_ascii_digit()))
        .collect();
    out.dedup();
    out
}
