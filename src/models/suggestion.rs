use serde::{Deserialize, Serialize};

/// 候选编码
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCandidate {
    pub code: String,
    pub recommended: bool,
}

/// 商品编码建议 (按需计算, 不持久化)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSuggestion {
    pub primary: String,
    pub collision: bool,
    pub alternatives: Vec<CodeCandidate>,
}

impl CodeSuggestion {
    /// 无冲突时为主编码, 否则为被推荐的备选
    pub fn recommended_code(&self) -> &str {
        if !self.collision {
            return &self.primary;
        }
        self.alternatives
            .iter()
            .find(|c| c.recommended)
            .map(|c| c.code.as_str())
            .unwrap_or(&self.primary)
    }
}
