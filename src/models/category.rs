use serde::{Deserialize, Serialize};

/// 发票支持文件的固定分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    /// 居家护理记录（含表格续页）
    #[serde(rename = "CRC")]
    Crc,
    /// 电子销售发票 + 费用明细 + 贷项通知单
    #[serde(rename = "FEV")]
    Fev,
    /// 临床病历 + 社工记录 + 护理活动记录
    #[serde(rename = "HEV")]
    Hev,
    /// 医嘱 / 医疗决定
    #[serde(rename = "OPF")]
    Opf,
    /// 服务授权
    #[serde(rename = "PDE")]
    Pde,
}

impl Category {
    /// 输出顺序（与文件名前缀一致）
    pub const ALL: [Category; 5] = [
        Category::Crc,
        Category::Fev,
        Category::Hev,
        Category::Opf,
        Category::Pde,
    ];

    /// 获取分类代码
    pub fn code(self) -> &'static str {
        match self {
            Category::Crc => "CRC",
            Category::Fev => "FEV",
            Category::Hev => "HEV",
            Category::Opf => "OPF",
            Category::Pde => "PDE",
        }
    }

    /// 从代码解析分类（忽略大小写和首尾空白）
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "CRC" => Some(Category::Crc),
            "FEV" => Some(Category::Fev),
            "HEV" => Some(Category::Hev),
            "OPF" => Some(Category::Opf),
            "PDE" => Some(Category::Pde),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip_and_serde_names() {
        for category in Category::ALL {
            assert_eq!(Category::from_code(category.code()), Some(category));
        }
        assert_eq!(Category::from_code(" fev "), Some(Category::Fev));
        assert_eq!(Category::from_code("SIN"), None);

        let json = serde_json::to_string(&Category::Hev).unwrap();
        assert_eq!(json, "\"HEV\"");
    }
}
