//! 文本规范化：大写、去重音、压缩空白

use phf::phf_map;

static ACCENT_FOLD: phf::Map<char, char> = phf_map! {
    'Á' => 'A', 'À' => 'A', 'Ä' => 'A', 'Â' => 'A',
    'É' => 'E', 'È' => 'E', 'Ë' => 'E', 'Ê' => 'E',
    'Í' => 'I', 'Ì' => 'I', 'Ï' => 'I', 'Î' => 'I',
    'Ó' => 'O', 'Ò' => 'O', 'Ö' => 'O', 'Ô' => 'O',
    'Ú' => 'U', 'Ù' => 'U', 'Ü' => 'U', 'Û' => 'U',
    'Ñ' => 'N',
};

/// 规范化提取出的文本，便于关键词匹配
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;

    for ch in text.chars().flat_map(char::to_uppercase) {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
            continue;
        }
        out.push(ACCENT_FOLD.get(&ch).copied().unwrap_or(ch));
        last_was_space = false;
    }

    if out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(
            normalize_text("  Historia  clínica\n\tNota Crédito "),
            "HISTORIA CLINICA NOTA CREDITO"
        );
        assert_eq!(normalize_text("Atención domiciliaria Año"), "ATENCION DOMICILIARIA ANO");
        assert_eq!(normalize_text(""), "");
    }
}
