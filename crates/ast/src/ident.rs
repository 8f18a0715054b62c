/// Reserved words of Lua 5.4.
pub const KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Whether `name` can be written as a bare Lua name (`t.name`, `name = v`).
pub fn is_identifier(name: &[u8]) -> bool {
    let Some((&first, rest)) = name.split_first() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return false;
    }
    if !rest.iter().all(|&b| b.is_ascii_alphanumeric() || b == b'_') {
        return false;
    }
    // Only ASCII remains at this point.
    let text = std::str::from_utf8(name).unwrap_or_default();
    !KEYWORDS.contains(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers() {
        assert!(is_identifier(b"print"));
        assert!(is_identifier(b"_ENV"));
        assert!(is_identifier(b"x1"));
        assert!(!is_identifier(b""));
        assert!(!is_identifier(b"1x"));
        assert!(!is_identifier(b"a-b"));
        assert!(!is_identifier(b"(for state)"));
        assert!(!is_identifier(b"goto"));
        assert!(!is_identifier(b"end"));
    }
}
