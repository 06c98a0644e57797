//! ISBN normalization and check-digit validation
//!
//! Mirrors the cleaning the import tooling applies before rows reach the
//! ratings and books tables, so keys from both relations compare equal.

/// Strip hyphens, spaces and double quotes
pub fn clean_isbn(isbn: &str) -> String {
    isbn.chars()
        .filter(|c| !matches!(c, '-' | ' ' | '"'))
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn is_valid_isbn10(isbn: &str) -> bool {
    let bytes = isbn.as_bytes();
    if bytes.len() != 10 || !bytes[..9].iter().all(u8::is_ascii_digit) {
        return false;
    }

    let mut total: u32 = bytes[..9]
        .iter()
        .enumerate()
        .map(|(i, b)| (i as u32 + 1) * u32::from(b - b'0'))
        .sum();

    match bytes[9] {
        b'X' | b'x' => total += 10 * 10,
        d if d.is_ascii_digit() => total += 10 * u32::from(d - b'0'),
        _ => return false,
    }

    total % 11 == 0
}

pub fn is_valid_isbn13(isbn: &str) -> bool {
    let bytes = isbn.as_bytes();
    if bytes.len() != 13 || !bytes.iter().all(u8::is_ascii_digit) {
        return false;
    }

    let total: u32 = bytes[..12]
        .iter()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * if i % 2 == 0 { 1 } else { 3 })
        .sum();
    let check_digit = (10 - (total % 10)) % 10;

    check_digit == u32::from(bytes[12] - b'0')
}

/// Validate a raw ISBN-10 or ISBN-13 after cleaning
pub fn is_valid_isbn(isbn: &str) -> bool {
    let cleaned = clean_isbn(isbn);
    is_valid_isbn10(&cleaned) || is_valid_isbn13(&cleaned)
}
