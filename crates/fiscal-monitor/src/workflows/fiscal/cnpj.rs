//! Helpers for the 14-digit Brazilian company registration number (CNPJ).

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Strips punctuation, keeping ASCII digits only.
pub fn digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Checks length, rejects repeated-digit sequences, and verifies both check digits.
pub fn is_valid(raw: &str) -> bool {
    let values: Vec<u32> = digits(raw).chars().filter_map(|c| c.to_digit(10)).collect();
    if values.len() != 14 {
        return false;
    }
    if values.iter().all(|value| *value == values[0]) {
        return false;
    }

    check_digit(&values[..12], &FIRST_WEIGHTS) == values[12]
        && check_digit(&values[..13], &SECOND_WEIGHTS) == values[13]
}

fn check_digit(values: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = values
        .iter()
        .zip(weights)
        .map(|(value, weight)| value * weight)
        .sum();
    let remainder = sum % 11;
    if remainder < 2 {
        0
    } else {
        11 - remainder
    }
}

/// `00000000000000` -> `00.000.000/0000-00`; anything that is not 14 digits is returned as-is.
pub fn format(raw: &str) -> String {
    let c = digits(raw);
    if c.len() != 14 {
        return raw.to_string();
    }
    format!(
        "{}.{}.{}/{}-{}",
        &c[0..2],
        &c[2..5],
        &c[5..8],
        &c[8..12],
        &c[12..]
    )
}

/// `00.XXX.XXX/0000-XX`, keeping only the prefix and branch number.
pub fn mask(raw: &str) -> String {
    let c = digits(raw);
    if c.len() != 14 {
        return "invalid-cnpj".to_string();
    }
    format!("{}.XXX.XXX/{}-XX", &c[0..2], &c[8..12])
}
