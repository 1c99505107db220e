//! Display helpers for amounts and addresses in rendered answers.

/// Decimal places used by [`format_number`].
pub const DECIMAL_PLACES: usize = 2;

/// Characters kept on each side of a shortened address.
pub const SHORT_ADDRESS_LENGTH: usize = 6;

/// Compact a quantity with a B/M/K suffix: `1234567.0` → `1.23M`.
pub fn format_number(value: f64) -> String {
    format_number_with(value, DECIMAL_PLACES)
}

pub fn format_number_with(value: f64, decimals: usize) -> String {
    let abs = value.abs();
    if abs >= 1_000_000_000.0 {
        format!("{:.decimals$}B", value / 1_000_000_000.0)
    } else if abs >= 1_000_000.0 {
        format!("{:.decimals$}M", value / 1_000_000.0)
    } else if abs >= 1_000.0 {
        format!("{:.decimals$}K", value / 1_000.0)
    } else {
        format!("{value:.decimals$}")
    }
}

/// Shorten a long hex address to `0x88e6...3f5640`. Short inputs pass through.
pub fn format_address(address: &str) -> String {
    if address.len() < 10 || !address.is_ascii() {
        return address.to_string();
    }
    let n = SHORT_ADDRESS_LENGTH.min(address.len() / 2);
    format!("{}...{}", &address[..n], &address[address.len() - n..])
}

/// Fee tier in hundredths of a basis point (`3000`) as a percentage string (`0.3%`).
pub fn format_fee_tier(raw: f64) -> String {
    let pct = raw / 10_000.0;
    let mut s = format!("{pct:.4}");
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    format!("{s}%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_suffixes() {
        assert_eq!(format_number(999.5), "999.50");
        assert_eq!(format_number(1_500.0), "1.50K");
        assert_eq!(format_number(2_345_678.0), "2.35M");
        assert_eq!(format_number(7_100_000_000.0), "7.10B");
        assert_eq!(format_number_with(1_000_000.0, 0), "1M");
    }

    #[test]
    fn address_shortening() {
        assert_eq!(
            format_address("0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640"),
            "0x88e6...3f5640"
        );
        assert_eq!(format_address("0xabc"), "0xabc");
        assert_eq!(format_address(""), "");
    }

    #[test]
    fn fee_tiers() {
        assert_eq!(format_fee_tier(100.0), "0.01%");
        assert_eq!(format_fee_tier(500.0), "0.05%");
        assert_eq!(format_fee_tier(3000.0), "0.3%");
        assert_eq!(format_fee_tier(10000.0), "1%");
    }
}
