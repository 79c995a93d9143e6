use std::num::ParseIntError;

fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

pub(crate) fn u16_from_hex(value: &str) -> Result<u16, ParseIntError> {
    u16::from_str_radix(strip_hex_prefix(value), 16)
}

pub(crate) fn u32_from_hex(value: &str) -> Result<u32, ParseIntError> {
    u32::from_str_radix(strip_hex_prefix(value), 16)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_with_and_without_prefix() {
        assert_eq!(u16_from_hex("0x2230"), Ok(0x2230));
        assert_eq!(u16_from_hex("0X2230"), Ok(0x2230));
        assert_eq!(u16_from_hex("2230"), Ok(0x2230));
        assert_eq!(u32_from_hex("0xFFFFFFFF"), Ok(u32::MAX));
        assert!(u16_from_hex("0x12345").is_err());
    }
}
