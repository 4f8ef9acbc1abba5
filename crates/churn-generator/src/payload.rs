//! Fixed-size payload strings.

/// One-byte unit the payload is built from.
pub const PAYLOAD_UNIT: &str = "y";

/// Build `count` copies of `unit`.
///
/// `str::repeat` fills the buffer by doubling, so a 2000-byte payload costs a
/// handful of copies rather than 2000.
pub fn repeat_unit(unit: &str, count: usize) -> String {
    unit.repeat(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(repeat_unit("y", 0), "");
        assert_eq!(repeat_unit("", 10), "");
    }

    #[test]
    fn test_seven() {
        assert_eq!(repeat_unit("y", 7), "yyyyyyy");
    }

    #[test]
    fn test_lengths() {
        for n in [1, 2, 500, 1000, 1023, 1024, 1025, 2000] {
            assert_eq!(repeat_unit(PAYLOAD_UNIT, n).len(), n);
        }
    }

    #[test]
    fn test_multibyte_unit() {
        assert_eq!(repeat_unit("ab", 3), "ababab");
        assert_eq!(repeat_unit("é", 5), "ééééé");
    }
}
