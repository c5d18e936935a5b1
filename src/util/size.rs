//! Binary size units and formatting.

#[inline]
pub const fn kib(n: usize) -> usize {
    n << 10
}

#[inline]
pub const fn mib(n: usize) -> usize {
    n << 20
}

#[inline]
pub const fn gib(n: usize) -> usize {
    n << 30
}

/// Format a byte count with the largest binary unit that keeps it >= 1.
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for u in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = u;
    }
    format!("{:.2} {}", value, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(kib(4), 4096);
        assert_eq!(mib(1), 1 << 20);
        assert_eq!(gib(1), 1 << 30);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(17), "17 B");
        assert_eq!(format_bytes(kib(64)), "64.00 KiB");
        assert_eq!(format_bytes(mib(16) + mib(8)), "24.00 MiB");
        assert_eq!(format_bytes(gib(1)), "1.00 GiB");
    }
}
