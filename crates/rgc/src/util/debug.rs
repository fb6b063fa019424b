//! Debug Utilities
//!
//! Formatting helpers for dumps and log lines.

/// Format an address the way region dumps print it
pub fn format_address(address: usize) -> String {
    format!("{:#x}", address)
}

/// Human-readable byte size (`PrettySize` style: B, KB, MB, GB)
pub fn pretty_size(bytes: usize) -> String {
    const UNITS: [(usize, &str); 3] = [(1 << 30, "GB"), (1 << 20, "MB"), (1 << 10, "KB")];

    for (unit, suffix) in UNITS {
        if bytes >= unit && bytes % unit == 0 {
            return format!("{}{}", bytes / unit, suffix);
        }
    }
    for (unit, suffix) in UNITS {
        if bytes >= unit {
            return format!("{:.1}{}", bytes as f64 / unit as f64, suffix);
        }
    }
    format!("{}B", bytes)
}
