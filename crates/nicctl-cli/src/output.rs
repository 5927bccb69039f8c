//! Formatted output helpers for CLI commands.

/// Column header for link listings.
#[must_use]
pub fn link_header() -> String {
    format!("{:>6}  {}", "INDEX", "NAME")
}

/// One row of a link listing.
#[must_use]
pub fn link_row(index: u32, name: &str) -> String {
    format!("{index:>6}  {name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_rows_align() {
        assert_eq!(link_header(), " INDEX  NAME");
        assert_eq!(link_row(12, "tor_vlan100"), "    12  tor_vlan100");
    }

    #[test]
    fn wide_indices_are_not_truncated() {
        assert_eq!(link_row(1_234_567, "eth0"), "1234567  eth0");
    }
}
