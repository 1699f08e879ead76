//! String formatting utilities.

/// Truncates an identifier for log output.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((cut, _)) => format!("{}..", &id[..cut]),
		None => id.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("A-1001"), "A-1001");
		assert_eq!(truncate_id("12345678"), "12345678");
		assert_eq!(truncate_id("order-2024-05-01-0042"), "order-20..");
	}
}
