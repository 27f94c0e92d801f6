pub const LEVELS: [&str; 4] = ["low", "moderate", "high", "severe"];

/// Converts a row stress (0.0–1.0) into a level band.
///
/// | Range       | Level    |
/// |-------------|----------|
/// | >= 0.75     | severe   |
/// | >= 0.50     | high     |
/// | >= 0.25     | moderate |
/// | < 0.25      | low      |
pub fn level(stress: f64) -> &'static str {
    match stress {
        s if s >= 0.75 => "severe",
        s if s >= 0.50 => "high",
        s if s >= 0.25 => "moderate",
        _ => "low",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_boundaries() {
        assert_eq!(level(1.00), "severe");
        assert_eq!(level(0.75), "severe");
        assert_eq!(level(0.74), "high");
        assert_eq!(level(0.50), "high");
        assert_eq!(level(0.49), "moderate");
        assert_eq!(level(0.25), "moderate");
        assert_eq!(level(0.24), "low");
        assert_eq!(level(0.00), "low");
    }

    #[test]
    fn test_levels_cover_every_band() {
        for s in [0.0, 0.3, 0.6, 0.9] {
            assert!(LEVELS.contains(&level(s)));
        }
    }
}
