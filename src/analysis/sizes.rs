//! Creative size strings: parsing, canonical labels, near-miss matching

use std::fmt;

/// Sizes the exchange's pretargeting UI accepts in an INCLUDE list.
pub const STANDARD_ADDRESSABLE_SIZES: &[&str] = &[
    "468x60", "728x90", "250x250", "200x200", "336x280", "300x250", "120x600", "160x600",
    "320x50", "300x50", "425x600", "300x600", "970x90", "240x400", "980x120", "930x180",
    "250x360", "580x400", "300x1050", "480x320", "320x480", "768x1024", "1024x768", "480x32",
    "1024x90", "970x250", "300x100", "750x300", "750x200", "750x100", "950x90", "88x31",
    "220x90", "300x31", "320x100", "980x90", "240x133", "200x446", "292x30", "960x90",
    "970x66", "300x57", "120x60", "375x50", "414x736", "736x414", "320x400", "600x314",
    "400x400", "480x800", "500x500", "500x720", "600x500", "672x560", "1160x800", "600x100",
    "640x100", "640x200", "240x1200", "320x1200", "600x1200", "600x2100", "936x120",
    "1456x180", "1860x360", "1940x180", "1940x500", "1950x180", "864x1296", "1296x864",
    "1280x600", "1000x1000",
];

pub fn standard_addressable_sizes() -> Vec<String> {
    STANDARD_ADDRESSABLE_SIZES.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CreativeSize {
    pub width: u32,
    pub height: u32,
}

impl CreativeSize {
    /// Parse `"300x250"`, `"300 X 250"` or `"300×250"`; zero dimensions are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let lower = compact.to_lowercase();
        let (w, h) = lower.split_once(|c| c == 'x' || c == '×')?;
        let width: u32 = w.parse().ok()?;
        let height: u32 = h.parse().ok()?;
        (width > 0 && height > 0).then_some(Self { width, height })
    }

    /// Largest per-dimension pixel distance.
    pub fn distance(&self, other: &CreativeSize) -> u32 {
        self.width
            .abs_diff(other.width)
            .max(self.height.abs_diff(other.height))
    }
}

impl fmt::Display for CreativeSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Canonical `WxH` for well-formed sizes; anything else ("Native",
/// "Interstitial") is returned trimmed and unchanged.
pub fn canonical_label(raw: &str) -> String {
    match CreativeSize::parse(raw) {
        Some(size) => size.to_string(),
        None => raw.trim().to_string(),
    }
}

/// Closest candidate within `epsilon` px on both dimensions, excluding exact matches.
pub fn nearest_within<'a, I>(size: &CreativeSize, candidates: I, epsilon: u32) -> Option<CreativeSize>
where
    I: IntoIterator<Item = &'a CreativeSize>,
{
    candidates
        .into_iter()
        .filter(|c| *c != size)
        .map(|c| (size.distance(c), *c))
        .filter(|(d, _)| *d <= epsilon)
        .min()
        .map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_canonicalize() {
        assert_eq!(
            CreativeSize::parse("300 X 250"),
            Some(CreativeSize { width: 300, height: 250 })
        );
        assert_eq!(canonical_label(" 320×50 "), "320x50");
        assert_eq!(canonical_label("Native"), "Native");
        assert_eq!(CreativeSize::parse("0x250"), None);
        assert_eq!(CreativeSize::parse("300x"), None);
    }

    #[test]
    fn test_near_miss() {
        let inventory = vec![
            CreativeSize::parse("300x250").unwrap(),
            CreativeSize::parse("320x50").unwrap(),
        ];
        let observed = CreativeSize::parse("301x250").unwrap();
        assert_eq!(
            nearest_within(&observed, &inventory, 2),
            Some(inventory[0])
        );

        let far = CreativeSize::parse("360x300").unwrap();
        assert_eq!(nearest_within(&far, &inventory, 2), None);
        assert_eq!(nearest_within(&inventory[0], &inventory, 2), None);
    }

    #[test]
    fn test_standard_list_shape() {
        assert!(STANDARD_ADDRESSABLE_SIZES
            .iter()
            .all(|s| CreativeSize::parse(s).map(|c| c.to_string()) == Some(s.to_string())));
        assert!(!STANDARD_ADDRESSABLE_SIZES.contains(&"360x300"));
    }
}
