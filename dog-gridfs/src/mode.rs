use std::str::FromStr;

use crate::BlobError;

/// Capability set a [`BlobStream`](crate::BlobStream) is opened with.
///
/// Read and write are independent capabilities carried in the value, not in
/// the stream type. The existence flags are checked once, at `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamMode {
    pub allows_read: bool,
    pub allows_write: bool,
    /// The object must already exist
    pub requires_existing: bool,
    /// The object must not exist yet (exclusive create)
    pub requires_new: bool,
}

impl StreamMode {
    /// Read an existing object (`r`)
    pub fn read() -> Self {
        Self {
            allows_read: true,
            requires_existing: true,
            ..Self::default()
        }
    }

    /// Write, replacing any existing object (`w`)
    pub fn write() -> Self {
        Self {
            allows_write: true,
            ..Self::default()
        }
    }

    /// Read and write, creating if missing (`w+`)
    pub fn read_write() -> Self {
        Self {
            allows_read: true,
            allows_write: true,
            ..Self::default()
        }
    }

    /// Write a brand new object, refusing existing ones (`x`)
    pub fn create_new() -> Self {
        Self {
            allows_write: true,
            requires_new: true,
            ..Self::default()
        }
    }

    pub fn with_read(mut self) -> Self {
        self.allows_read = true;
        self
    }

    pub fn with_write(mut self) -> Self {
        self.allows_write = true;
        self
    }

    pub fn requiring_existing(mut self) -> Self {
        self.requires_existing = true;
        self
    }

    pub fn requiring_new(mut self) -> Self {
        self.requires_new = true;
        self
    }

    /// Whether an existing object may be opened in this mode
    pub fn allows_existing(&self) -> bool {
        !self.requires_new
    }

    /// Whether a missing object may be opened in this mode
    pub fn allows_missing(&self) -> bool {
        !self.requires_existing
    }
}

impl FromStr for StreamMode {
    type Err = BlobError;

    /// Parse an fopen-style mode such as `r`, `rb+`, `w`, `x+` or `c`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let base = chars
            .next()
            .ok_or_else(|| BlobError::invalid("empty stream mode"))?;

        let mut plus = false;
        for flag in chars {
            match flag {
                '+' => plus = true,
                'b' | 't' => {}
                other => {
                    return Err(BlobError::invalid(format!(
                        "unknown flag {:?} in stream mode {:?}",
                        other, s
                    )))
                }
            }
        }

        if !matches!(base, 'r' | 'w' | 'a' | 'x' | 'c') {
            return Err(BlobError::invalid(format!("unknown stream mode {:?}", s)));
        }

        Ok(Self {
            allows_read: base == 'r' || plus,
            allows_write: base != 'r' || plus,
            requires_existing: base == 'r',
            requires_new: base == 'x',
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> StreamMode {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_read_modes() {
        assert_eq!(parse("r"), StreamMode::read());
        assert_eq!(parse("rb"), StreamMode::read());
        let rw = parse("r+");
        assert!(rw.allows_read && rw.allows_write && rw.requires_existing);
    }

    #[test]
    fn test_parse_write_modes() {
        assert_eq!(parse("w"), StreamMode::write());
        assert_eq!(parse("w+"), StreamMode::read_write());
        assert_eq!(parse("a"), StreamMode::write());
        assert_eq!(parse("c"), StreamMode::write());
        assert_eq!(parse("x"), StreamMode::create_new());
        assert!(parse("xb+").allows_read);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<StreamMode>().is_err());
        assert!("q".parse::<StreamMode>().is_err());
        assert!("rz".parse::<StreamMode>().is_err());
    }

    #[test]
    fn test_existence_rules() {
        assert!(!StreamMode::read().allows_missing());
        assert!(StreamMode::read().allows_existing());
        assert!(!StreamMode::create_new().allows_existing());
        assert!(StreamMode::create_new().allows_missing());
        let both = StreamMode::write().requiring_new().with_read();
        assert!(both.allows_read && both.requires_new);
    }
}
