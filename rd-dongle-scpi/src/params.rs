//! Command parameter parsing.
//!
//! Parameters follow the header after whitespace and are comma
//! separated. Failures map onto the standard error codes: a missing
//! mandatory parameter is -109, a malformed value or a wrong unit is
//! -104, and out-of-range values are the handler's business (-224).

use crate::error::{ERR_DATA_TYPE, ERR_MISSING_PARAMETER};

/// Unit suffix accepted on a numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Volt,
    Amp,
}

impl Unit {
    fn symbol(self) -> &'static str {
        match self {
            Unit::Volt => "V",
            Unit::Amp => "A",
        }
    }
}

#[derive(Debug)]
pub struct Params<'a> {
    items: Vec<&'a str>,
}

impl<'a> Params<'a> {
    pub fn parse(rest: &'a str) -> Self {
        let rest = rest.trim();
        let items = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(str::trim).collect()
        };
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn require(&self, index: usize) -> Result<&'a str, i16> {
        self.items
            .get(index)
            .copied()
            .filter(|item| !item.is_empty())
            .ok_or(ERR_MISSING_PARAMETER)
    }

    pub fn u32_at(&self, index: usize) -> Result<u32, i16> {
        self.require(index)?.parse().map_err(|_| ERR_DATA_TYPE)
    }

    pub fn i32_at(&self, index: usize) -> Result<i32, i16> {
        self.require(index)?.parse().map_err(|_| ERR_DATA_TYPE)
    }

    /// `0`/`1`/`ON`/`OFF`, case-insensitive.
    pub fn bool_at(&self, index: usize) -> Result<bool, i16> {
        let item = self.require(index)?;
        if item == "1" || item.eq_ignore_ascii_case("ON") {
            Ok(true)
        } else if item == "0" || item.eq_ignore_ascii_case("OFF") {
            Ok(false)
        } else {
            Err(ERR_DATA_TYPE)
        }
    }

    /// A decimal number with an optional unit suffix; a suffix other than
    /// the expected unit is a data-type error.
    pub fn number_at(&self, index: usize, unit: Unit) -> Result<f64, i16> {
        let item = self.require(index)?;
        let (digits, suffix) = split_number(item);
        let value: f64 = digits.parse().map_err(|_| ERR_DATA_TYPE)?;
        let suffix = suffix.trim();
        if !suffix.is_empty() && !suffix.eq_ignore_ascii_case(unit.symbol()) {
            return Err(ERR_DATA_TYPE);
        }
        Ok(value)
    }

    /// Match against a list of named choices, case-insensitive.
    pub fn choice_at(&self, index: usize, options: &[(&str, i32)]) -> Result<i32, i16> {
        let item = self.require(index)?;
        options
            .iter()
            .find(|(name, _)| item.eq_ignore_ascii_case(name))
            .map(|(_, tag)| *tag)
            .ok_or(ERR_DATA_TYPE)
    }
}

/// Split `3.3V` into the numeric text and the unit suffix, keeping an
/// exponent (`2e-1`) on the numeric side.
fn split_number(item: &str) -> (&str, &str) {
    let bytes = item.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+') | Some(b'-')) {
            j += 1;
        }
        if bytes.get(j).is_some_and(u8::is_ascii_digit) {
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    item.split_at(i)
}
