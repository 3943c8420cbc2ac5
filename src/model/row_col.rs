//! A1 notation: cells such as `G2` and ranges such as `Orders!G2:G100`.

use anyhow::{bail, Context};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A zero-based (row, column) position in a sheet. Displays and serializes in A1 notation, so
/// `RowCol(1, 6)` is `G2`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RowCol(pub usize, pub usize);

impl RowCol {
    pub fn new(row: usize, col: usize) -> Self {
        Self(row, col)
    }

    pub fn row(&self) -> usize {
        self.0
    }

    pub fn col(&self) -> usize {
        self.1
    }
}

impl fmt::Display for RowCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letter(self.1), self.0 + 1)
    }
}

impl FromStr for RowCol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .with_context(|| format!("Cell '{s}' has no row number"))?;
        let (letters, digits) = s.split_at(split);
        let col = column_index(letters)?;
        let row: usize = digits
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid row number in '{s}': {e}"))?;
        if row == 0 {
            bail!("Row numbers start at 1, got '{s}'");
        }
        Ok(RowCol(row - 1, col))
    }
}

impl Serialize for RowCol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RowCol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RowCol::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Converts a zero-based column index to letters: 0 is `A`, 25 is `Z`, 26 is `AA`.
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Converts column letters to a zero-based index: `A` is 0, `AA` is 26.
pub fn column_index(letters: &str) -> crate::Result<usize> {
    if letters.is_empty() {
        bail!("Column letters are missing");
    }
    let mut index: usize = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            bail!("Invalid column letters '{letters}'");
        }
        let value = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        index = index * 26 + value;
    }
    Ok(index - 1)
}

/// A range on a named tab. Without bounds it refers to the whole tab. When writing, only the
/// `start` matters: values are anchored there and extend right and down.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct A1Range {
    sheet: String,
    start: Option<RowCol>,
    end: Option<RowCol>,
}

impl A1Range {
    /// The whole tab.
    pub fn tab(sheet: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
            start: None,
            end: None,
        }
    }

    /// A single anchor cell.
    pub fn cell(sheet: impl Into<String>, cell: RowCol) -> Self {
        Self {
            sheet: sheet.into(),
            start: Some(cell),
            end: None,
        }
    }

    /// A rectangle from `start` to `end`, inclusive.
    pub fn span(sheet: impl Into<String>, start: RowCol, end: RowCol) -> Self {
        Self {
            sheet: sheet.into(),
            start: Some(start),
            end: Some(end),
        }
    }

    /// Columns `first..=last` (letters) for 1-based rows `first_row..=last_row`.
    pub fn columns(
        sheet: impl Into<String>,
        first: &str,
        last: &str,
        first_row: usize,
        last_row: usize,
    ) -> crate::Result<Self> {
        let start = RowCol(first_row.saturating_sub(1), column_index(first)?);
        let end = RowCol(last_row.saturating_sub(1), column_index(last)?);
        Ok(Self::span(sheet, start, end))
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn start(&self) -> Option<RowCol> {
        self.start
    }

    /// The inclusive end. A single cell ends where it starts.
    pub fn end(&self) -> Option<RowCol> {
        self.end.or(self.start)
    }
}

impl fmt::Display for A1Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sheet.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            write!(f, "{}", self.sheet)?;
        } else {
            write!(f, "'{}'", self.sheet.replace('\'', "''"))?;
        }
        match (self.start, self.end) {
            (Some(start), Some(end)) if start != end => write!(f, "!{start}:{end}"),
            (Some(start), _) => write!(f, "!{start}"),
            _ => Ok(()),
        }
    }
}

impl FromStr for A1Range {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (sheet, cells) = match s.rfind('!') {
            Some(i) => (&s[..i], Some(&s[i + 1..])),
            None => (s, None),
        };
        let sheet = sheet
            .strip_prefix('\'')
            .and_then(|q| q.strip_suffix('\''))
            .map(|q| q.replace("''", "'"))
            .unwrap_or_else(|| sheet.to_string());
        if sheet.is_empty() {
            bail!("Range '{s}' has no sheet name");
        }
        let Some(cells) = cells else {
            return Ok(Self::tab(sheet));
        };
        match cells.split_once(':') {
            Some((a, b)) => Ok(Self::span(sheet, a.parse()?, b.parse()?)),
            None => Ok(Self::cell(sheet, cells.parse()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(6), "G");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(51), "AZ");
        assert_eq!(column_letter(52), "BA");
        assert_eq!(column_letter(701), "ZZ");
        for i in [0, 7, 25, 26, 300, 701, 702] {
            assert_eq!(column_index(&column_letter(i)).unwrap(), i);
        }
        assert!(column_index("").is_err());
        assert!(column_index("A1").is_err());
    }

    #[test]
    fn test_row_col_display() {
        assert_eq!(RowCol::new(1, 6).to_string(), "G2");
        assert_eq!(RowCol::new(0, 0).to_string(), "A1");
        assert_eq!(RowCol::new(99, 27).to_string(), "AB100");
    }

    #[test]
    fn test_row_col_from_str() {
        assert_eq!("G2".parse::<RowCol>().unwrap(), RowCol::new(1, 6));
        assert_eq!("p5".parse::<RowCol>().unwrap(), RowCol::new(4, 15));
        assert!("G".parse::<RowCol>().is_err());
        assert!("G0".parse::<RowCol>().is_err());
        assert!("2".parse::<RowCol>().is_err());
    }

    #[test]
    fn test_row_col_serde() {
        let serialized = serde_json::to_string(&RowCol::new(4, 15)).unwrap();
        assert_eq!(serialized, r#""P5""#);
        let cell: RowCol = serde_json::from_str(r#""P5""#).unwrap();
        assert_eq!(cell, RowCol::new(4, 15));
    }

    #[test]
    fn test_range_parse_and_display() {
        let r: A1Range = "Orders!G2:G100".parse().unwrap();
        assert_eq!(r.sheet(), "Orders");
        assert_eq!(r.start(), Some(RowCol::new(1, 6)));
        assert_eq!(r.end(), Some(RowCol::new(99, 6)));
        assert_eq!(r.to_string(), "Orders!G2:G100");

        let r: A1Range = "Orders!P5".parse().unwrap();
        assert_eq!(r.end(), Some(RowCol::new(4, 15)));
        assert_eq!(r.to_string(), "Orders!P5");

        let r: A1Range = "METRICS".parse().unwrap();
        assert_eq!(r, A1Range::tab("METRICS"));
        assert_eq!(r.start(), None);

        let r: A1Range = "'Sheet 1'!A1:B2".parse().unwrap();
        assert_eq!(r.sheet(), "Sheet 1");
        assert_eq!(r.to_string(), "'Sheet 1'!A1:B2");
    }

    #[test]
    fn test_range_columns() {
        let r = A1Range::columns("Orders", "H", "M", 2, 40).unwrap();
        assert_eq!(r.to_string(), "Orders!H2:M40");
    }
}
