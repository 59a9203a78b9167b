//! The `YYYY-MM` reporting period used by the tax engine's estimate and
//! checklist endpoints.

use std::fmt::Display;

use time::Date;

use crate::Error;

/// A VAT reporting period, e.g. "2025-09".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Period {
    year: i32,
    month: u8,
}

impl Period {
    /// Parse a period from a `YYYY-MM` string.
    ///
    /// # Errors
    /// Returns [Error::InvalidPeriod] if the string is not of the form
    /// `YYYY-MM` or the month is not between 1 and 12.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let error = || Error::InvalidPeriod(text.to_owned());

        let (year_part, month_part) = text.split_once('-').ok_or_else(error)?;

        if year_part.len() != 4 || month_part.len() != 2 {
            return Err(error());
        }

        let year: i32 = year_part.parse().map_err(|_| error())?;
        let month: u8 = month_part.parse().map_err(|_| error())?;

        if !(1..=12).contains(&month) {
            return Err(error());
        }

        Ok(Self { year, month })
    }

    /// The period containing `date`.
    pub fn containing(date: Date) -> Self {
        Self {
            year: date.year(),
            month: date.month() as u8,
        }
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
