//! Option contract identity parsed from instrument symbols.
//!
//! Two grammars are recognized:
//!
//! - dxFeed streamer symbols: `.{ROOT}{YYMMDD}{C|P}{STRIKE}`, e.g. `.AAPL250117C150`
//! - OCC symbols: `{ROOT padded to 6}{YYMMDD}{C|P}{STRIKE x 1000, 8 digits}`,
//!   e.g. `AAPL  250117C00150000`
//!
//! Anything else carries no contract identity.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;

use super::OptionType;

#[allow(clippy::expect_used)] // static pattern, covered by tests
static DXFEED_OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.([A-Z][A-Z0-9/]*?)(\d{6})([CP])(\d+(?:\.\d+)?)$").expect("valid dxFeed pattern")
});

#[allow(clippy::expect_used)] // static pattern, covered by tests
static OCC_OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Z0-9]{0,5})\s*(\d{6})([CP])(\d{8})$").expect("valid OCC pattern")
});

/// Strike, expiry and right of an option contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractIdentity {
    /// Underlying root symbol.
    pub root: String,
    /// Expiration date.
    pub expiration: NaiveDate,
    /// Option right.
    pub option_type: OptionType,
    /// Strike price.
    pub strike: Decimal,
}

impl ContractIdentity {
    /// Parse a dxFeed or OCC option symbol.
    ///
    /// Returns `None` for equities, indices and anything malformed.
    #[must_use]
    pub fn parse(symbol: &str) -> Option<Self> {
        if let Some(caps) = DXFEED_OPTION.captures(symbol) {
            let strike = Decimal::from_str(&caps[4]).ok()?;
            return Self::build(&caps[1], &caps[2], &caps[3], strike);
        }

        if let Some(caps) = OCC_OPTION.captures(symbol) {
            let thousandths: i64 = caps[4].parse().ok()?;
            let strike = Decimal::new(thousandths, 3).normalize();
            return Self::build(&caps[1], &caps[2], &caps[3], strike);
        }

        None
    }

    fn build(root: &str, date: &str, right: &str, strike: Decimal) -> Option<Self> {
        let expiration = NaiveDate::parse_from_str(date, "%y%m%d").ok()?;
        let option_type = match right {
            "C" => OptionType::Call,
            "P" => OptionType::Put,
            _ => return None,
        };
        Some(Self {
            root: root.to_string(),
            expiration,
            option_type,
            strike,
        })
    }
}
