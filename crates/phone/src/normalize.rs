use {serde::Serialize, zapgate_config::PhoneConfig};

use crate::error::PhoneError;

const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;

/// Suffix of a linked identity: a network-side alias that hides the phone
/// number and has to be mapped back through the tenant's session.
pub const LID_SUFFIX: &str = "@lid";

/// The digits of a linked identity (`<digits>@lid`), if `raw` is one.
pub fn lid_digits(raw: &str) -> Result<Option<&str>, PhoneError> {
    let Some(lid) = raw.trim().strip_suffix(LID_SUFFIX) else {
        return Ok(None);
    };
    if lid.is_empty() || !lid.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PhoneError::invalid(
            raw,
            format!("linked identity must be digits followed by '{LID_SUFFIX}'"),
        ));
    }
    Ok(Some(lid))
}

/// Digits of a raw number plus the country code they start with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedNumber {
    pub digits: String,
    pub country_code: String,
    pub had_suffix: bool,
}

impl NormalizedNumber {
    /// Digits after the country code.
    pub fn national(&self) -> &str {
        &self.digits[self.country_code.len()..]
    }
}

/// Turns arbitrary user input into a [`NormalizedNumber`].
#[derive(Debug, Clone)]
pub struct NumberNormalizer {
    suffixes: Vec<String>,
    // Longest first, so "351" wins over a hypothetical "3".
    country_codes: Vec<String>,
}

impl NumberNormalizer {
    pub fn new<S, C>(suffixes: S, country_codes: C) -> Self
    where
        S: IntoIterator<Item = String>,
        C: IntoIterator<Item = String>,
    {
        let mut country_codes: Vec<String> = country_codes.into_iter().collect();
        country_codes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        country_codes.dedup();
        Self {
            suffixes: suffixes.into_iter().collect(),
            country_codes,
        }
    }

    pub fn from_config(config: &PhoneConfig) -> Self {
        let codes = std::iter::once(config.domestic.country_code.clone())
            .chain(config.foreign.iter().map(|p| p.country_code.clone()));
        Self::new(config.routing_suffixes.iter().cloned(), codes)
    }

    pub fn normalize(&self, raw: &str) -> Result<NormalizedNumber, PhoneError> {
        let trimmed = raw.trim();
        let (body, had_suffix) = match trimmed.find('@') {
            None => (trimmed, false),
            Some(at) => {
                let suffix = &trimmed[at..];
                if !self.suffixes.iter().any(|s| s.eq_ignore_ascii_case(suffix)) {
                    return Err(PhoneError::invalid(raw, format!("unknown routing suffix '{suffix}'")));
                }
                (&trimmed[..at], true)
            },
        };

        let digits: String = body.chars().filter(char::is_ascii_digit).collect();
        if digits.len() < MIN_DIGITS {
            return Err(PhoneError::invalid(raw, format!("fewer than {MIN_DIGITS} digits")));
        }
        if digits.len() > MAX_DIGITS {
            return Err(PhoneError::invalid(raw, format!("more than {MAX_DIGITS} digits")));
        }

        let Some(country_code) = self
            .country_codes
            .iter()
            .find(|cc| digits.starts_with(cc.as_str()))
        else {
            return Err(PhoneError::invalid(raw, "no recognized country code"));
        };

        Ok(NormalizedNumber {
            country_code: country_code.clone(),
            digits,
            had_suffix,
        })
    }
}
