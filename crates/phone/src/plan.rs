//! Numbering plans and candidate generation.
//!
//! The domestic plan distinguishes landline-length subscriber numbers from
//! mobile-length ones carrying an extra leading marker digit. Users (and old
//! address books) mix both forms, so a domestic number may expand into the
//! original plus one marker variant. Foreign numbers are never mutated.

use std::collections::HashSet;

use {
    serde::Serialize,
    zapgate_common::CanonicalNumber,
    zapgate_config::{DomesticPlanConfig, ForeignPlanConfig, PhoneConfig},
};

use crate::{error::PhoneError, normalize::NormalizedNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Variation {
    Original,
    MarkerInserted,
    MarkerRemoved,
}

/// A hypothesised canonical number. Lower ranks are probed first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub number: CanonicalNumber,
    pub rank: u8,
    pub variation: Variation,
}

impl Candidate {
    fn original(digits: &str) -> Self {
        Self {
            number: CanonicalNumber::new(digits),
            rank: 0,
            variation: Variation::Original,
        }
    }

    fn variant(digits: String, variation: Variation) -> Self {
        Self {
            number: CanonicalNumber::new(digits),
            rank: 1,
            variation,
        }
    }
}

#[derive(Debug, Clone)]
struct DomesticPlan {
    country_code: String,
    area_codes: HashSet<String>,
    area_len: usize,
    subscriber_digits: usize,
    marker: char,
    mobile_leading: Vec<char>,
}

impl DomesticPlan {
    fn from_config(config: &DomesticPlanConfig) -> Self {
        Self {
            country_code: config.country_code.clone(),
            area_len: config.area_codes.first().map_or(0, String::len),
            area_codes: config.area_codes.iter().cloned().collect(),
            subscriber_digits: config.subscriber_digits,
            marker: config.mobile_marker.chars().next().unwrap_or('9'),
            mobile_leading: config.mobile_leading_digits.chars().collect(),
        }
    }

    fn candidates(&self, number: &NormalizedNumber) -> Result<Vec<Candidate>, PhoneError> {
        let national = number.national();
        if national.len() <= self.area_len {
            return Err(PhoneError::unsupported(&number.digits, "missing area code"));
        }
        let (area, subscriber) = national.split_at(self.area_len);
        if !self.area_codes.contains(area) {
            return Err(PhoneError::unsupported(
                &number.digits,
                format!("unknown area code '{area}'"),
            ));
        }

        let prefix = &number.digits[..self.country_code.len() + self.area_len];
        let mut candidates = vec![Candidate::original(&number.digits)];
        let first = subscriber.chars().next();

        if subscriber.len() == self.subscriber_digits {
            // Landline-length: only numbers in the mobile range may be missing
            // their marker. Everything else is a landline and stays as is.
            if first.is_some_and(|c| self.mobile_leading.contains(&c)) {
                candidates.push(Candidate::variant(
                    format!("{prefix}{}{subscriber}", self.marker),
                    Variation::MarkerInserted,
                ));
            }
        } else if subscriber.len() == self.subscriber_digits + 1 {
            if first == Some(self.marker) {
                candidates.push(Candidate::variant(
                    format!("{prefix}{}", &subscriber[1..]),
                    Variation::MarkerRemoved,
                ));
            }
        } else {
            return Err(PhoneError::invalid(
                &number.digits,
                format!(
                    "subscriber number must have {} or {} digits",
                    self.subscriber_digits,
                    self.subscriber_digits + 1
                ),
            ));
        }
        Ok(candidates)
    }
}

#[derive(Debug, Clone)]
struct ForeignPlan {
    country_code: String,
    national_lengths: Vec<usize>,
}

impl From<&ForeignPlanConfig> for ForeignPlan {
    fn from(config: &ForeignPlanConfig) -> Self {
        Self {
            country_code: config.country_code.clone(),
            national_lengths: config.national_lengths.clone(),
        }
    }
}

/// Expands a normalized number into its ranked candidates.
#[derive(Debug, Clone)]
pub struct CandidateGenerator {
    domestic: DomesticPlan,
    foreign: Vec<ForeignPlan>,
}

impl CandidateGenerator {
    pub fn from_config(config: &PhoneConfig) -> Self {
        Self {
            domestic: DomesticPlan::from_config(&config.domestic),
            foreign: config.foreign.iter().map(ForeignPlan::from).collect(),
        }
    }

    pub fn candidates(&self, number: &NormalizedNumber) -> Result<Vec<Candidate>, PhoneError> {
        if number.country_code == self.domestic.country_code {
            return self.domestic.candidates(number);
        }

        let Some(plan) = self
            .foreign
            .iter()
            .find(|p| p.country_code == number.country_code)
        else {
            return Err(PhoneError::unsupported(
                &number.digits,
                format!("no numbering plan for country code {}", number.country_code),
            ));
        };
        let national = number.national().len();
        if !plan.national_lengths.contains(&national) {
            return Err(PhoneError::unsupported(
                &number.digits,
                format!(
                    "country code {} expects {:?} national digits, got {national}",
                    plan.country_code, plan.national_lengths
                ),
            ));
        }
        Ok(vec![Candidate::original(&number.digits)])
    }
}
