//! Mantis wire format.
//!
//! One job per TCP connection. The client sends a single space-delimited
//! ASCII line:
//!
//! ```text
//! <n_years> <reduction_year> <water_content> <scenario> <area_kind_id> <record_count> [<crop> <fraction_removed>]* ENDofMSG\n
//! ```
//!
//! and Mantis answers with a flat, untagged list of loading values, then
//! closes the connection. `fraction_removed` is `1 - proportion_retained`.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::config::ResultOrder;
use crate::error::{DecodeError, EncodeError};
use crate::run::{Decimal4, ResultValue, RunSpec, WireArea};

/// Marks the end of a job command.
pub const TERMINATOR: &str = "ENDofMSG";

pub const DEFAULT_STATUS_REQUEST: &[u8] = b"MANTIS_STATUS ENDofMSG\n";
pub const DEFAULT_STATUS_RESPONSE: &[u8] = b"MANTIS_ONLINE";

#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolCodec {
    order: ResultOrder,
}

impl ProtocolCodec {
    pub fn new(order: ResultOrder) -> Self {
        Self { order }
    }

    pub fn order(&self) -> ResultOrder {
        self.order
    }

    /// Build the job command for a run.
    pub fn encode(&self, spec: &RunSpec, area: WireArea) -> Result<Vec<u8>, EncodeError> {
        if spec.scenario_name.is_empty()
            || !spec.scenario_name.is_ascii()
            || spec.scenario_name.contains(char::is_whitespace)
        {
            return Err(EncodeError::InvalidScenario(spec.scenario_name.clone()));
        }

        let mut seen = HashSet::with_capacity(spec.modifications.len());
        let mut removed = Vec::with_capacity(spec.modifications.len());
        for modification in &spec.modifications {
            let invalid = |reason: String| EncodeError::InvalidModification {
                crop: modification.crop,
                reason,
            };
            if modification.crop == 0 {
                return Err(invalid("crop code must be positive".to_string()));
            }
            if !seen.insert(modification.crop) {
                return Err(invalid("crop appears more than once".to_string()));
            }
            let fraction: Decimal4 = modification.proportion.complement().ok_or_else(|| {
                invalid(format!(
                    "proportion {} is above 1",
                    modification.proportion
                ))
            })?;
            removed.push((modification.crop, fraction));
        }

        let mut line = format!(
            "{} {} {} {} {} {}",
            spec.n_years,
            spec.reduction_year,
            spec.water_content,
            spec.scenario_name,
            area.kind_id,
            removed.len()
        );
        for (crop, fraction) in removed {
            // writing into a String cannot fail
            let _ = write!(line, " {crop} {fraction}");
        }
        line.push(' ');
        line.push_str(TERMINATOR);
        line.push('\n');

        Ok(line.into_bytes())
    }

    /// Parse a Mantis response into values tagged with (year, well).
    ///
    /// `n_years` is the run's simulation length; the value count must be a
    /// multiple of it.
    pub fn decode(&self, bytes: &[u8], n_years: u32) -> Result<Vec<ResultValue>, DecodeError> {
        let text = String::from_utf8_lossy(bytes);
        let loadings = text
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .enumerate()
            .map(|(position, token)| match token.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(value),
                _ => Err(DecodeError::Malformed {
                    position,
                    token: token.to_string(),
                }),
            })
            .collect::<Result<Vec<f64>, DecodeError>>()?;

        if loadings.is_empty() {
            return Err(DecodeError::Empty);
        }
        if n_years == 0 || loadings.len() % n_years as usize != 0 {
            return Err(DecodeError::Misaligned {
                values: loadings.len(),
                years: n_years,
            });
        }

        let years = n_years as usize;
        let wells = loadings.len() / years;
        Ok(loadings
            .into_iter()
            .enumerate()
            .map(|(i, loading)| {
                let (year, well) = match self.order {
                    ResultOrder::WellMajor => (i % years, i / years),
                    ResultOrder::YearMajor => (i / wells, i % wells),
                };
                ResultValue {
                    year: year as u32,
                    well: well as u32,
                    loading,
                }
            })
            .collect())
    }
}
