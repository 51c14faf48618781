use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::error::LoadError;

const MAX_SCALE: u32 = 4;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid decimal {0}: expected a non-negative number with at most 4 decimal places")]
pub struct InvalidDecimal(pub String);

/// Non-negative decimal with at most four decimal places.
///
/// Proportions and water content are stored this way so that `1 - p` is
/// exact and always prints the same digits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Decimal4(Decimal);

impl Decimal4 {
    pub const ZERO: Decimal4 = Decimal4(Decimal::ZERO);
    pub const ONE: Decimal4 = Decimal4(Decimal::ONE);

    pub fn value(self) -> Decimal {
        self.0
    }

    /// `1 - self`, or `None` when `self > 1`.
    pub fn complement(self) -> Option<Decimal4> {
        if self.0 > Decimal::ONE {
            return None;
        }
        Decimal4::try_from(Decimal::ONE - self.0).ok()
    }
}

impl TryFrom<Decimal> for Decimal4 {
    type Error = InvalidDecimal;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        let normalized = value.normalize();
        if normalized.is_sign_negative() && !normalized.is_zero() {
            return Err(InvalidDecimal(value.to_string()));
        }
        if normalized.scale() > MAX_SCALE {
            return Err(InvalidDecimal(value.to_string()));
        }
        if normalized.is_zero() {
            return Ok(Decimal4::ZERO);
        }
        Ok(Decimal4(normalized))
    }
}

impl FromStr for Decimal4 {
    type Err = InvalidDecimal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|_| InvalidDecimal(s.to_string()))?;
        Decimal4::try_from(value)
    }
}

// JSON run definitions carry plain numbers.
impl Serialize for Decimal4 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        rust_decimal::serde::float::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Decimal4 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = rust_decimal::serde::float::deserialize(deserializer)?;
        Decimal4::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Decimal4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

impl fmt::Debug for Decimal4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal4({self})")
    }
}

/// Per-crop nitrogen adjustment: how much of the 2020 application is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    /// Crop code as understood by Mantis
    pub crop: u16,
    /// Retained proportion, 0 to 1
    pub proportion: Decimal4,
}

impl Modification {
    pub fn new(crop: u16, proportion: Decimal4) -> Self {
        Self { crop, proportion }
    }
}

/// Kinds of area a run can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaKind {
    CentralValley,
    SubBasin,
    County,
    B118Basin,
    CvhmFarm,
}

impl AreaKind {
    pub const ALL: [AreaKind; 5] = [
        AreaKind::CentralValley,
        AreaKind::SubBasin,
        AreaKind::County,
        AreaKind::B118Basin,
        AreaKind::CvhmFarm,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// A concrete area: its kind plus the id Mantis knows it by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub kind: AreaKind,
    pub id: u32,
}

/// Geographic scope of a run. Absent in a run definition means the whole domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<Area>", into = "Option<Area>")]
pub enum AreaSelector {
    #[default]
    WholeDomain,
    Area(Area),
}

impl From<Option<Area>> for AreaSelector {
    fn from(area: Option<Area>) -> Self {
        area.map_or(AreaSelector::WholeDomain, AreaSelector::Area)
    }
}

impl From<AreaSelector> for Option<Area> {
    fn from(selector: AreaSelector) -> Self {
        match selector {
            AreaSelector::WholeDomain => None,
            AreaSelector::Area(area) => Some(area),
        }
    }
}

/// Area as it goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireArea {
    pub kind_id: u32,
    pub area_id: u32,
}

/// Mapping from [`AreaKind`] to the integer Mantis expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaKindMap {
    ids: [u32; 5],
}

impl Default for AreaKindMap {
    fn default() -> Self {
        Self {
            // indexed by AreaKind declaration order
            ids: [1, 2, 3, 4, 5],
        }
    }
}

impl AreaKindMap {
    pub fn with(mut self, kind: AreaKind, id: u32) -> Self {
        self.ids[kind.index()] = id;
        self
    }

    pub fn wire_id(&self, kind: AreaKind) -> u32 {
        self.ids[kind.index()]
    }

    /// Whole domain resolves to `(central valley id, 0)`.
    pub fn resolve(&self, selector: &AreaSelector) -> WireArea {
        match selector {
            AreaSelector::WholeDomain => WireArea {
                kind_id: self.wire_id(AreaKind::CentralValley),
                area_id: 0,
            },
            AreaSelector::Area(area) => WireArea {
                kind_id: self.wire_id(area.kind),
                area_id: area.id,
            },
        }
    }
}

/// Validated, immutable definition of a model run handed over by the web layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub n_years: u32,
    pub reduction_year: i32,
    pub water_content: Decimal4,
    pub scenario_name: String,
    #[serde(default)]
    pub area: AreaSelector,
    #[serde(default)]
    pub modifications: Vec<Modification>,
    /// Carried for the web layer; not sent to Mantis
    #[serde(default)]
    pub unsaturated_zone_travel_time: Option<f64>,
}

impl RunSpec {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Read a JSON run definition from disk.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: display.clone(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| LoadError::Json {
            path: display,
            source,
        })
    }
}

/// One loading value with the year and well inferred from its stream position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultValue {
    /// Simulation-year index, starting at 0
    pub year: u32,
    /// Well index, only meaningful within one run
    pub well: u32,
    pub loading: f64,
}
