//! The estimation pipeline: request validation, per-type value calculation,
//! two-stage plot aggregation, stratification, and population estimates with
//! stratified-design variance.

pub mod aggregate;
pub mod modules;
pub mod population;
pub mod request;
pub mod stratify;
pub mod workflow;

use serde::{Deserialize, Serialize};

pub use request::EstimationRequest;
pub use workflow::Estimator;

use modules::area::AreaModule;
use modules::biomass::BiomassModule;
use modules::growth::GrowthModule;
use modules::mortality::MortalityModule;
use modules::tpa::TpaModule;
use modules::volume::VolumeModule;
use modules::EstimationModule;

/// The supported estimation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimationType {
    Volume,
    Biomass,
    Tpa,
    Mortality,
    Growth,
    Area,
}

impl EstimationType {
    /// The value calculator for this type.
    #[must_use]
    pub fn module(self) -> Box<dyn EstimationModule> {
        match self {
            Self::Volume => Box::new(VolumeModule),
            Self::Biomass => Box::new(BiomassModule),
            Self::Tpa => Box::new(TpaModule),
            Self::Mortality => Box::new(MortalityModule),
            Self::Growth => Box::new(GrowthModule),
            Self::Area => Box::new(AreaModule),
        }
    }
}
