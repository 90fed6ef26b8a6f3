//! Pediatric IV-fluid arithmetic: Holliday-Segar maintenance, resuscitation
//! boluses, and dehydration-deficit replacement. Pure functions throughout.

use std::fmt;
use std::str::FromStr;

/// Raised when a calculator input is out of range; names the offending field
/// so the caller can prompt for a correction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInputError {
    /// Field that failed validation.
    pub field: &'static str,
    /// What was wrong with it.
    pub detail: String,
}

impl fmt::Display for InvalidInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.field, self.detail)
    }
}

impl std::error::Error for InvalidInputError {}

fn invalid(field: &'static str, detail: impl Into<String>) -> InvalidInputError {
    InvalidInputError {
        field,
        detail: detail.into(),
    }
}

/// Validated patient parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Patient {
    /// Body weight in kilograms.
    pub weight_kg: f64,
    /// Age in years.
    pub age_years: f64,
}

impl Patient {
    /// Validates weight and age; both must be positive and finite.
    pub fn new(weight_kg: f64, age_years: f64) -> Result<Self, InvalidInputError> {
        if !weight_kg.is_finite() || weight_kg <= 0.0 {
            return Err(invalid("weight", format!("{weight_kg} kg; must be positive")));
        }
        if !age_years.is_finite() || age_years <= 0.0 {
            return Err(invalid("age", format!("{age_years} years; must be positive")));
        }
        Ok(Self {
            weight_kg,
            age_years,
        })
    }
}

/// Daily and hourly maintenance volumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaintenancePlan {
    /// Maintenance volume per day.
    pub ml_per_day: f64,
    /// Maintenance rate per hour.
    pub ml_per_hour: f64,
}

/// Single resuscitation bolus volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BolusPlan {
    /// Bolus volume, given rapidly and repeatable on reassessment.
    pub bolus_ml: f64,
}

/// Deficit replacement over 24 hours, reported on top of maintenance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeficitPlan {
    /// Dehydration severity as a percentage of body weight.
    pub dehydration_percent: f64,
    /// Total fluid deficit.
    pub deficit_ml: f64,
    /// Hourly replacement rate for the deficit alone.
    pub replacement_ml_per_hour: f64,
    /// Concurrent maintenance requirement.
    pub maintenance: MaintenancePlan,
    /// Combined hourly rate (replacement + maintenance).
    pub total_ml_per_hour: f64,
    /// Combined daily volume (deficit + maintenance).
    pub total_ml_per_day: f64,
}

/// One computed fluid prescription.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FluidPlan {
    /// Maintenance-only requirement.
    Maintenance(MaintenancePlan),
    /// Resuscitation bolus.
    Resuscitation(BolusPlan),
    /// Deficit replacement plus maintenance.
    Deficit(DeficitPlan),
}

/// Clinical scenario selecting which formula applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Routine maintenance fluids.
    Maintenance,
    /// Shock resuscitation bolus.
    Resuscitation,
    /// Mild dehydration (5% of body weight).
    MildDehydration,
    /// Moderate dehydration (10% of body weight).
    ModerateDehydration,
    /// Severe dehydration (15% of body weight).
    SevereDehydration,
}

impl Scenario {
    /// Dehydration percentage for deficit scenarios.
    pub fn dehydration_percent(&self) -> Option<f64> {
        match self {
            Self::MildDehydration => Some(5.0),
            Self::ModerateDehydration => Some(10.0),
            Self::SevereDehydration => Some(15.0),
            _ => None,
        }
    }

    /// Every scenario, in display order.
    pub fn all() -> [Scenario; 5] {
        [
            Self::Maintenance,
            Self::Resuscitation,
            Self::MildDehydration,
            Self::ModerateDehydration,
            Self::SevereDehydration,
        ]
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Maintenance => "maintenance",
            Self::Resuscitation => "resuscitation",
            Self::MildDehydration => "mild dehydration (5%)",
            Self::ModerateDehydration => "moderate dehydration (10%)",
            Self::SevereDehydration => "severe dehydration (15%)",
        };
        f.write_str(label)
    }
}

impl FromStr for Scenario {
    type Err = InvalidInputError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "maintenance" | "maint" => Ok(Self::Maintenance),
            "resuscitation" | "resus" | "bolus" => Ok(Self::Resuscitation),
            "mild" | "mild-dehydration" => Ok(Self::MildDehydration),
            "moderate" | "moderate-dehydration" => Ok(Self::ModerateDehydration),
            "severe" | "severe-dehydration" => Ok(Self::SevereDehydration),
            other => Err(invalid(
                "scenario",
                format!("'{other}'; expected maintenance, resuscitation, mild, moderate, or severe"),
            )),
        }
    }
}

/// Holliday-Segar maintenance: 100 mL/kg for the first 10 kg, 50 mL/kg for
/// the next 10 kg, 20 mL/kg beyond 20 kg, per day.
pub fn maintenance(patient: &Patient) -> MaintenancePlan {
    let weight = patient.weight_kg;
    let ml_per_day = if weight <= 10.0 {
        weight * 100.0
    } else if weight <= 20.0 {
        1000.0 + (weight - 10.0) * 50.0
    } else {
        1500.0 + (weight - 20.0) * 20.0
    };
    MaintenancePlan {
        ml_per_day,
        ml_per_hour: ml_per_day / 24.0,
    }
}

/// Resuscitation: 20 mL/kg, single rapid bolus.
pub fn resuscitation(patient: &Patient) -> BolusPlan {
    BolusPlan {
        bolus_ml: patient.weight_kg * 20.0,
    }
}

/// Deficit: weight x percent of body weight, replaced over 24 hours on top
/// of maintenance. Accepts 0 < percent <= 20.
pub fn deficit(patient: &Patient, dehydration_percent: f64) -> Result<DeficitPlan, InvalidInputError> {
    if !dehydration_percent.is_finite()
        || dehydration_percent <= 0.0
        || dehydration_percent > 20.0
    {
        return Err(invalid(
            "dehydration_percent",
            format!("{dehydration_percent}%; must be within (0, 20]"),
        ));
    }
    let deficit_ml = patient.weight_kg * (dehydration_percent / 100.0) * 1000.0;
    let replacement_ml_per_hour = deficit_ml / 24.0;
    let maintenance = maintenance(patient);
    Ok(DeficitPlan {
        dehydration_percent,
        deficit_ml,
        replacement_ml_per_hour,
        maintenance,
        total_ml_per_hour: replacement_ml_per_hour + maintenance.ml_per_hour,
        total_ml_per_day: deficit_ml + maintenance.ml_per_day,
    })
}

/// Computes the plan for one scenario.
pub fn plan_for(patient: &Patient, scenario: Scenario) -> FluidPlan {
    match scenario {
        Scenario::Maintenance => FluidPlan::Maintenance(maintenance(patient)),
        Scenario::Resuscitation => FluidPlan::Resuscitation(resuscitation(patient)),
        _ => {
            let percent = scenario
                .dehydration_percent()
                .expect("deficit scenarios carry a percentage");
            let plan = deficit(patient, percent)
                .expect("fixed scenario percentages are within range");
            FluidPlan::Deficit(plan)
        }
    }
}

/// Computes every scenario for side-by-side comparison.
pub fn all_scenarios(patient: &Patient) -> Vec<(Scenario, FluidPlan)> {
    Scenario::all()
        .into_iter()
        .map(|scenario| (scenario, plan_for(patient, scenario)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(weight: f64) -> Patient {
        Patient::new(weight, 5.0).expect("valid patient")
    }

    #[test]
    fn maintenance_matches_holliday_segar_bands() {
        let plan = maintenance(&patient(15.0));
        assert!((plan.ml_per_day - 1250.0).abs() < 1e-9);
        assert!((plan.ml_per_hour - 52.0833).abs() < 1e-3);

        let small = maintenance(&patient(8.0));
        assert!((small.ml_per_day - 800.0).abs() < 1e-9);

        let large = maintenance(&patient(30.0));
        assert!((large.ml_per_day - 1700.0).abs() < 1e-9);
    }

    #[test]
    fn band_edges_are_continuous() {
        let at_ten = maintenance(&patient(10.0));
        assert!((at_ten.ml_per_day - 1000.0).abs() < 1e-9);
        let at_twenty = maintenance(&patient(20.0));
        assert!((at_twenty.ml_per_day - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn resuscitation_is_twenty_ml_per_kg() {
        let plan = resuscitation(&patient(10.0));
        assert!((plan.bolus_ml - 200.0).abs() < 1e-9);
    }

    #[test]
    fn ten_percent_deficit_for_eight_kg() {
        let plan = deficit(&patient(8.0), 10.0).expect("plan");
        assert!((plan.deficit_ml - 800.0).abs() < 1e-9);
        assert!((plan.total_ml_per_day - (800.0 + 800.0)).abs() < 1e-9);
        assert!(
            (plan.total_ml_per_hour - (800.0 / 24.0 + 800.0 / 24.0)).abs() < 1e-9
        );
    }

    #[test]
    fn negative_weight_names_the_field() {
        let err = Patient::new(-1.0, 5.0).expect_err("rejected");
        assert_eq!(err.field, "weight");
    }

    #[test]
    fn zero_age_names_the_field() {
        let err = Patient::new(12.0, 0.0).expect_err("rejected");
        assert_eq!(err.field, "age");
    }

    #[test]
    fn out_of_range_percent_is_rejected() {
        let err = deficit(&patient(10.0), 25.0).expect_err("rejected");
        assert_eq!(err.field, "dehydration_percent");
    }

    #[test]
    fn scenario_parsing_accepts_shorthand() {
        assert_eq!(
            "resus".parse::<Scenario>().expect("parse"),
            Scenario::Resuscitation
        );
        assert_eq!(
            "Moderate".parse::<Scenario>().expect("parse"),
            Scenario::ModerateDehydration
        );
        assert!("driest".parse::<Scenario>().is_err());
    }

    #[test]
    fn same_inputs_same_outputs() {
        let a = plan_for(&patient(13.4), Scenario::SevereDehydration);
        let b = plan_for(&patient(13.4), Scenario::SevereDehydration);
        assert_eq!(a, b);
        assert_eq!(all_scenarios(&patient(13.4)).len(), 5);
    }
}
