//! Demand scenario generation.
//!
//! Turns one baseline forecast into the ordered scenario ensemble the robust
//! optimizer solves: quantile scenarios first (when every store carries all
//! three quantiles), then ratio scenarios, then Monte Carlo samples. With
//! confidence bounds enabled the ensemble is instead exactly low/base/high.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, warn};

use crate::config::ScenarioConfig;
use crate::error::PlannerError;
use crate::model::{DemandScenario, StoreDemand};

/// Relative probabilities of the low/base/high confidence scenarios.
pub const CONFIDENCE_WEIGHTS: [f64; 3] = [0.1, 0.8, 0.1];

#[derive(Debug, Clone)]
pub struct ScenarioGenerator {
    config: ScenarioConfig,
}

impl ScenarioGenerator {
    pub fn new(config: ScenarioConfig) -> Result<Self, PlannerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Builds the full ensemble. `baseline` is only read.
    pub fn generate(&self, baseline: &[StoreDemand]) -> Vec<DemandScenario> {
        if self.config.use_confidence_bounds {
            return self.confidence_scenarios(baseline);
        }

        let quantiles = self.quantile_scenarios(baseline);
        let ratios = self.ratio_scenarios(baseline);
        let samples = self.monte_carlo_scenarios(baseline);
        debug!(
            quantile = quantiles.len(),
            ratio = ratios.len(),
            monte_carlo = samples.len(),
            "Generated demand scenarios"
        );

        quantiles.into_iter().chain(ratios).chain(samples).collect()
    }

    /// One scenario per configured ratio, named `ratio_0.90` etc.
    pub fn ratio_scenarios(&self, baseline: &[StoreDemand]) -> Vec<DemandScenario> {
        self.config
            .demand_ratios
            .iter()
            .enumerate()
            .map(|(i, &ratio)| DemandScenario {
                id: format!("ratio_{:.2}", ratio),
                demands: self.scaled(baseline, |store| store.demand * ratio),
                ratio: Some(ratio),
                weight: self
                    .config
                    .scenario_weights
                    .as_ref()
                    .and_then(|weights| weights.get(i).copied()),
            })
            .collect()
    }

    /// `quantile_low`, `quantile_mid` and `quantile_high`, or nothing when
    /// any store lacks quantiles.
    pub fn quantile_scenarios(&self, baseline: &[StoreDemand]) -> Vec<DemandScenario> {
        if baseline.is_empty() || baseline.iter().any(|store| store.quantiles.is_none()) {
            return Vec::new();
        }

        [("low", 0), ("mid", 1), ("high", 2)]
            .into_iter()
            .map(|(key, slot)| DemandScenario {
                id: format!("quantile_{}", key),
                demands: self.scaled(baseline, |store| {
                    store.quantiles.map_or(store.demand, |q| match slot {
                        0 => q.low,
                        1 => q.mid,
                        _ => q.high,
                    })
                }),
                ratio: None,
                weight: None,
            })
            .collect()
    }

    /// Up to `monte_carlo_max_samples` scenarios, each scaling every store by
    /// one ratio drawn from Normal(1, σ) and clipped to the ratio band.
    pub fn monte_carlo_scenarios(&self, baseline: &[StoreDemand]) -> Vec<DemandScenario> {
        let count = self
            .config
            .monte_carlo_samples
            .min(self.config.monte_carlo_max_samples);
        if count == 0 {
            return Vec::new();
        }

        let Ok(normal) = Normal::new(1.0, self.config.monte_carlo_std) else {
            warn!(
                std = self.config.monte_carlo_std,
                "Invalid Monte Carlo deviation, skipping samples"
            );
            return Vec::new();
        };
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (low, high) = self.config.ratio_band;

        (0..count)
            .map(|i| {
                let ratio = normal.sample(&mut rng).clamp(low, high);
                DemandScenario {
                    id: format!("mc_{}", i + 1),
                    demands: self.scaled(baseline, |store| store.demand * ratio),
                    ratio: Some(ratio),
                    weight: None,
                }
            })
            .collect()
    }

    /// `ci_low`, `ci_base` and `ci_high` from per-store bounds. A store
    /// without a bound uses its point forecast for that side.
    pub fn confidence_scenarios(&self, baseline: &[StoreDemand]) -> Vec<DemandScenario> {
        let low = DemandScenario {
            id: "ci_low".to_string(),
            demands: self.scaled(baseline, |store| store.lower_bound.unwrap_or(store.demand)),
            ratio: None,
            weight: Some(CONFIDENCE_WEIGHTS[0]),
        };
        let base = DemandScenario {
            id: "ci_base".to_string(),
            demands: self.scaled(baseline, |store| store.demand),
            ratio: Some(1.0),
            weight: Some(CONFIDENCE_WEIGHTS[1]),
        };
        let high = DemandScenario {
            id: "ci_high".to_string(),
            demands: self.scaled(baseline, |store| store.upper_bound.unwrap_or(store.demand)),
            ratio: None,
            weight: Some(CONFIDENCE_WEIGHTS[2]),
        };
        vec![low, base, high]
    }

    /// `1 + weight * (feature - 0.5)` clipped to the feature band; 1 when
    /// the store has no feature or the weight is zero.
    pub fn feature_scale(&self, store: &StoreDemand) -> f64 {
        let (low, high) = self.config.feature_band;
        match store.feature_score {
            Some(feature) if self.config.feature_weight != 0.0 => {
                (1.0 + self.config.feature_weight * (feature - 0.5)).clamp(low, high)
            }
            _ => 1.0,
        }
    }

    fn scaled(
        &self,
        baseline: &[StoreDemand],
        demand: impl Fn(&StoreDemand) -> f64,
    ) -> BTreeMap<String, f64> {
        baseline
            .iter()
            .map(|store| {
                let value = (demand(store) * self.feature_scale(store)).max(0.0);
                (store.store_id.clone(), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(config: ScenarioConfig) -> ScenarioGenerator {
        ScenarioGenerator::new(config).unwrap()
    }

    #[test]
    fn test_feature_scale_is_clipped() {
        let generator = generator(ScenarioConfig {
            feature_weight: 1.0,
            ..ScenarioConfig::default()
        });
        assert_eq!(generator.feature_scale(&StoreDemand::new("A", 10.0).feature(1.0)), 1.2);
        assert_eq!(generator.feature_scale(&StoreDemand::new("A", 10.0).feature(0.0)), 0.8);
        assert_eq!(generator.feature_scale(&StoreDemand::new("A", 10.0)), 1.0);
    }

    #[test]
    fn test_feature_adjustment_applies_to_every_scenario() {
        let generator = generator(ScenarioConfig::default());
        let baseline = vec![StoreDemand::new("A", 100.0).feature(1.0)];

        // 1 + 0.15 * 0.5 = 1.075
        for scenario in generator.generate(&baseline) {
            let ratio = scenario.ratio.unwrap();
            let expected = 100.0 * ratio * 1.075;
            assert!((scenario.demands["A"] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_quantiles_skipped_when_any_store_lacks_them() {
        let generator = generator(ScenarioConfig::default());
        let baseline = vec![
            StoreDemand::new("A", 10.0).quantiles(8.0, 10.0, 13.0),
            StoreDemand::new("B", 10.0),
        ];
        assert!(generator.quantile_scenarios(&baseline).is_empty());
    }

    #[test]
    fn test_quantile_scenarios_come_first() {
        let generator = generator(ScenarioConfig::default());
        let baseline = vec![StoreDemand::new("A", 10.0).quantiles(8.0, 10.0, 13.0)];

        let ids: Vec<String> = generator
            .generate(&baseline)
            .into_iter()
            .map(|scenario| scenario.id)
            .collect();
        assert_eq!(
            ids,
            vec![
                "quantile_low",
                "quantile_mid",
                "quantile_high",
                "ratio_0.90",
                "ratio_1.00",
                "ratio_1.10",
            ]
        );
    }

    #[test]
    fn test_negative_demand_floored() {
        let generator = generator(ScenarioConfig {
            use_confidence_bounds: true,
            ..ScenarioConfig::default()
        });
        let baseline = vec![StoreDemand::new("A", 5.0).bounds(-3.0, 9.0)];
        let scenarios = generator.generate(&baseline);
        assert_eq!(scenarios[0].demands["A"], 0.0);
        assert_eq!(scenarios[2].demands["A"], 9.0);
    }

    #[test]
    fn test_seeded_monte_carlo_repeats() {
        let config = ScenarioConfig {
            demand_ratios: Vec::new(),
            monte_carlo_samples: 5,
            seed: Some(42),
            ..ScenarioConfig::default()
        };
        let baseline = vec![StoreDemand::new("A", 10.0)];
        let first = generator(config.clone()).generate(&baseline);
        let second = generator(config).generate(&baseline);
        assert_eq!(first, second);
    }
}
