//! Genetic search over strategy parameters

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backtest::Backtester;
use crate::error::{EngineError, EngineResult};
use crate::genome::{Genome, GenomeFactory};
use crate::population::Population;
use crate::types::Candle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaConfig {
    pub population_size: usize,
    /// Top genomes copied unchanged into every new generation
    pub elite_size: usize,
    pub generations: usize,
    /// Per-parameter mutation probability
    pub mutation_rate: f64,
    /// Number of top genomes allowed to breed
    pub parent_count: usize,
    pub factories: Vec<GenomeFactory>,
}

impl Default for GaConfig {
    fn default() -> Self {
        Self {
            population_size: 80,
            elite_size: 10,
            generations: 30,
            mutation_rate: 0.2,
            parent_count: 10,
            factories: vec![GenomeFactory::mean_reversion(), GenomeFactory::breakout()],
        }
    }
}

impl GaConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if self.factories.is_empty() {
            return invalid("at least one genome factory is required".into());
        }
        if self.population_size < self.factories.len() {
            return invalid(format!(
                "population_size {} cannot seed {} factories",
                self.population_size,
                self.factories.len()
            ));
        }
        if self.elite_size == 0 {
            // Offspring are unscored; only elites carry a fitness forward
            return invalid("elite_size must be at least 1".into());
        }
        if self.elite_size > self.population_size {
            return invalid(format!(
                "elite_size {} exceeds population_size {}",
                self.elite_size, self.population_size
            ));
        }
        if self.parent_count == 0 {
            return invalid("parent_count must be at least 1".into());
        }
        if self.generations == 0 {
            return invalid("generations must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return invalid(format!(
                "mutation_rate {} is outside [0, 1]",
                self.mutation_rate
            ));
        }
        for factory in &self.factories {
            if let Some((name, _)) = factory.ranges.iter().find(|(_, r)| !r.is_valid()) {
                return invalid(format!(
                    "range of {} for {} is empty or not finite",
                    name, factory.strategy_type
                ));
            }
        }
        Ok(())
    }
}

/// Summary of one evaluated generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: usize,
    pub best_fitness: f64,
    pub mean_fitness: Option<f64>,
    pub failed_genomes: usize,
}

pub struct GaEngine {
    config: GaConfig,
    backtester: Backtester,
}

impl GaEngine {
    pub fn new(config: GaConfig, backtester: Backtester) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config, backtester })
    }

    pub fn config(&self) -> &GaConfig {
        &self.config
    }

    pub fn backtester(&self) -> &Backtester {
        &self.backtester
    }

    /// Evolve a fresh population over `candles` and return the champion
    pub fn evolve<R: Rng + ?Sized>(&self, candles: &[Candle], rng: &mut R) -> EngineResult<Genome> {
        self.evolve_with_history(candles, rng)
            .map(|(champion, _)| champion)
    }

    pub fn evolve_with_history<R: Rng + ?Sized>(
        &self,
        candles: &[Candle],
        rng: &mut R,
    ) -> EngineResult<(Genome, Vec<GenerationStats>)> {
        let cfg = &self.config;
        let mut population = Population::new(
            cfg.population_size,
            cfg.elite_size,
            &cfg.factories,
            rng,
        )?;
        let mut history = Vec::with_capacity(cfg.generations);

        for generation in 0..cfg.generations {
            let failed_genomes = population.evaluate(&self.backtester, candles);
            let stats = GenerationStats {
                generation,
                best_fitness: population
                    .best()
                    .map_or(f64::NEG_INFINITY, Genome::rank_fitness),
                mean_fitness: population.mean_fitness(),
                failed_genomes,
            };
            debug!(
                generation,
                best = stats.best_fitness,
                mean = ?stats.mean_fitness,
                failed = failed_genomes,
                "Generation evaluated"
            );
            history.push(stats);

            let parents = population.select_parents(cfg.parent_count);
            population.generate_new_population(&parents, cfg.mutation_rate, rng)?;
        }

        let champion = population
            .best()
            .cloned()
            .ok_or(EngineError::EmptyPopulation)?;
        Ok((champion, history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StrategyType;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn make_candles(prices: &[f64]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Candle {
                open_time: (i as i64) * 900_000,
                open: p,
                high: p,
                low: p,
                close: p,
                volume: 1000.0,
                close_time: ((i + 1) as i64) * 900_000 - 1,
            })
            .collect()
    }

    fn sawtooth() -> Vec<Candle> {
        let prices: Vec<f64> = (0..200)
            .map(|i| 105.0 - 10.0 * (i % 20) as f64 / 19.0)
            .collect();
        make_candles(&prices)
    }

    fn small_config() -> GaConfig {
        GaConfig {
            population_size: 20,
            elite_size: 4,
            generations: 5,
            parent_count: 6,
            factories: vec![
                GenomeFactory::mean_reversion().with_range("window", 10.0, 10.0),
                GenomeFactory::breakout(),
            ],
            ..GaConfig::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(GaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let cases = [
            GaConfig {
                factories: vec![],
                ..GaConfig::default()
            },
            GaConfig {
                elite_size: 81,
                ..GaConfig::default()
            },
            GaConfig {
                elite_size: 0,
                ..GaConfig::default()
            },
            GaConfig {
                parent_count: 0,
                ..GaConfig::default()
            },
            GaConfig {
                generations: 0,
                ..GaConfig::default()
            },
            GaConfig {
                mutation_rate: 1.5,
                ..GaConfig::default()
            },
            GaConfig {
                population_size: 1,
                ..GaConfig::default()
            },
            GaConfig {
                factories: vec![GenomeFactory::breakout().with_range("rr", 3.0, 1.0)],
                ..GaConfig::default()
            },
        ];
        for cfg in cases {
            assert!(
                matches!(cfg.validate(), Err(EngineError::InvalidConfig(_))),
                "{cfg:?}"
            );
            assert!(GaEngine::new(cfg, Backtester::default()).is_err());
        }
    }

    #[test]
    fn test_evolve_is_deterministic_for_a_seed() {
        let engine = GaEngine::new(small_config(), Backtester::default()).unwrap();
        let candles = sawtooth();
        let a = engine.evolve(&candles, &mut StdRng::seed_from_u64(99)).unwrap();
        let b = engine.evolve(&candles, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_best_fitness_never_regresses() {
        let engine = GaEngine::new(small_config(), Backtester::default()).unwrap();
        let (champion, history) = engine
            .evolve_with_history(&sawtooth(), &mut StdRng::seed_from_u64(4))
            .unwrap();
        assert_eq!(history.len(), 5);
        for pair in history.windows(2) {
            assert!(pair[1].best_fitness >= pair[0].best_fitness);
        }
        assert_eq!(champion.fitness, Some(history[4].best_fitness));
    }

    #[test]
    fn test_sawtooth_champion_is_mean_reversion() {
        let config = GaConfig {
            factories: small_config().factories,
            ..GaConfig::default()
        };
        let engine = GaEngine::new(config, Backtester::default()).unwrap();
        let champion = engine
            .evolve(&sawtooth(), &mut StdRng::seed_from_u64(2024))
            .unwrap();
        assert_eq!(champion.strategy_type, StrategyType::MeanReversion);
        assert!(champion.fitness.unwrap() > 0.0);
    }

    #[test]
    fn test_unusable_data_yields_unscored_champion() {
        // Without mutation the pinned window keeps every genome's warm-up
        // longer than the series
        let config = GaConfig {
            mutation_rate: 0.0,
            ..small_config()
        };
        let engine = GaEngine::new(config, Backtester::default()).unwrap();
        let candles = make_candles(&[100.0; 12]);
        let (champion, history) = engine
            .evolve_with_history(&candles, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(champion.rank_fitness(), f64::NEG_INFINITY);
        assert!(history.iter().all(|s| s.failed_genomes == 20));
        assert!(history.iter().all(|s| s.mean_fitness.is_none()));
    }

    #[test]
    fn test_champion_is_always_scored() {
        let config = GaConfig {
            elite_size: 1,
            ..small_config()
        };
        let engine = GaEngine::new(config, Backtester::default()).unwrap();
        let champion = engine
            .evolve(&sawtooth(), &mut StdRng::seed_from_u64(11))
            .unwrap();
        assert!(champion.fitness.is_some());

        let no_elites = GaConfig {
            elite_size: 0,
            ..small_config()
        };
        assert!(matches!(
            GaEngine::new(no_elites, Backtester::default()),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
