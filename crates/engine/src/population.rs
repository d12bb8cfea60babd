//! Fixed-size population with elitism, uniform crossover and mutation

use rand::seq::index;
use rand::Rng;
use tracing::trace;

use crate::backtest::Backtester;
use crate::error::{EngineError, EngineResult};
use crate::genome::{Genome, GenomeFactory};
use crate::types::Candle;

#[derive(Debug, Clone)]
pub struct Population {
    genomes: Vec<Genome>,
    elite_size: usize,
}

impl Population {
    /// Seed `size / factories.len()` genomes from each factory
    pub fn new<R: Rng + ?Sized>(
        size: usize,
        elite_size: usize,
        factories: &[GenomeFactory],
        rng: &mut R,
    ) -> EngineResult<Self> {
        if factories.is_empty() {
            return Err(EngineError::EmptyPopulation);
        }
        let per_factory = size / factories.len();
        let mut genomes = Vec::with_capacity(per_factory * factories.len());
        for factory in factories {
            for _ in 0..per_factory {
                genomes.push(factory.create(rng));
            }
        }
        Self::from_genomes(genomes, elite_size)
    }

    pub fn from_genomes(genomes: Vec<Genome>, elite_size: usize) -> EngineResult<Self> {
        if genomes.is_empty() {
            return Err(EngineError::EmptyPopulation);
        }
        Ok(Self {
            genomes,
            elite_size,
        })
    }

    pub fn genomes(&self) -> &[Genome] {
        &self.genomes
    }

    pub fn len(&self) -> usize {
        self.genomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genomes.is_empty()
    }

    /// Score every genome. Failed or NaN backtests score negative infinity.
    /// Returns the number of genomes whose backtest failed.
    pub fn evaluate(&mut self, backtester: &Backtester, candles: &[Candle]) -> usize {
        let mut failed = 0;
        for genome in &mut self.genomes {
            let fitness = match backtester.run(genome, candles) {
                Ok(report) if !report.fitness.is_nan() => report.fitness,
                Ok(_) => f64::NEG_INFINITY,
                Err(e) => {
                    trace!(strategy = %genome.strategy_type, error = %e, "Genome evaluation failed");
                    failed += 1;
                    f64::NEG_INFINITY
                }
            };
            genome.fitness = Some(fitness);
        }
        failed
    }

    /// Best `k` genomes, highest fitness first
    pub fn select_parents(&self, k: usize) -> Vec<Genome> {
        let mut ranked = self.genomes.clone();
        sort_by_fitness(&mut ranked);
        ranked.truncate(k);
        ranked
    }

    /// Uniform crossover of two same-family parents.
    ///
    /// Parents of different families cannot be mixed; the child is then a
    /// copy of `p1`.
    pub fn crossover<R: Rng + ?Sized>(p1: &Genome, p2: &Genome, rng: &mut R) -> Genome {
        if p1.strategy_type != p2.strategy_type {
            return Genome::new(p1.strategy_type, p1.params.clone());
        }
        let params = p1
            .params
            .iter()
            .map(|(name, &v1)| {
                let value = match p2.params.get(name) {
                    Some(&v2) if !rng.gen_bool(0.5) => v2,
                    _ => v1,
                };
                (name.clone(), value)
            })
            .collect();
        Genome::new(p1.strategy_type, params)
    }

    /// Replace the population with the elites plus mutated offspring of
    /// `parents`, keeping the current size
    pub fn generate_new_population<R: Rng + ?Sized>(
        &mut self,
        parents: &[Genome],
        mutation_rate: f64,
        rng: &mut R,
    ) -> EngineResult<()> {
        if parents.is_empty() {
            return Err(EngineError::EmptyPopulation);
        }
        let size = self.genomes.len();
        sort_by_fitness(&mut self.genomes);

        let mut next: Vec<Genome> = self
            .genomes
            .iter()
            .take(self.elite_size.min(size))
            .cloned()
            .collect();

        while next.len() < size {
            let (p1, p2) = if parents.len() == 1 {
                (&parents[0], &parents[0])
            } else {
                let picked = index::sample(rng, parents.len(), 2);
                (&parents[picked.index(0)], &parents[picked.index(1)])
            };
            let mut child = Self::crossover(p1, p2, rng);
            child.mutate(mutation_rate, rng);
            next.push(child);
        }

        self.genomes = next;
        Ok(())
    }

    /// Highest-fitness genome; the first of equal maxima wins
    pub fn best(&self) -> Option<&Genome> {
        self.genomes.iter().fold(None, |best: Option<&Genome>, g| match best {
            Some(b) if b.rank_fitness() >= g.rank_fitness() => Some(b),
            _ => Some(g),
        })
    }

    /// Mean over evaluated genomes with a finite score
    pub fn mean_fitness(&self) -> Option<f64> {
        let scores: Vec<f64> = self
            .genomes
            .iter()
            .filter_map(|g| g.fitness)
            .filter(|f| f.is_finite())
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}

/// Stable descending sort; unevaluated genomes rank last
fn sort_by_fitness(genomes: &mut [Genome]) {
    genomes.sort_by(|a, b| {
        b.fitness
            .is_some()
            .cmp(&a.fitness.is_some())
            .then_with(|| b.rank_fitness().total_cmp(&a.rank_fitness()))
    });
}
