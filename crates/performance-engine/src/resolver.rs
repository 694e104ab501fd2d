use perf_core::{normalize_ticker, ResolvedPortfolio, SkipReason, SkippedPortfolio, WeightRecord};
use std::collections::{BTreeMap, BTreeSet};

/// Result of resolving a whole composition file.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub portfolios: BTreeMap<String, ResolvedPortfolio>,
    pub skipped: Vec<SkippedPortfolio>,
}

impl Resolution {
    pub fn get(&self, name: &str) -> Option<&ResolvedPortfolio> {
        self.portfolios.get(name.trim())
    }

    pub fn skip_reason(&self, name: &str) -> Option<&SkipReason> {
        self.skipped
            .iter()
            .find(|s| s.portfolio == name.trim())
            .map(|s| &s.reason)
    }
}

pub struct CompositionResolver;

impl CompositionResolver {
    /// Turn raw weight records into one normalized weight vector per portfolio.
    ///
    /// Portfolios that cannot be resolved are reported in `skipped` and never
    /// abort the others.
    pub fn resolve(records: &[WeightRecord], available_tickers: &BTreeSet<String>) -> Resolution {
        let available: BTreeSet<String> = available_tickers
            .iter()
            .map(|t| normalize_ticker(t))
            .collect();

        let mut groups: BTreeMap<String, Vec<&WeightRecord>> = BTreeMap::new();
        for record in records {
            let name = record.portfolio_name.trim();
            if name.is_empty() {
                continue;
            }
            groups.entry(name.to_string()).or_default().push(record);
        }

        let mut resolution = Resolution::default();
        for (name, group) in groups {
            match Self::resolve_group(&name, &group, &available) {
                Ok(portfolio) => {
                    if !portfolio.dropped.is_empty() {
                        tracing::warn!(
                            "{}: tickers without prices dropped and weights renormalized: {:?}",
                            name,
                            portfolio.dropped
                        );
                    }
                    resolution.portfolios.insert(name, portfolio);
                }
                Err(reason) => {
                    tracing::warn!("{}: skipped ({})", name, reason);
                    resolution.skipped.push(SkippedPortfolio {
                        portfolio: name,
                        reason,
                    });
                }
            }
        }
        resolution
    }

    /// Records of the group sharing its most recent as-of date.
    pub fn active_records<'a>(group: &[&'a WeightRecord]) -> Vec<&'a WeightRecord> {
        let Some(latest) = group.iter().filter_map(|r| r.as_of_date).max() else {
            return Vec::new();
        };
        group
            .iter()
            .copied()
            .filter(|r| r.as_of_date == Some(latest))
            .collect()
    }

    /// Symbols of a ticker cell: split on `;` or `,`, trimmed, upper-cased.
    pub fn split_tickers(cell: &str) -> Vec<String> {
        cell.split([';', ','])
            .map(normalize_ticker)
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Per-symbol weights before renormalization. A multi-symbol cell splits
    /// its weight evenly; repeated symbols add up.
    pub fn expand_weights<'a>(
        records: impl IntoIterator<Item = &'a WeightRecord>,
    ) -> BTreeMap<String, f64> {
        let mut weights: BTreeMap<String, f64> = BTreeMap::new();
        for record in records {
            let symbols = Self::split_tickers(&record.ticker);
            if symbols.is_empty() {
                continue;
            }
            let weight = if record.weight.is_finite() && record.weight > 0.0 {
                record.weight
            } else {
                0.0
            };
            let share = weight / symbols.len() as f64;
            for symbol in symbols {
                *weights.entry(symbol).or_insert(0.0) += share;
            }
        }
        weights
    }

    fn resolve_group(
        name: &str,
        group: &[&WeightRecord],
        available: &BTreeSet<String>,
    ) -> Result<ResolvedPortfolio, SkipReason> {
        let active = Self::active_records(group);
        if active.is_empty() {
            return Err(SkipReason::NoDatedRecords);
        }

        let weights = Self::expand_weights(active);
        if weights.is_empty() {
            return Err(SkipReason::NoWeights);
        }

        let (kept, dropped): (BTreeMap<String, f64>, BTreeMap<String, f64>) = weights
            .into_iter()
            .partition(|(ticker, _)| available.contains(ticker));
        let dropped: Vec<String> = dropped.into_keys().collect();

        if kept.is_empty() {
            return Err(SkipReason::NoAvailableTickers { missing: dropped });
        }

        let total: f64 = kept.values().sum();
        if total <= 0.0 {
            return Err(SkipReason::ZeroWeight);
        }

        Ok(ResolvedPortfolio {
            name: name.to_string(),
            weights: kept.into_iter().map(|(t, w)| (t, w / total)).collect(),
            dropped,
        })
    }
}
