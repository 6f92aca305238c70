//! Sampler convergence diagnostics
//!
//! Split-chain potential scale reduction (R̂) and effective sample size,
//! computed per monitored parameter. Thresholds follow common practice:
//! R̂ above 1.05 or a total ESS below 100 marks a fit unreliable. Failing
//! the thresholds never discards the fit: the result is flagged and the
//! caller decides whether to re-run with more iterations.

/// R̂ above this marks a parameter as non-converged.
pub const RHAT_THRESHOLD: f64 = 1.05;

/// Total effective sample size below this marks a parameter as
/// under-sampled.
pub const ESS_THRESHOLD: f64 = 100.0;

/// Convergence metrics for one monitored parameter.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    /// Parameter name as reported in the posterior summary
    pub name: String,
    /// Split-chain potential scale reduction factor
    pub rhat: f64,
    /// Effective sample size summed over chains
    pub ess: f64,
}

impl Diagnostic {
    /// Whether this parameter passes both thresholds.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.rhat <= RHAT_THRESHOLD && self.ess >= ESS_THRESHOLD
    }
}

/// Split-chain R̂ (Gelman–Rubin with each chain halved).
///
/// Each input chain is split in half so within-chain drift shows up as
/// between-segment variance. Returns 1.0 for degenerate inputs (a single
/// short segment or zero variance everywhere): a constant chain has
/// nothing left to converge.
#[must_use]
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    let segments: Vec<&[f64]> = chains
        .iter()
        .flat_map(|chain| {
            let half = chain.len() / 2;
            [&chain[..half], &chain[half..half * 2]]
        })
        .filter(|segment| segment.len() >= 2)
        .collect();

    let m = segments.len() as f64;
    if segments.len() < 2 {
        return 1.0;
    }
    let n = segments.iter().map(|s| s.len()).min().unwrap_or(0) as f64;

    let segment_means: Vec<f64> = segments.iter().map(|s| mean(s)).collect();
    let grand_mean = mean(&segment_means);
    let b = n / (m - 1.0)
        * segment_means
            .iter()
            .map(|&x| (x - grand_mean).powi(2))
            .sum::<f64>();
    let w = segments
        .iter()
        .map(|s| variance(s))
        .sum::<f64>()
        / m;

    if w <= 0.0 {
        return 1.0;
    }
    let var_plus = (n - 1.0) / n * w + b / n;
    (var_plus / w).sqrt()
}

/// Effective sample size summed over chains.
///
/// Per chain: n / (1 + 2·Σρ_t), truncating the autocorrelation sum at the
/// first non-positive lag (initial positive sequence estimator).
#[must_use]
pub fn effective_sample_size(chains: &[Vec<f64>]) -> f64 {
    chains.iter().map(|chain| chain_ess(chain)).sum()
}

fn chain_ess(chain: &[f64]) -> f64 {
    let n = chain.len();
    if n < 4 {
        return n as f64;
    }
    let mu = mean(chain);
    let var = chain.iter().map(|&x| (x - mu).powi(2)).sum::<f64>() / n as f64;
    if var <= 0.0 {
        return n as f64;
    }

    let mut acf_sum = 0.0;
    for lag in 1..n / 2 {
        let mut acov = 0.0;
        for t in 0..n - lag {
            acov += (chain[t] - mu) * (chain[t + lag] - mu);
        }
        let rho = acov / (n as f64 * var);
        if rho <= 0.0 {
            break;
        }
        acf_sum += rho;
    }

    (n as f64 / (1.0 + 2.0 * acf_sum)).min(n as f64)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    let mu = mean(values);
    values.iter().map(|&x| (x - mu).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rhat_near_one_for_identical_chains() {
        let chain: Vec<f64> = (0..200).map(|i| ((i * 37) % 100) as f64 / 100.0).collect();
        let rhat = split_rhat(&[chain.clone(), chain]);
        assert!(rhat < 1.05, "rhat = {rhat}");
    }

    #[test]
    fn test_rhat_large_for_shifted_chains() {
        let a: Vec<f64> = (0..200).map(|i| ((i * 37) % 100) as f64 / 100.0).collect();
        let b: Vec<f64> = a.iter().map(|x| x + 50.0).collect();
        let rhat = split_rhat(&[a, b]);
        assert!(rhat > 2.0, "rhat = {rhat}");
    }

    #[test]
    fn test_rhat_degenerate_inputs() {
        assert_eq!(split_rhat(&[]), 1.0);
        assert_eq!(split_rhat(&[vec![1.0, 1.0, 1.0, 1.0]]), 1.0);
    }

    #[test]
    fn test_ess_near_n_for_uncorrelated_draws() {
        // A multiplicative hash scramble has essentially no lag correlation.
        let chain: Vec<f64> = (0..500u64)
            .map(|i| (i.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 33) as f64)
            .collect();
        let ess = effective_sample_size(&[chain]);
        assert!(ess > 250.0, "ess = {ess}");
    }

    #[test]
    fn test_ess_small_for_sticky_chain() {
        // Near-constant blocks: heavy autocorrelation.
        let chain: Vec<f64> = (0..500).map(|i| (i / 100) as f64).collect();
        let ess = effective_sample_size(&[chain]);
        assert!(ess < 50.0, "ess = {ess}");
    }

    #[test]
    fn test_diagnostic_thresholds() {
        let good = Diagnostic {
            name: "sigma".to_string(),
            rhat: 1.01,
            ess: 800.0,
        };
        let bad = Diagnostic {
            name: "sigma_A".to_string(),
            rhat: 1.2,
            ess: 800.0,
        };
        assert!(good.converged());
        assert!(!bad.converged());
    }
}
