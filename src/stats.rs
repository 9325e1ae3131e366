use statrs::distribution::{ContinuousCDF, Normal};

/// Two-tailed normal quantile `z(p) = Φ⁻¹(1 - p/2)`, the inverse relation
/// used to move between `beta`, `SE` and `pval`. Backed by `statrs`'s
/// `Normal` distribution, the same crate and API shape the closest sibling
/// tool in the wider corpus uses for its own p-value-to-z-score transform.
fn normal_z_two_tailed(p: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).expect("standard normal is always valid");
    normal.inverse_cdf(1.0 - p / 2.0)
}

/// Two-tailed p-value from a z-score: `p = 2·(1 - Φ(z))`.
fn normal_p_two_tailed(z: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).expect("standard normal is always valid");
    2.0 * (1.0 - normal.cdf(z.abs()))
}

/// `SE = |β| / z(p)`. Returns `NaN` when `p = 1` (`z = 0`), matching the
/// spec's "numeric degeneracy leaves the field as sentinel" contract —
/// callers must check `is_finite()` before writing the result.
pub fn resolve_se(beta: f64, pval: f64) -> f64 {
    let z = normal_z_two_tailed(pval);
    if z == 0.0 {
        return f64::NAN;
    }
    beta.abs() / z
}

/// `β = SE · z(p)`, unsigned — sign is not recoverable from `(SE, p)`
/// alone. Activating this resolver requires a caller-visible warning (see
/// the orchestrator), per the spec's explicit design decision. Returns
/// `NaN` when `p = 1` (`z = 0`) or `SE = 0`, rather than the finite `0.0`
/// that `se * 0.0` or `0.0 * z` would otherwise silently produce.
pub fn resolve_beta_unsigned(se: f64, pval: f64) -> f64 {
    if se == 0.0 {
        return f64::NAN;
    }
    let z = normal_z_two_tailed(pval);
    if z == 0.0 {
        return f64::NAN;
    }
    se * z
}

/// `p = 2·(1 - Φ(|β|/SE))`. Returns `NaN` when `SE = 0`.
pub fn resolve_pval(beta: f64, se: f64) -> f64 {
    if se == 0.0 {
        return f64::NAN;
    }
    normal_p_two_tailed(beta / se)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn se_from_beta_and_pval_matches_known_value() {
        // z(0.05) = Φ⁻¹(0.975) ≈ 1.959964
        let se = resolve_se(0.1, 0.05);
        assert!((se - 0.1 / 1.959_963_984_540_054).abs() < 1e-9);
    }

    #[test]
    fn round_trip_recovers_pval_within_tolerance() {
        let beta = 0.3;
        let se = 0.08;
        let p = resolve_pval(beta, se);
        let se_back = resolve_se(beta, p);
        assert!((se_back - se).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs_yield_nan() {
        assert!(resolve_se(0.1, 1.0).is_nan());
        assert!(resolve_pval(0.1, 0.0).is_nan());
        assert!(resolve_beta_unsigned(0.1, 1.0).is_nan());
        assert!(resolve_beta_unsigned(0.0, 0.05).is_nan());
    }
}
