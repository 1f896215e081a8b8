//! Polynomial utilities shared by the trajectories and the joint reachable set
//!
//! Coefficients are stored in ascending order, `p(t) = Σ a_i t^i`.

/// Binomial coefficient `C(n, k)`
pub fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// Degree-5 Bernstein coefficients on `[0, T]` matching position, velocity
/// and acceleration at both ends
pub fn match_deg5_bernstein(
    q0: f64,
    qd0: f64,
    qdd0: f64,
    q1: f64,
    qd1: f64,
    qdd1: f64,
    duration: f64,
) -> [f64; 6] {
    let t = duration;
    let t2 = t * t;
    [
        q0,
        q0 + t * qd0 / 5.0,
        q0 + qdd0 * t2 / 20.0 + 2.0 * qd0 * t / 5.0,
        q1 + qdd1 * t2 / 20.0 - 2.0 * qd1 * t / 5.0,
        q1 - t * qd1 / 5.0,
        q1,
    ]
}

/// Convert Bernstein coefficients of degree `n = beta.len() - 1` to
/// monomial coefficients on the normalized interval `[0, 1]`
///
/// `α_i = Σ_{j≤i} (-1)^{i-j} C(n,i) C(i,j) β_j`
pub fn bernstein_to_monomial(beta: &[f64]) -> Vec<f64> {
    if beta.is_empty() {
        return Vec::new();
    }
    let n = beta.len() - 1;
    (0..=n)
        .map(|i| {
            (0..=i)
                .map(|j| {
                    let sign = if (i - j) % 2 == 0 { 1.0 } else { -1.0 };
                    sign * binomial(n, i) * binomial(i, j) * beta[j]
                })
                .sum()
        })
        .collect()
}

/// Real polynomial with ascending coefficients
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coeffs: Vec<f64>,
}

impl Polynomial {
    pub fn new(coeffs: Vec<f64>) -> Self {
        Polynomial { coeffs }
    }

    pub fn constant(value: f64) -> Self {
        Polynomial { coeffs: vec![value] }
    }

    pub fn zero() -> Self {
        Polynomial { coeffs: Vec::new() }
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    /// Horner evaluation
    pub fn eval(&self, t: f64) -> f64 {
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * t + c)
    }

    pub fn derivative(&self) -> Polynomial {
        Polynomial {
            coeffs: self
                .coeffs
                .iter()
                .enumerate()
                .skip(1)
                .map(|(i, c)| i as f64 * c)
                .collect(),
        }
    }

    /// `q(t) = p(factor · t)`
    pub fn scale_argument(&self, factor: f64) -> Polynomial {
        let mut scale = 1.0;
        let coeffs = self
            .coeffs
            .iter()
            .map(|c| {
                let out = c * scale;
                scale *= factor;
                out
            })
            .collect();
        Polynomial { coeffs }
    }

    pub fn scaled(&self, factor: f64) -> Polynomial {
        Polynomial {
            coeffs: self.coeffs.iter().map(|c| c * factor).collect(),
        }
    }

    pub fn add(&self, other: &Polynomial) -> Polynomial {
        let len = self.coeffs.len().max(other.coeffs.len());
        let coeffs = (0..len)
            .map(|i| self.coeffs.get(i).unwrap_or(&0.0) + other.coeffs.get(i).unwrap_or(&0.0))
            .collect();
        Polynomial { coeffs }
    }

    /// Upper bound of `|p(t) - p(mid)|` for `|t - mid| ≤ half_width`
    ///
    /// Uses the finite Taylor expansion at `mid`, which is exact in its
    /// terms since `p` is a polynomial.
    pub fn deviation_bound(&self, mid: f64, half_width: f64) -> f64 {
        let h = half_width.abs();
        let mut bound = 0.0;
        let mut deriv = self.derivative();
        let mut factorial = 1.0;
        let mut h_pow = h;
        let mut order = 1.0;
        while !deriv.coeffs.is_empty() {
            factorial *= order;
            bound += deriv.eval(mid).abs() / factorial * h_pow;
            deriv = deriv.derivative();
            h_pow *= h;
            order += 1.0;
        }
        bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::Rng;

    #[test]
    fn test_binomial() {
        assert_eq!(binomial(5, 0), 1.0);
        assert_eq!(binomial(5, 2), 10.0);
        assert_eq!(binomial(5, 5), 1.0);
        assert_eq!(binomial(3, 4), 0.0);
    }

    #[test]
    fn test_horner_and_derivative() {
        // 1 + 2t + 3t^2
        let p = Polynomial::new(vec![1.0, 2.0, 3.0]);
        assert_relative_eq!(p.eval(2.0), 17.0, epsilon = 1e-12);
        let dp = p.derivative();
        assert_eq!(dp.coeffs(), &[2.0, 6.0]);
        assert_eq!(dp.derivative().derivative().coeffs().len(), 0);
    }

    #[test]
    fn test_scale_argument() {
        let p = Polynomial::new(vec![1.0, 2.0, 3.0]);
        let q = p.scale_argument(0.5);
        assert_relative_eq!(q.eval(4.0), p.eval(2.0), epsilon = 1e-12);
    }

    #[test]
    fn test_bernstein_round_trip_boundary_values() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let bc: Vec<f64> = (0..6).map(|_| rng.gen_range(-2.0..2.0)).collect();
            let duration = rng.gen_range(0.2..3.0);
            let beta = match_deg5_bernstein(bc[0], bc[1], bc[2], bc[3], bc[4], bc[5], duration);
            let alpha = Polynomial::new(bernstein_to_monomial(&beta)).scale_argument(1.0 / duration);
            let vel = alpha.derivative();
            let acc = vel.derivative();

            assert_relative_eq!(alpha.eval(0.0), bc[0], epsilon = 1e-9);
            assert_relative_eq!(vel.eval(0.0), bc[1], epsilon = 1e-9);
            assert_relative_eq!(acc.eval(0.0), bc[2], epsilon = 1e-9);
            assert_relative_eq!(alpha.eval(duration), bc[3], epsilon = 1e-9);
            assert_relative_eq!(vel.eval(duration), bc[4], epsilon = 1e-9);
            assert_relative_eq!(acc.eval(duration), bc[5], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_deviation_bound_encloses_samples() {
        let p = Polynomial::new(vec![0.3, -1.0, 2.0, 0.5]);
        let (mid, half) = (0.7, 0.05);
        let bound = p.deviation_bound(mid, half);
        for i in 0..=20 {
            let t = mid - half + 2.0 * half * i as f64 / 20.0;
            assert!((p.eval(t) - p.eval(mid)).abs() <= bound + 1e-12);
        }
        assert_eq!(Polynomial::constant(4.0).deviation_bound(0.0, 1.0), 0.0);
    }
}
