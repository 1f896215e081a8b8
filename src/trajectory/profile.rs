//! Joint motion profiles that are affine in the trajectory parameter
//!
//! Both trajectory families move each joint as
//!
//! ```text
//! q(s; K) = f0(s) + K · fu(s)
//! ```
//!
//! where `s` is the time since the start state and `K` is the joint's actual
//! (rescaled) parameter: the acceleration for piecewise trajectories, the
//! end-position offset for Bernstein trajectories. The joint reachable set is
//! built from these profiles, so the sets and the trajectories share the
//! same kinematics.

use super::polynomial::{bernstein_to_monomial, match_deg5_bernstein, Polynomial};

/// One time segment `[start, end)` with polynomials in local time `s - start`
#[derive(Debug, Clone, PartialEq)]
pub struct AffineSegment {
    pub start: f64,
    pub end: f64,
    pub nominal: Polynomial,
    pub unit: Polynomial,
}

/// Bounds of a profile over a time interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalEnclosure {
    /// `f0` at the interval midpoint
    pub nominal: f64,
    /// `fu` at the interval midpoint
    pub unit: f64,
    /// Bound of `|f0(s) - f0(mid)|` over the interval
    pub nominal_deviation: f64,
    /// Bound of `|fu(s) - fu(mid)|` over the interval
    pub unit_deviation: f64,
}

impl IntervalEnclosure {
    /// Radius of `q(s; K) - q(mid; K)` for every `|K| ≤ max_abs_param`
    pub fn radius(&self, max_abs_param: f64) -> f64 {
        self.nominal_deviation + max_abs_param * self.unit_deviation
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AffineProfile {
    segments: Vec<AffineSegment>,
}

impl AffineProfile {
    /// Constant acceleration `K` until `plan_time`, then linear braking to
    /// rest at `horizon_time`, then hold
    pub fn piecewise(q0: f64, qd0: f64, plan_time: f64, horizon_time: f64) -> Self {
        let tp = plan_time;
        let brake = (horizon_time - plan_time).max(0.0);
        let mut segments = vec![AffineSegment {
            start: 0.0,
            end: tp,
            nominal: Polynomial::new(vec![q0, qd0]),
            unit: Polynomial::new(vec![0.0, 0.0, 0.5]),
        }];

        // peak state, affine in K
        let q_peak = (q0 + qd0 * tp, 0.5 * tp * tp);
        let qd_peak = (qd0, tp);
        if brake > 0.0 {
            // q = q_peak + qd_peak (τ - τ² / 2D)
            segments.push(AffineSegment {
                start: tp,
                end: horizon_time,
                nominal: Polynomial::new(vec![q_peak.0, qd_peak.0, -qd_peak.0 / (2.0 * brake)]),
                unit: Polynomial::new(vec![q_peak.1, qd_peak.1, -qd_peak.1 / (2.0 * brake)]),
            });
        }
        segments.push(AffineSegment {
            start: horizon_time,
            end: f64::INFINITY,
            nominal: Polynomial::constant(q_peak.0 + 0.5 * qd_peak.0 * brake),
            unit: Polynomial::constant(q_peak.1 + 0.5 * qd_peak.1 * brake),
        });
        AffineProfile { segments }
    }

    /// Degree-5 Bernstein motion to `q0 + K` at rest at `horizon_time`, then hold
    pub fn bernstein(q0: f64, qd0: f64, qdd0: f64, horizon_time: f64) -> Self {
        let inv = 1.0 / horizon_time;
        let nominal_beta = match_deg5_bernstein(q0, qd0, qdd0, q0, 0.0, 0.0, horizon_time);
        let unit_beta = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        AffineProfile {
            segments: vec![
                AffineSegment {
                    start: 0.0,
                    end: horizon_time,
                    nominal: Polynomial::new(bernstein_to_monomial(&nominal_beta)).scale_argument(inv),
                    unit: Polynomial::new(bernstein_to_monomial(&unit_beta)).scale_argument(inv),
                },
                AffineSegment {
                    start: horizon_time,
                    end: f64::INFINITY,
                    nominal: Polynomial::constant(q0),
                    unit: Polynomial::constant(1.0),
                },
            ],
        }
    }

    pub fn segments(&self) -> &[AffineSegment] {
        &self.segments
    }

    /// Time derivative of every segment
    pub fn derivative(&self) -> AffineProfile {
        AffineProfile {
            segments: self
                .segments
                .iter()
                .map(|seg| AffineSegment {
                    start: seg.start,
                    end: seg.end,
                    nominal: seg.nominal.derivative(),
                    unit: seg.unit.derivative(),
                })
                .collect(),
        }
    }

    fn segment_at(&self, s: f64) -> Option<&AffineSegment> {
        self.segments
            .iter()
            .rev()
            .find(|seg| seg.start <= s)
            .or_else(|| self.segments.first())
    }

    /// `(f0(s), fu(s))`
    pub fn eval(&self, s: f64) -> (f64, f64) {
        match self.segment_at(s) {
            Some(seg) => {
                let local = s - seg.start;
                (seg.nominal.eval(local), seg.unit.eval(local))
            }
            None => (0.0, 0.0),
        }
    }

    pub fn value(&self, s: f64, param: f64) -> f64 {
        let (nominal, unit) = self.eval(s);
        nominal + param * unit
    }

    /// Midpoint values and deviation bounds over `[from, to]`
    ///
    /// Segments overlapping the interval are bounded separately, each
    /// around its own sub-interval midpoint, and shifted back to the
    /// interval midpoint.
    pub fn enclose(&self, from: f64, to: f64) -> IntervalEnclosure {
        let mid = 0.5 * (from + to);
        let (nominal, unit) = self.eval(mid);
        let mut nominal_deviation: f64 = 0.0;
        let mut unit_deviation: f64 = 0.0;

        for seg in &self.segments {
            let lo = from.max(seg.start);
            let hi = to.min(seg.end);
            if lo > hi || (lo == hi && lo != from) {
                continue;
            }
            let sub_mid = 0.5 * (lo + hi) - seg.start;
            let sub_half = 0.5 * (hi - lo);
            let dn = seg.nominal.deviation_bound(sub_mid, sub_half)
                + (seg.nominal.eval(sub_mid) - nominal).abs();
            let du = seg.unit.deviation_bound(sub_mid, sub_half) + (seg.unit.eval(sub_mid) - unit).abs();
            nominal_deviation = nominal_deviation.max(dn);
            unit_deviation = unit_deviation.max(du);
        }

        IntervalEnclosure {
            nominal,
            unit,
            nominal_deviation,
            unit_deviation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_piecewise_profile_stops_at_horizon() {
        let profile = AffineProfile::piecewise(0.2, 0.4, 0.5, 1.0);
        let vel = profile.derivative();
        for &k in &[-2.0, 0.0, 3.0] {
            assert_relative_eq!(vel.value(1.0, k), 0.0, epsilon = 1e-12);
            assert_relative_eq!(vel.value(1.5, k), 0.0, epsilon = 1e-12);
            // continuous at the phase switch
            assert_relative_eq!(profile.value(0.5 - 1e-9, k), profile.value(0.5, k), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_piecewise_profile_known_values() {
        // from rest: q(T) = a tp²/2 + a tp (T - tp)/2 = 0.25 a
        let profile = AffineProfile::piecewise(0.0, 0.0, 0.5, 1.0);
        assert_relative_eq!(profile.value(1.0, 4.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(profile.value(2.0, 4.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_length_brake_holds_peak() {
        let profile = AffineProfile::piecewise(0.0, 1.0, 1.0, 1.0);
        assert_eq!(profile.segments().len(), 2);
        assert_relative_eq!(profile.value(1.0, 2.0), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bernstein_profile_boundaries() {
        let profile = AffineProfile::bernstein(0.1, -0.3, 0.7, 2.0);
        let vel = profile.derivative();
        let acc = vel.derivative();
        assert_relative_eq!(profile.value(0.0, 0.5), 0.1, epsilon = 1e-12);
        assert_relative_eq!(vel.value(0.0, 0.5), -0.3, epsilon = 1e-12);
        assert_relative_eq!(acc.value(0.0, 0.5), 0.7, epsilon = 1e-12);
        assert_relative_eq!(profile.value(2.0, 0.5), 0.6, epsilon = 1e-12);
        assert_relative_eq!(vel.value(2.0 - 1e-12, 0.5), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_enclosure_contains_samples_across_switch() {
        let profile = AffineProfile::piecewise(0.0, 0.3, 0.5, 1.0);
        let (from, to) = (0.48, 0.53);
        let enclosure = profile.enclose(from, to);
        for &k in &[-1.5, 0.0, 1.5] {
            let center = enclosure.nominal + k * enclosure.unit;
            let radius = enclosure.radius(1.5);
            for i in 0..=50 {
                let s = from + (to - from) * i as f64 / 50.0;
                assert!((profile.value(s, k) - center).abs() <= radius + 1e-12);
            }
        }
    }
}
