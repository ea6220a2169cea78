//! Ideal statevector simulator.
//!
//! Dense complex-amplitude vector of length 2^n, where qubit `i` is bit `i`
//! of the basis-state index. The register only grows within a shot; every
//! handle stays a valid index until the evaluator is dropped.

use num_complex::Complex64;
use rand::Rng;

/// Faults surfaced to the evaluator, which attaches source positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatorFault {
    /// A gate touched a qubit that has been measured and not reset.
    MeasuredQubit(usize),
}

pub struct Statevector {
    amps: Vec<Complex64>,
    measured: Vec<bool>,
    outcomes: Vec<Option<u8>>,
}

impl Statevector {
    pub fn new() -> Self {
        Self {
            amps: vec![Complex64::new(1.0, 0.0)],
            measured: vec![],
            outcomes: vec![],
        }
    }

    pub fn qubit_count(&self) -> usize {
        self.measured.len()
    }

    /// Extend the register by one qubit in |0⟩ and return its handle.
    pub fn allocate(&mut self) -> usize {
        let handle = self.measured.len();
        self.amps.resize(self.amps.len() * 2, Complex64::new(0.0, 0.0));
        self.measured.push(false);
        self.outcomes.push(None);
        handle
    }

    pub fn is_measured(&self, qubit: usize) -> bool {
        self.measured[qubit]
    }

    /// The recorded outcome of the last measurement, if any.
    pub fn outcome(&self, qubit: usize) -> Option<u8> {
        self.outcomes[qubit]
    }

    fn check_live(&self, qubits: &[usize]) -> Result<(), SimulatorFault> {
        for &qubit in qubits {
            if self.measured[qubit] {
                return Err(SimulatorFault::MeasuredQubit(qubit));
            }
        }
        Ok(())
    }

    /// Apply a 2x2 matrix to `qubit`, in place over all 2^n basis states.
    fn apply_single(&mut self, qubit: usize, m: [[Complex64; 2]; 2]) {
        let mask = 1usize << qubit;
        for i in 0..self.amps.len() {
            if i & mask == 0 {
                let j = i | mask;
                let a0 = self.amps[i];
                let a1 = self.amps[j];
                self.amps[i] = m[0][0] * a0 + m[0][1] * a1;
                self.amps[j] = m[1][0] * a0 + m[1][1] * a1;
            }
        }
    }

    pub fn h(&mut self, qubit: usize) -> Result<(), SimulatorFault> {
        self.check_live(&[qubit])?;
        let s = Complex64::new(std::f64::consts::FRAC_1_SQRT_2, 0.0);
        self.apply_single(qubit, [[s, s], [s, -s]]);
        Ok(())
    }

    pub fn x(&mut self, qubit: usize) -> Result<(), SimulatorFault> {
        self.check_live(&[qubit])?;
        let zero = Complex64::new(0.0, 0.0);
        let one = Complex64::new(1.0, 0.0);
        self.apply_single(qubit, [[zero, one], [one, zero]]);
        Ok(())
    }

    pub fn y(&mut self, qubit: usize) -> Result<(), SimulatorFault> {
        self.check_live(&[qubit])?;
        let zero = Complex64::new(0.0, 0.0);
        let i = Complex64::new(0.0, 1.0);
        self.apply_single(qubit, [[zero, -i], [i, zero]]);
        Ok(())
    }

    pub fn z(&mut self, qubit: usize) -> Result<(), SimulatorFault> {
        self.check_live(&[qubit])?;
        let zero = Complex64::new(0.0, 0.0);
        let one = Complex64::new(1.0, 0.0);
        self.apply_single(qubit, [[one, zero], [zero, -one]]);
        Ok(())
    }

    pub fn rx(&mut self, qubit: usize, theta: f64) -> Result<(), SimulatorFault> {
        self.check_live(&[qubit])?;
        let c = Complex64::new((theta / 2.0).cos(), 0.0);
        let s = Complex64::new(0.0, -(theta / 2.0).sin());
        self.apply_single(qubit, [[c, s], [s, c]]);
        Ok(())
    }

    pub fn ry(&mut self, qubit: usize, theta: f64) -> Result<(), SimulatorFault> {
        self.check_live(&[qubit])?;
        let c = Complex64::new((theta / 2.0).cos(), 0.0);
        let s = Complex64::new((theta / 2.0).sin(), 0.0);
        self.apply_single(qubit, [[c, -s], [s, c]]);
        Ok(())
    }

    pub fn rz(&mut self, qubit: usize, theta: f64) -> Result<(), SimulatorFault> {
        self.check_live(&[qubit])?;
        let zero = Complex64::new(0.0, 0.0);
        let neg = Complex64::from_polar(1.0, -theta / 2.0);
        let pos = Complex64::from_polar(1.0, theta / 2.0);
        self.apply_single(qubit, [[neg, zero], [zero, pos]]);
        Ok(())
    }

    pub fn cx(&mut self, control: usize, target: usize) -> Result<(), SimulatorFault> {
        self.check_live(&[control, target])?;
        let control_mask = 1usize << control;
        let target_mask = 1usize << target;
        for i in 0..self.amps.len() {
            if i & control_mask != 0 && i & target_mask == 0 {
                self.amps.swap(i, i | target_mask);
            }
        }
        Ok(())
    }

    fn prob_one(&self, qubit: usize) -> f64 {
        let mask = 1usize << qubit;
        self.amps
            .iter()
            .enumerate()
            .filter(|(i, _)| i & mask != 0)
            .map(|(_, a)| a.norm_sqr())
            .sum()
    }

    /// Project onto `outcome` for `qubit` and renormalise.
    fn collapse(&mut self, qubit: usize, outcome: u8, probability: f64) {
        let mask = 1usize << qubit;
        let norm = probability.sqrt();
        for (i, amp) in self.amps.iter_mut().enumerate() {
            let matches = ((i & mask != 0) as u8) == outcome;
            if matches {
                *amp /= norm;
            } else {
                *amp = Complex64::new(0.0, 0.0);
            }
        }
    }

    /// Sample per Born's rule, collapse, and mark the qubit measured.
    pub fn measure(&mut self, qubit: usize, rng: &mut impl Rng) -> u8 {
        let p_one = self.prob_one(qubit);
        let outcome = if rng.gen::<f64>() < p_one { 1 } else { 0 };
        let probability = if outcome == 1 { p_one } else { 1.0 - p_one };
        self.collapse(qubit, outcome, probability);
        self.measured[qubit] = true;
        self.outcomes[qubit] = Some(outcome);
        outcome
    }

    /// Return the qubit to |0⟩: project (sampling if in superposition),
    /// flip the |1⟩ branch back down, and clear the measured flag.
    pub fn reset(&mut self, qubit: usize, rng: &mut impl Rng) {
        if !self.measured[qubit] {
            self.measure(qubit, rng);
        }
        if self.outcomes[qubit] == Some(1) {
            // map the collapsed |1⟩ component onto |0⟩
            let mask = 1usize << qubit;
            for i in 0..self.amps.len() {
                if i & mask != 0 {
                    let j = i & !mask;
                    self.amps[j] = self.amps[i];
                    self.amps[i] = Complex64::new(0.0, 0.0);
                }
            }
        }
        self.measured[qubit] = false;
        self.outcomes[qubit] = None;
    }
}

impl Default for Statevector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_allocate_starts_in_zero() {
        let mut sim = Statevector::new();
        let q = sim.allocate();
        let mut rng = rng();

        assert_eq!(sim.measure(q, &mut rng), 0);
    }

    #[test]
    fn test_x_flips_to_one() {
        let mut sim = Statevector::new();
        let q = sim.allocate();
        sim.x(q).unwrap();

        assert_eq!(sim.measure(q, &mut rng()), 1);
    }

    #[test]
    fn test_h_superposes() {
        // with many shots both outcomes appear
        let mut zeros = 0;
        let mut ones = 0;
        let mut rng = rng();
        for _ in 0..200 {
            let mut sim = Statevector::new();
            let q = sim.allocate();
            sim.h(q).unwrap();
            match sim.measure(q, &mut rng) {
                0 => zeros += 1,
                _ => ones += 1,
            }
        }
        assert!(zeros > 50 && ones > 50);
    }

    #[test]
    fn test_bell_pair_correlates() {
        let mut rng = rng();
        for _ in 0..100 {
            let mut sim = Statevector::new();
            let a = sim.allocate();
            let b = sim.allocate();
            sim.h(a).unwrap();
            sim.cx(a, b).unwrap();

            let first = sim.measure(a, &mut rng);
            let second = sim.measure(b, &mut rng);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_gate_after_measure_faults() {
        let mut sim = Statevector::new();
        let q = sim.allocate();
        sim.h(q).unwrap();
        sim.measure(q, &mut rng());

        assert_eq!(sim.x(q), Err(SimulatorFault::MeasuredQubit(q)));
    }

    #[test]
    fn test_reset_reenables_gates() {
        let mut sim = Statevector::new();
        let q = sim.allocate();
        let mut rng = rng();
        sim.x(q).unwrap();
        sim.measure(q, &mut rng);
        sim.reset(q, &mut rng);

        assert!(sim.x(q).is_ok());
        assert_eq!(sim.measure(q, &mut rng), 1);
    }

    #[test]
    fn test_double_x_is_identity() {
        let mut sim = Statevector::new();
        let q = sim.allocate();
        sim.x(q).unwrap();
        sim.x(q).unwrap();

        assert_eq!(sim.measure(q, &mut rng()), 0);
    }

    #[test]
    fn test_grover_two_qubits_marks_eleven() {
        // one Grover iteration on N=4 amplifies |11⟩ to certainty
        let mut rng = rng();
        for _ in 0..20 {
            let mut sim = Statevector::new();
            let a = sim.allocate();
            let b = sim.allocate();

            sim.h(a).unwrap();
            sim.h(b).unwrap();

            // oracle: flip the phase of |11⟩ (controlled-Z via H·CX·H)
            sim.h(b).unwrap();
            sim.cx(a, b).unwrap();
            sim.h(b).unwrap();

            // diffusion
            sim.h(a).unwrap();
            sim.h(b).unwrap();
            sim.x(a).unwrap();
            sim.x(b).unwrap();
            sim.h(b).unwrap();
            sim.cx(a, b).unwrap();
            sim.h(b).unwrap();
            sim.x(a).unwrap();
            sim.x(b).unwrap();
            sim.h(a).unwrap();
            sim.h(b).unwrap();

            assert_eq!(sim.measure(a, &mut rng), 1);
            assert_eq!(sim.measure(b, &mut rng), 1);
        }
    }
}
