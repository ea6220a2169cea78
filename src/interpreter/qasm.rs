//! OpenQASM 2 trace.
//!
//! The evaluator records gate applications and measurements as they happen;
//! the textual program is assembled on demand with the register sized to
//! the shot's qubit count.

use crate::semantic::Gate;

#[derive(Debug, Clone, PartialEq)]
enum QasmOp {
    Gate {
        gate: Gate,
        angle: Option<f64>,
        qubits: Vec<usize>,
    },
    Measure {
        qubit: usize,
        creg: usize,
    },
}

#[derive(Debug, Default)]
pub struct QasmLog {
    ops: Vec<QasmOp>,
    measurements: usize,
}

impl QasmLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_gate(&mut self, gate: Gate, qubits: Vec<usize>, angle: Option<f64>) {
        self.ops.push(QasmOp::Gate { gate, angle, qubits });
    }

    /// Each measurement gets the next classical bit.
    pub fn record_measure(&mut self, qubit: usize) {
        let creg = self.measurements;
        self.measurements += 1;
        self.ops.push(QasmOp::Measure { qubit, creg });
    }

    pub fn measurement_count(&self) -> usize {
        self.measurements
    }

    pub fn render(&self, qubit_count: usize) -> String {
        let mut out = String::from("OPENQASM 2.0;\ninclude \"qelib1.inc\";\n");

        if qubit_count > 0 {
            out.push_str(&format!("qreg q[{qubit_count}];\n"));
        }
        if self.measurements > 0 {
            out.push_str(&format!("creg c[{}];\n", self.measurements));
        }

        for op in &self.ops {
            match op {
                QasmOp::Gate { gate, angle, qubits } => {
                    let operands = qubits
                        .iter()
                        .map(|q| format!("q[{q}]"))
                        .collect::<Vec<_>>()
                        .join(",");
                    match angle {
                        Some(theta) => {
                            out.push_str(&format!("{}({theta}) {operands};\n", gate.name()))
                        }
                        None => out.push_str(&format!("{} {operands};\n", gate.name())),
                    }
                }
                QasmOp::Measure { qubit, creg } => {
                    out.push_str(&format!("measure q[{qubit}] -> c[{creg}];\n"));
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_preamble_only() {
        let log = QasmLog::new();
        let text = log.render(0);

        assert!(text.starts_with("OPENQASM 2.0;\ninclude \"qelib1.inc\";\n"));
        assert!(!text.contains("qreg"));
        assert!(!text.contains("measure"));
    }

    #[test]
    fn test_render_bell_circuit() {
        let mut log = QasmLog::new();
        log.record_gate(Gate::H, vec![0], None);
        log.record_gate(Gate::Cx, vec![0, 1], None);
        log.record_measure(0);
        log.record_measure(1);

        let text = log.render(2);
        assert!(text.contains("qreg q[2];"));
        assert!(text.contains("creg c[2];"));
        assert!(text.contains("h q[0];"));
        assert!(text.contains("cx q[0],q[1];"));
        assert!(text.contains("measure q[0] -> c[0];"));
        assert!(text.contains("measure q[1] -> c[1];"));
    }

    #[test]
    fn test_render_rotation_angle() {
        let mut log = QasmLog::new();
        log.record_gate(Gate::Rx, vec![0], Some(1.5));

        assert!(log.render(1).contains("rx(1.5) q[0];"));
    }
}
