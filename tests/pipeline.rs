//! End-to-end pipeline tests: source text through lexer, parser, semantic
//! analysis, and the shot-running evaluator.

use bloch::compile;
use bloch::error::BlochError;
use bloch::interpreter::{run, ExecutionReport, RunConfig};
use bloch::lexer::Lexer;

fn execute(source: &str, seed: u64) -> Result<ExecutionReport, BlochError> {
    let (program, analysis) = compile(source)?;
    let config = RunConfig {
        shots: program.shots.count,
        echo: true,
        warn_on_exit: false,
        seed: Some(seed),
    };
    run(&program, &analysis, config).map_err(BlochError::from)
}

#[test]
fn hadamard_sanity_over_1024_shots() {
    let report = execute(
        "@shots(1024)\n\
         function main() -> void {\n\
             @tracked qubit q;\n\
             h(q);\n\
             measure q;\n\
         }",
        42,
    )
    .unwrap();

    let outcomes = report.tracked.sorted_outcomes("q");
    let zeros = outcomes
        .iter()
        .find(|(k, _)| k.as_str() == "0")
        .map(|(_, v)| *v)
        .unwrap_or(0);
    let ones = outcomes
        .iter()
        .find(|(k, _)| k.as_str() == "1")
        .map(|(_, v)| *v)
        .unwrap_or(0);

    assert_eq!(zeros + ones, 1024);
    assert!((410..=614).contains(&zeros), "zeros = {zeros}");
    assert!((410..=614).contains(&ones), "ones = {ones}");
    assert!(outcomes.iter().all(|(k, _)| k.as_str() != "?"));
}

#[test]
fn bell_pair_correlates_perfectly() {
    let report = execute(
        "@shots(1024)\n\
         function main() -> void {\n\
             @tracked qubit[2] r;\n\
             h(r[0]);\n\
             cx(r[0], r[1]);\n\
             measure r[0];\n\
             measure r[1];\n\
         }",
        7,
    )
    .unwrap();

    let outcomes = report.tracked.sorted_outcomes("r");
    let total: u64 = outcomes.iter().map(|(_, v)| v).sum();
    assert_eq!(total, 1024);
    for (outcome, count) in outcomes {
        assert!(
            outcome == "00" || outcome == "11",
            "unexpected outcome {outcome} with count {count}"
        );
    }
}

#[test]
fn grover_two_qubits_finds_the_marked_item() {
    // one Grover iteration on N=4 with |11> marked is exact
    let report = execute(
        "@shots(1024)\n\
         function main() -> void {\n\
             @tracked qubit[2] r;\n\
             h(r[0]);\n\
             h(r[1]);\n\
             // oracle: phase-flip |11>\n\
             h(r[1]);\n\
             cx(r[0], r[1]);\n\
             h(r[1]);\n\
             // diffusion\n\
             h(r[0]);\n\
             h(r[1]);\n\
             x(r[0]);\n\
             x(r[1]);\n\
             h(r[1]);\n\
             cx(r[0], r[1]);\n\
             h(r[1]);\n\
             x(r[0]);\n\
             x(r[1]);\n\
             h(r[0]);\n\
             h(r[1]);\n\
             measure r[0];\n\
             measure r[1];\n\
         }",
        99,
    )
    .unwrap();

    let outcomes = report.tracked.sorted_outcomes("r");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, "11");
    assert_eq!(outcomes[0].1, 1024);
}

#[test]
fn division_by_zero_cites_the_site() {
    let error = execute("function main() -> void { int x = 1/0; }", 1).unwrap_err();

    let BlochError::Runtime(runtime) = error else {
        panic!("expected a runtime error, got {error}");
    };
    assert!(runtime.message.contains("division by zero"));
    assert_eq!(runtime.position.line, 1);
    assert!(runtime.position.column > 0);
}

#[test]
fn gate_after_measurement_aborts_at_the_gate() {
    let error = execute(
        "function main() -> void {\n\
             qubit q;\n\
             h(q);\n\
             measure q;\n\
             x(q);\n\
         }",
        1,
    )
    .unwrap_err();

    let BlochError::Runtime(runtime) = error else {
        panic!("expected a runtime error, got {error}");
    };
    assert!(runtime.message.contains("measured"));
    assert_eq!(runtime.position.line, 5);
}

#[test]
fn redeclared_variable_cites_the_second_declaration() {
    let error = execute("function main() -> void {\nint a = 1;\nint a = 2;\n}", 1).unwrap_err();

    let BlochError::Semantic(semantic) = error else {
        panic!("expected a semantic error, got {error}");
    };
    assert!(semantic.message.contains("already declared"));
    assert_eq!(semantic.position.line, 3);
}

#[test]
fn bit_literal_boundaries() {
    assert!(compile("function main() -> void { bit b = 0b; bit c = 1b; }").is_ok());
    assert!(matches!(
        compile("function main() -> void { bit b = 2b; }"),
        Err(BlochError::Lexical(_))
    ));
    assert!(matches!(
        compile("function main() -> void { bit b = 10b; }"),
        Err(BlochError::Lexical(_))
    ));
    assert!(matches!(
        compile("function main() -> void { bit b = 0; }"),
        Err(BlochError::Semantic(_))
    ));
}

#[test]
fn float_literal_requires_suffix() {
    assert!(compile("function main() -> void { float f = 3.14f; }").is_ok());
    assert!(matches!(
        compile("function main() -> void { float f = 3.14; }"),
        Err(BlochError::Lexical(_))
    ));
}

#[test]
fn array_index_boundary() {
    let report = execute(
        "function main() -> void { int[] xs = {1, 2, 3}; echo xs[2]; }",
        1,
    )
    .unwrap();
    assert_eq!(report.stdout, "3\n");

    let error = execute(
        "function main() -> void { int[] xs = {1, 2, 3}; echo xs[3]; }",
        1,
    )
    .unwrap_err();
    assert!(matches!(error, BlochError::Runtime(_)));
}

#[test]
fn untouched_tracked_qubit_records_unknown_once_per_shot() {
    let report = execute(
        "@shots(16) function main() -> void { @tracked qubit q; }",
        3,
    )
    .unwrap();

    let outcomes = report.tracked.sorted_outcomes("q");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, "?");
    assert_eq!(outcomes[0].1, 16);
}

#[test]
fn qasm_trace_without_measurements_has_none() {
    let report = execute("function main() -> void { qubit q; h(q); z(q); }", 1).unwrap();

    assert!(report.qasm.contains("h q[0];"));
    assert!(report.qasm.contains("z q[0];"));
    assert!(!report.qasm.contains("measure"));
}

#[test]
fn lexing_is_deterministic() {
    let source = "function main() -> void { int a = 1 + 2; echo a; }";
    let first = Lexer::new(source).lex().unwrap();
    let second = Lexer::new(source).lex().unwrap();
    assert_eq!(first, second);
}

#[test]
fn parse_is_deterministic() {
    let source = "class Foo { constructor() -> Foo { } }\
                  function main() -> void { Foo f = new Foo(); }";
    let (first, _) = compile(source).unwrap();
    let (second, _) = compile(source).unwrap();
    assert_eq!(first, second);
}

#[test]
fn mixed_classical_quantum_program() {
    let report = execute(
        "@shots(8)\n\
         function flip(qubit q) -> bit {\n\
             h(q);\n\
             return measure q;\n\
         }\n\
         function main() -> void {\n\
             @tracked qubit[2] pair;\n\
             int heads = 0;\n\
             bit a = flip(pair[0]);\n\
             bit b = flip(pair[1]);\n\
             if (a == b) { heads++; }\n\
             echo \"agreement: \" + heads;\n\
         }",
        21,
    )
    .unwrap();

    let outcomes = report.tracked.sorted_outcomes("pair");
    let total: u64 = outcomes.iter().map(|(_, v)| v).sum();
    assert_eq!(total, 8);
    assert_eq!(report.stdout.lines().count(), 8);
}
