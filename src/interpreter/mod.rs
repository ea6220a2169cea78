//! Runtime evaluator.
//!
//! A tree-walking interpreter over the validated AST. Classical values live
//! in frame/global scopes and an explicit object heap; quantum state lives
//! in the statevector simulator. Each shot gets a fresh evaluator, its own
//! RNG stream, and its own QASM trace; the [`Runner`] aggregates tracked
//! outcomes across shots.

mod heap;
mod qasm;
mod statevector;
mod tracker;
mod value;

pub use qasm::QasmLog;
pub use statevector::{SimulatorFault, Statevector};
pub use tracker::{outcome_order, ShotTracker, TrackedCounts};
pub use value::Value;

use std::collections::{HashMap, HashSet};

use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Position, RuntimeError, RuntimeResult};
use crate::parser::ast::{
    AssignTarget, BinaryOperator, ClassDeclaration, ConstructorBody, ConstructorDeclaration,
    Expression, FunctionDeclaration, MethodDeclaration, PostfixOperator, PrimitiveType, Program,
    Statement, TypeNode, UnaryOperator,
};
use crate::semantic::{Analysis, ClassHierarchy, FunctionSignature, Gate, TypeInfo};

use self::heap::Heap;

const MAX_CALL_DEPTH: usize = 256;

/// Configuration handed down by the driver; the shot count is already
/// resolved (annotation over CLI flag).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub shots: u64,
    /// off silences echo statements entirely.
    pub echo: bool,
    pub warn_on_exit: bool,
    /// Fixed base seed for deterministic runs; shot `i` uses `seed + i`.
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            shots: 1,
            echo: true,
            warn_on_exit: true,
            seed: None,
        }
    }
}

/// Everything the driver reads back after the shot loop.
#[derive(Debug)]
pub struct ExecutionReport {
    pub tracked: TrackedCounts,
    pub qasm: String,
    pub stdout: String,
}

/// Runs the shot loop; state never leaks between shots.
pub struct Runner<'a> {
    program: &'a Program,
    analysis: &'a Analysis,
    config: RunConfig,
}

impl<'a> Runner<'a> {
    pub fn new(program: &'a Program, analysis: &'a Analysis, config: RunConfig) -> Self {
        Self {
            program,
            analysis,
            config,
        }
    }

    pub fn run(&self) -> RuntimeResult<ExecutionReport> {
        let base_seed = self.config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let shots = self.config.shots.max(1);

        let mut tracked = TrackedCounts::new();
        let mut stdout = String::new();
        let mut qasm = String::new();

        for shot in 0..shots {
            let shot_is_last = shot + 1 == shots;
            let mut evaluator = Evaluator::new(
                self.program,
                self.analysis,
                StdRng::seed_from_u64(base_seed.wrapping_add(shot)),
                self.config.echo,
                self.config.warn_on_exit && shot_is_last,
            );
            evaluator.execute()?;

            stdout.push_str(&evaluator.stdout);
            if shot_is_last {
                qasm = evaluator.qasm.render(evaluator.sim.qubit_count());
            }
            tracked.merge_shot(std::mem::take(&mut evaluator.tracker));
        }

        Ok(ExecutionReport {
            tracked,
            qasm,
            stdout,
        })
    }
}

/// Execute `program` for the configured number of shots.
pub fn run(
    program: &Program,
    analysis: &Analysis,
    config: RunConfig,
) -> RuntimeResult<ExecutionReport> {
    Runner::new(program, analysis, config).run()
}

enum Flow {
    Normal,
    Return(Value),
}

#[derive(Default)]
struct ScopeMap {
    vars: HashMap<String, Value>,
    tracked: Vec<String>,
}

struct Frame {
    scopes: Vec<ScopeMap>,
    this_handle: Option<usize>,
    class: Option<String>,
}

pub struct Evaluator<'a> {
    program: &'a Program,
    analysis: &'a Analysis,
    class_decls: HashMap<&'a str, &'a ClassDeclaration>,
    function_decls: HashMap<&'a str, Vec<&'a FunctionDeclaration>>,
    globals: Vec<ScopeMap>,
    frames: Vec<Frame>,
    statics: HashMap<(String, String), Value>,
    heap: Heap,
    sim: Statevector,
    qasm: QasmLog,
    tracker: ShotTracker,
    rng: StdRng,
    stdout: String,
    echo_on: bool,
    warn_on_exit: bool,
    tracked_handles: HashSet<usize>,
}

fn fail<T>(position: Position, message: impl Into<String>) -> RuntimeResult<T> {
    Err(RuntimeError {
        message: message.into(),
        position,
    })
}

impl<'a> Evaluator<'a> {
    pub fn new(
        program: &'a Program,
        analysis: &'a Analysis,
        rng: StdRng,
        echo_on: bool,
        warn_on_exit: bool,
    ) -> Self {
        let class_decls = program
            .classes
            .iter()
            .map(|c| (c.name.as_str(), c))
            .collect();
        let mut function_decls: HashMap<&str, Vec<&FunctionDeclaration>> = HashMap::new();
        for function in &program.functions {
            function_decls
                .entry(function.name.as_str())
                .or_default()
                .push(function);
        }

        Self {
            program,
            analysis,
            class_decls,
            function_decls,
            globals: vec![ScopeMap::default()],
            frames: vec![],
            statics: HashMap::new(),
            heap: Heap::new(),
            sim: Statevector::new(),
            qasm: QasmLog::new(),
            tracker: ShotTracker::new(),
            rng,
            stdout: String::new(),
            echo_on,
            warn_on_exit,
            tracked_handles: HashSet::new(),
        }
    }

    /// Run one shot: statics, top-level statements, then `main()`.
    pub fn execute(&mut self) -> RuntimeResult<()> {
        self.init_statics()?;

        let statements = &self.program.statements;
        for statement in statements {
            self.exec(statement)?;
        }

        let main = self
            .program
            .main()
            .expect("the loader guarantees exactly one main");
        let signature = self
            .analysis
            .functions
            .overloads("main")
            .first()
            .expect("main is registered")
            .clone();
        self.call_function(main, &signature, vec![], main.position)?;

        self.finish_shot();
        Ok(())
    }

    fn init_statics(&mut self) -> RuntimeResult<()> {
        let classes = &self.program.classes;
        for class in classes {
            for field in &class.fields {
                if !field.is_static {
                    continue;
                }
                self.frames.push(Frame {
                    scopes: vec![ScopeMap::default()],
                    this_handle: None,
                    class: Some(class.name.clone()),
                });
                let value = match &field.initializer {
                    Some(initializer) => {
                        let raw = self.eval(initializer)?;
                        self.coerce_to_node(raw, &field.ty)
                    }
                    None => self.default_value(&field.ty)?,
                };
                self.frames.pop();
                self.statics
                    .insert((class.name.clone(), field.name.clone()), value);
            }
        }
        Ok(())
    }

    /// End-of-shot teardown: snapshot tracked globals and the tracked
    /// fields of still-live objects, then emit trailing warnings.
    fn finish_shot(&mut self) {
        while let Some(scope) = self.globals.pop() {
            self.snapshot_scope(scope);
        }

        let mut field_snapshots = vec![];
        for instance in self.heap.live() {
            for class in self.analysis.classes.chain(&instance.class_name) {
                for field in &class.fields {
                    if field.is_tracked {
                        if let Some(value) = instance.fields.get(&field.name) {
                            field_snapshots.push((field.name.clone(), value.clone()));
                        }
                    }
                }
            }
        }
        for (name, value) in field_snapshots {
            let outcome = self.outcome_of(&value);
            self.tracker.record_once(&name, outcome);
        }

        if self.warn_on_exit {
            for qubit in 0..self.sim.qubit_count() {
                if !self.sim.is_measured(qubit)
                    && self.sim.outcome(qubit).is_none()
                    && !self.tracked_handles.contains(&qubit)
                {
                    warn!("qubit {qubit} was never measured");
                }
            }
        }
    }

    // ---- scopes and variables -----------------------------------------

    fn scopes_mut(&mut self) -> &mut Vec<ScopeMap> {
        match self.frames.last_mut() {
            Some(frame) => &mut frame.scopes,
            None => &mut self.globals,
        }
    }

    fn push_scope(&mut self) {
        self.scopes_mut().push(ScopeMap::default());
    }

    fn pop_scope(&mut self) {
        if let Some(scope) = self.scopes_mut().pop() {
            self.snapshot_scope(scope);
        }
    }

    fn snapshot_scope(&mut self, scope: ScopeMap) {
        for name in &scope.tracked {
            if let Some(value) = scope.vars.get(name) {
                let outcome = self.outcome_of(value);
                self.tracker.record_once(name, outcome);
            }
        }
    }

    /// Outcome string of a tracked value: `"0"`/`"1"`/`"?"` for a qubit,
    /// the concatenated bitstring for a fully measured qubit array.
    fn outcome_of(&self, value: &Value) -> String {
        match value {
            Value::Qubit(q) => match self.sim.outcome(*q) {
                Some(bit) => bit.to_string(),
                None => "?".into(),
            },
            Value::Array(elements) => {
                let mut out = String::new();
                for element in elements {
                    let Value::Qubit(q) = element else {
                        return "?".into();
                    };
                    match self.sim.outcome(*q) {
                        Some(bit) => out.push_str(&bit.to_string()),
                        None => return "?".into(),
                    }
                }
                out
            }
            _ => "?".into(),
        }
    }

    fn declare(&mut self, name: &str, value: Value, tracked: bool) {
        if tracked {
            for handle in qubit_handles(&value) {
                self.tracked_handles.insert(handle);
            }
        }
        let scope = self
            .scopes_mut()
            .last_mut()
            .expect("there is always an open scope");
        scope.vars.insert(name.to_string(), value);
        if tracked {
            scope.tracked.push(name.to_string());
        }
    }

    fn read_var(&self, name: &str, position: Position) -> RuntimeResult<Value> {
        if let Some(frame) = self.frames.last() {
            for scope in frame.scopes.iter().rev() {
                if let Some(value) = scope.vars.get(name) {
                    return Ok(value.clone());
                }
            }
            if let Some(handle) = frame.this_handle {
                if let Some(instance) = self.heap.get(handle) {
                    if let Some(value) = instance.fields.get(name) {
                        return Ok(value.clone());
                    }
                }
            }
            if let Some(class) = &frame.class {
                for info in self.analysis.classes.chain(class) {
                    if let Some(value) =
                        self.statics.get(&(info.name.clone(), name.to_string()))
                    {
                        return Ok(value.clone());
                    }
                }
            }
        }
        for scope in self.globals.iter().rev() {
            if let Some(value) = scope.vars.get(name) {
                return Ok(value.clone());
            }
        }
        fail(position, format!("unknown variable '{name}'"))
    }

    fn write_var(&mut self, name: &str, value: Value, position: Position) -> RuntimeResult<()> {
        if let Some(frame) = self.frames.last_mut() {
            for scope in frame.scopes.iter_mut().rev() {
                if let Some(slot) = scope.vars.get_mut(name) {
                    *slot = coerce_like(value, slot);
                    return Ok(());
                }
            }
            let this_handle = frame.this_handle;
            let class = frame.class.clone();
            if let Some(handle) = this_handle {
                if let Some(instance) = self.heap.get_mut(handle) {
                    if let Some(slot) = instance.fields.get_mut(name) {
                        *slot = coerce_like(value, slot);
                        return Ok(());
                    }
                }
            }
            if let Some(class) = class {
                let owners: Vec<String> = self
                    .analysis
                    .classes
                    .chain(&class)
                    .iter()
                    .map(|c| c.name.clone())
                    .collect();
                for owner in owners {
                    let key = (owner, name.to_string());
                    if let Some(slot) = self.statics.get_mut(&key) {
                        *slot = coerce_like(value, slot);
                        return Ok(());
                    }
                }
            }
        }
        for scope in self.globals.iter_mut().rev() {
            if let Some(slot) = scope.vars.get_mut(name) {
                *slot = coerce_like(value, slot);
                return Ok(());
            }
        }
        fail(position, format!("unknown variable '{name}'"))
    }

    // ---- statements ----------------------------------------------------

    fn exec(&mut self, statement: &Statement) -> RuntimeResult<Flow> {
        match statement {
            Statement::Block { statements, .. } => {
                self.push_scope();
                for statement in statements {
                    match self.exec(statement)? {
                        Flow::Normal => {}
                        flow => {
                            self.pop_scope();
                            return Ok(flow);
                        }
                    }
                }
                self.pop_scope();
                Ok(Flow::Normal)
            }
            Statement::VariableDeclaration {
                annotations,
                ty,
                names,
                initializer,
                ..
            } => {
                let tracked = annotations
                    .iter()
                    .any(|a| a.kind == crate::parser::ast::AnnotationKind::Tracked);
                for name in names {
                    let value = match initializer {
                        Some(initializer) => {
                            let raw = self.eval(initializer)?;
                            self.coerce_to_node(raw, ty)
                        }
                        None => self.default_value(ty)?,
                    };
                    self.declare(name, value, tracked);
                }
                Ok(Flow::Normal)
            }
            Statement::Expression { expression, .. } => {
                self.eval(expression)?;
                Ok(Flow::Normal)
            }
            Statement::Assignment {
                target,
                value,
                position,
            } => {
                let value = self.eval(value)?;
                self.assign(target, value, *position)?;
                Ok(Flow::Normal)
            }
            Statement::Return { value, .. } => {
                let result = match value {
                    Some(value) => self.eval(value)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(result))
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.exec(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Statement::While {
                condition, body, ..
            } => {
                while self.eval(condition)?.is_truthy() {
                    if let Flow::Return(value) = self.exec(body)? {
                        return Ok(Flow::Return(value));
                    }
                }
                Ok(Flow::Normal)
            }
            Statement::For {
                init,
                condition,
                update,
                body,
                ..
            } => {
                self.push_scope();
                if let Some(init) = init {
                    self.exec(init)?;
                }
                loop {
                    if let Some(condition) = condition {
                        if !self.eval(condition)?.is_truthy() {
                            break;
                        }
                    }
                    if let Flow::Return(value) = self.exec(body)? {
                        self.pop_scope();
                        return Ok(Flow::Return(value));
                    }
                    if let Some(update) = update {
                        self.exec(update)?;
                    }
                }
                self.pop_scope();
                Ok(Flow::Normal)
            }
            Statement::Echo { value, .. } => {
                let rendered = self.eval(value)?.render();
                if self.echo_on {
                    self.stdout.push_str(&rendered);
                    self.stdout.push('\n');
                }
                Ok(Flow::Normal)
            }
            Statement::Reset { qubit, .. } => {
                let handle = self.qubit_operand(qubit)?;
                self.sim.reset(handle, &mut self.rng);
                Ok(Flow::Normal)
            }
            Statement::Measure { qubit, .. } => {
                let handle = self.qubit_operand(qubit)?;
                self.measure_qubit(handle);
                Ok(Flow::Normal)
            }
            Statement::Destroy { object, position } => {
                let value = self.eval(object)?;
                match value {
                    Value::Null => Ok(Flow::Normal),
                    Value::Object(handle) => {
                        self.destroy(handle, *position)?;
                        Ok(Flow::Normal)
                    }
                    other => fail(
                        *position,
                        format!("destroy expects an object, found {}", other.render()),
                    ),
                }
            }
            Statement::Ternary {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.exec(then_branch)
                } else {
                    self.exec(else_branch)
                }
            }
            Statement::SuperConstructorCall { position, .. } => fail(
                *position,
                "super(...) outside of constructor delegation",
            ),
        }
    }

    fn assign(
        &mut self,
        target: &AssignTarget,
        value: Value,
        position: Position,
    ) -> RuntimeResult<Value> {
        match target {
            AssignTarget::Variable { name, position } => {
                self.write_var(name, value, *position)?;
                self.read_var(name, *position)
            }
            AssignTarget::Member {
                object,
                field,
                position,
            } => {
                // static field write through the class name
                if let Expression::Variable { name, .. } = object.as_ref() {
                    if self.is_class_name(name) {
                        let owners: Vec<String> = self
                            .analysis
                            .classes
                            .chain(name)
                            .iter()
                            .map(|c| c.name.clone())
                            .collect();
                        for owner in owners {
                            let key = (owner, field.clone());
                            if let Some(slot) = self.statics.get_mut(&key) {
                                *slot = coerce_like(value, slot);
                                return Ok(slot.clone());
                            }
                        }
                        return fail(*position, format!("unknown static field '{field}'"));
                    }
                }

                let handle = self.object_operand(object, *position)?;
                let instance = self
                    .heap
                    .get_mut(handle)
                    .expect("object handles are never dangling");
                match instance.fields.get_mut(field) {
                    Some(slot) => {
                        *slot = coerce_like(value, slot);
                        Ok(slot.clone())
                    }
                    None => fail(*position, format!("unknown field '{field}'")),
                }
            }
            AssignTarget::Index {
                array,
                index,
                position,
            } => {
                let index_value = self.index_operand(index)?;
                // writes go through the variable path so the update sticks
                self.assign_indexed(array, index_value, value, *position)
            }
        }
    }

    /// Array element assignment: locate the owning slot, bounds-check, and
    /// update in place.
    fn assign_indexed(
        &mut self,
        array: &Expression,
        index: i64,
        value: Value,
        position: Position,
    ) -> RuntimeResult<Value> {
        let current = self.eval(array)?;
        let Value::Array(mut elements) = current else {
            return fail(position, "cannot index into a non-array value");
        };
        if index < 0 || index as usize >= elements.len() {
            return fail(
                position,
                format!(
                    "array index {index} out of bounds for length {}",
                    elements.len()
                ),
            );
        }
        let slot = &mut elements[index as usize];
        *slot = coerce_like(value, slot);
        let result = slot.clone();

        // write the updated array back to where it came from
        match array {
            Expression::Variable { name, position } => {
                self.write_var(name, Value::Array(elements), *position)?;
            }
            Expression::MemberAccess {
                object,
                field,
                position,
            } => {
                let handle = self.object_operand(object, *position)?;
                let instance = self
                    .heap
                    .get_mut(handle)
                    .expect("object handles are never dangling");
                instance.fields.insert(field.clone(), Value::Array(elements));
            }
            other => {
                return fail(
                    other.position(),
                    "array element assignment requires a variable or field array",
                )
            }
        }
        Ok(result)
    }

    // ---- expressions ---------------------------------------------------

    fn eval(&mut self, expression: &Expression) -> RuntimeResult<Value> {
        match expression {
            Expression::IntLiteral { value, .. } => Ok(Value::Int(*value)),
            Expression::LongLiteral { value, .. } => Ok(Value::Int(*value)),
            Expression::FloatLiteral { value, .. } => Ok(Value::Float(*value)),
            Expression::BitLiteral { value, .. } => Ok(Value::Bit(*value)),
            Expression::CharLiteral { value, .. } => Ok(Value::Char(*value)),
            Expression::StringLiteral { value, .. } => Ok(Value::Str(value.clone())),
            Expression::BooleanLiteral { value, .. } => Ok(Value::Bool(*value)),
            Expression::NullLiteral { .. } => Ok(Value::Null),
            Expression::Variable { name, position } => self.read_var(name, *position),
            Expression::Grouping { inner, .. } => self.eval(inner),
            Expression::Binary {
                operator,
                left,
                right,
                position,
            } => self.eval_binary(*operator, left, right, *position),
            Expression::Unary {
                operator,
                operand,
                position,
            } => self.eval_unary(*operator, operand, *position),
            Expression::Postfix {
                operator,
                name,
                position,
            } => {
                let old = self.read_var(name, *position)?;
                let Value::Int(current) = old else {
                    return fail(*position, "'++'/'--' target is not an int");
                };
                let updated = match operator {
                    PostfixOperator::Increment => current.wrapping_add(1),
                    PostfixOperator::Decrement => current.wrapping_sub(1),
                };
                self.write_var(name, Value::Int(updated), *position)?;
                Ok(Value::Int(current))
            }
            Expression::Cast {
                target,
                operand,
                position,
            } => {
                let value = self.eval(operand)?;
                self.cast(value, *target, *position)
            }
            Expression::Measure { qubit, .. } => {
                let handle = self.qubit_operand(qubit)?;
                Ok(self.measure_qubit(handle))
            }
            Expression::ArrayLiteral { elements, .. } => {
                let mut values = vec![];
                for element in elements {
                    values.push(self.eval(element)?);
                }
                Ok(Value::Array(values))
            }
            Expression::Index {
                array,
                index,
                position,
            } => {
                let array_value = self.eval(array)?;
                let Value::Array(elements) = array_value else {
                    return fail(*position, "cannot index into a non-array value");
                };
                let index = self.index_operand(index)?;
                if index < 0 || index as usize >= elements.len() {
                    return fail(
                        *position,
                        format!(
                            "array index {index} out of bounds for length {}",
                            elements.len()
                        ),
                    );
                }
                Ok(elements[index as usize].clone())
            }
            Expression::Assignment {
                target,
                value,
                position,
            } => {
                let value = self.eval(value)?;
                self.assign(target, value, *position)
            }
            Expression::This { position } => {
                let handle = self
                    .frames
                    .last()
                    .and_then(|f| f.this_handle)
                    .ok_or(RuntimeError {
                        message: "'this' outside of an instance context".into(),
                        position: *position,
                    })?;
                Ok(Value::Object(handle))
            }
            Expression::MemberAccess {
                object,
                field,
                position,
            } => {
                if let Expression::Variable { name, .. } = object.as_ref() {
                    if self.is_class_name(name) {
                        let owners: Vec<String> = self
                            .analysis
                            .classes
                            .chain(name)
                            .iter()
                            .map(|c| c.name.clone())
                            .collect();
                        for owner in owners {
                            if let Some(value) = self.statics.get(&(owner, field.clone())) {
                                return Ok(value.clone());
                            }
                        }
                        return fail(*position, format!("unknown static field '{field}'"));
                    }
                }
                let handle = self.object_operand(object, *position)?;
                let instance = self
                    .heap
                    .get(handle)
                    .expect("object handles are never dangling");
                instance.fields.get(field).cloned().ok_or(RuntimeError {
                    message: format!("unknown field '{field}'"),
                    position: *position,
                })
            }
            Expression::Call {
                function,
                arguments,
                position,
            } => self.eval_call(function, arguments, *position),
            Expression::MethodCall {
                object,
                method,
                arguments,
                position,
            } => self.eval_method_call(object, method, arguments, *position),
            Expression::SuperMethodCall {
                method,
                arguments,
                position,
            } => {
                let class = self
                    .frames
                    .last()
                    .and_then(|f| f.class.clone())
                    .ok_or(RuntimeError {
                        message: "'super' outside of a class context".into(),
                        position: *position,
                    })?;
                let base = match self.analysis.classes.get(&class).and_then(|c| c.base.clone()) {
                    Some(TypeInfo::Class { name, .. }) => name,
                    _ => {
                        return fail(*position, "'super' has no base class");
                    }
                };
                let this_handle = self.frames.last().and_then(|f| f.this_handle);
                let mut args = vec![];
                for argument in arguments {
                    args.push(self.eval(argument)?);
                }
                self.dispatch_method(&base, method, args, this_handle, *position)
            }
            Expression::New {
                class_name,
                arguments,
                position,
                ..
            } => {
                let mut args = vec![];
                for argument in arguments {
                    args.push(self.eval(argument)?);
                }
                self.construct(class_name, args, *position)
            }
        }
    }

    fn eval_binary(
        &mut self,
        operator: BinaryOperator,
        left: &Expression,
        right: &Expression,
        position: Position,
    ) -> RuntimeResult<Value> {
        use BinaryOperator::*;

        // short-circuit before the right operand is touched
        if matches!(operator, And | Or) {
            let left = self.eval(left)?.is_truthy();
            return match (operator, left) {
                (And, false) => Ok(Value::Bool(false)),
                (Or, true) => Ok(Value::Bool(true)),
                _ => {
                    let right = self.eval(right)?.is_truthy();
                    Ok(Value::Bool(right))
                }
            };
        }

        let lhs = self.eval(left)?;
        let rhs = self.eval(right)?;

        match operator {
            Add => {
                if let (Value::Str(_), _) | (_, Value::Str(_)) = (&lhs, &rhs) {
                    return Ok(Value::Str(format!("{}{}", lhs.render(), rhs.render())));
                }
                self.arithmetic(lhs, rhs, position, i64::wrapping_add, |a, b| a + b)
            }
            Subtract => self.arithmetic(lhs, rhs, position, i64::wrapping_sub, |a, b| a - b),
            Multiply => self.arithmetic(lhs, rhs, position, i64::wrapping_mul, |a, b| a * b),
            Divide => {
                let divisor = rhs.as_float().ok_or(RuntimeError {
                    message: "non-numeric operand in division".into(),
                    position,
                })?;
                if divisor == 0.0 {
                    return fail(position, "division by zero");
                }
                let dividend = lhs.as_float().ok_or(RuntimeError {
                    message: "non-numeric operand in division".into(),
                    position,
                })?;
                Ok(Value::Float(dividend / divisor))
            }
            Modulo => {
                let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) else {
                    return fail(position, "'%' requires integer operands");
                };
                if b == 0 {
                    return fail(position, "division by zero");
                }
                Ok(Value::Int(a.wrapping_rem(b)))
            }
            Less | LessEqual | Greater | GreaterEqual => {
                let (Some(a), Some(b)) = (lhs.as_float(), rhs.as_float()) else {
                    return fail(position, "non-numeric operand in comparison");
                };
                Ok(Value::Bool(match operator {
                    Less => a < b,
                    LessEqual => a <= b,
                    Greater => a > b,
                    _ => a >= b,
                }))
            }
            Equal | NotEqual => {
                let equal = values_equal(&lhs, &rhs);
                Ok(Value::Bool(if operator == Equal { equal } else { !equal }))
            }
            BitAnd | BitOr | BitXor => self.bitwise(operator, lhs, rhs, position),
            And | Or => unreachable!("short-circuited above"),
        }
    }

    fn arithmetic(
        &self,
        lhs: Value,
        rhs: Value,
        position: Position,
        int_op: fn(i64, i64) -> i64,
        float_op: fn(f64, f64) -> f64,
    ) -> RuntimeResult<Value> {
        match (&lhs, &rhs) {
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                let (Some(a), Some(b)) = (lhs.as_float(), rhs.as_float()) else {
                    return fail(position, "non-numeric operand in arithmetic");
                };
                Ok(Value::Float(float_op(a, b)))
            }
            _ => {
                let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) else {
                    return fail(position, "non-numeric operand in arithmetic");
                };
                Ok(Value::Int(int_op(a, b)))
            }
        }
    }

    fn bitwise(
        &self,
        operator: BinaryOperator,
        lhs: Value,
        rhs: Value,
        position: Position,
    ) -> RuntimeResult<Value> {
        let apply = |a: u8, b: u8| -> u8 {
            match operator {
                BinaryOperator::BitAnd => a & b,
                BinaryOperator::BitOr => a | b,
                _ => a ^ b,
            }
        };

        match (lhs, rhs) {
            (Value::Bit(a), Value::Bit(b)) => Ok(Value::Bit(apply(a, b))),
            (Value::Array(a), Value::Array(b)) => {
                if a.len() != b.len() {
                    return fail(
                        position,
                        format!(
                            "bitwise operands have different lengths ({} and {})",
                            a.len(),
                            b.len()
                        ),
                    );
                }
                let mut out = vec![];
                for (x, y) in a.iter().zip(b.iter()) {
                    let (Value::Bit(x), Value::Bit(y)) = (x, y) else {
                        return fail(position, "bitwise operands must be bit arrays");
                    };
                    out.push(Value::Bit(apply(*x, *y)));
                }
                Ok(Value::Array(out))
            }
            _ => fail(position, "bitwise operands must both be bit or bit[]"),
        }
    }

    fn eval_unary(
        &mut self,
        operator: UnaryOperator,
        operand: &Expression,
        position: Position,
    ) -> RuntimeResult<Value> {
        let value = self.eval(operand)?;
        match operator {
            UnaryOperator::Negate => match value {
                Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
                Value::Float(v) => Ok(Value::Float(-v)),
                Value::Bit(v) => Ok(Value::Int(-(v as i64))),
                _ => fail(position, "cannot negate a non-numeric value"),
            },
            UnaryOperator::Not => match value {
                Value::Bool(v) => Ok(Value::Bool(!v)),
                _ => fail(position, "'!' requires a boolean operand"),
            },
            UnaryOperator::BitNot => match value {
                Value::Bit(v) => Ok(Value::Bit(1 - v)),
                Value::Array(elements) => {
                    let mut out = vec![];
                    for element in elements {
                        let Value::Bit(v) = element else {
                            return fail(position, "'~' requires a bit or bit[] operand");
                        };
                        out.push(Value::Bit(1 - v));
                    }
                    Ok(Value::Array(out))
                }
                _ => fail(position, "'~' requires a bit or bit[] operand"),
            },
        }
    }

    fn cast(&self, value: Value, target: PrimitiveType, position: Position) -> RuntimeResult<Value> {
        match target {
            PrimitiveType::Int | PrimitiveType::Long => match value {
                Value::Int(v) => Ok(Value::Int(v)),
                Value::Bit(v) => Ok(Value::Int(v as i64)),
                Value::Float(v) => Ok(Value::Int(v.trunc() as i64)),
                Value::Char(c) => Ok(Value::Int(c as i64)),
                other => fail(position, format!("cannot cast {} to int", other.render())),
            },
            PrimitiveType::Float => match value.as_float() {
                Some(v) => Ok(Value::Float(v)),
                None => fail(position, "cannot cast a non-numeric value to float"),
            },
            PrimitiveType::Bit => {
                let v = match value {
                    Value::Bit(v) => v as i64,
                    Value::Int(v) => v,
                    Value::Float(v) => v.trunc() as i64,
                    other => {
                        return fail(
                            position,
                            format!("cannot cast {} to bit", other.render()),
                        )
                    }
                };
                Ok(Value::Bit((v & 1) as u8))
            }
            other => fail(position, format!("casts to {} are not permitted", other.name())),
        }
    }

    // ---- quantum helpers -----------------------------------------------

    fn qubit_operand(&mut self, expression: &Expression) -> RuntimeResult<usize> {
        let position = expression.position();
        match self.eval(expression)? {
            Value::Qubit(handle) => Ok(handle),
            other => fail(
                position,
                format!("expected a qubit, found {}", other.render()),
            ),
        }
    }

    fn measure_qubit(&mut self, handle: usize) -> Value {
        let outcome = self.sim.measure(handle, &mut self.rng);
        self.qasm.record_measure(handle);
        Value::Bit(outcome)
    }

    fn apply_gate(
        &mut self,
        gate: Gate,
        args: Vec<Value>,
        position: Position,
    ) -> RuntimeResult<()> {
        let mut qubits = vec![];
        for value in args.iter().take(gate.arity()) {
            let Value::Qubit(handle) = value else {
                return fail(position, "gate operands must be qubits");
            };
            qubits.push(*handle);
        }
        let angle = if gate.has_angle() {
            args.last().and_then(|v| v.as_float())
        } else {
            None
        };

        let result = match gate {
            Gate::H => self.sim.h(qubits[0]),
            Gate::X => self.sim.x(qubits[0]),
            Gate::Y => self.sim.y(qubits[0]),
            Gate::Z => self.sim.z(qubits[0]),
            Gate::Rx => self.sim.rx(qubits[0], angle.unwrap_or(0.0)),
            Gate::Ry => self.sim.ry(qubits[0], angle.unwrap_or(0.0)),
            Gate::Rz => self.sim.rz(qubits[0], angle.unwrap_or(0.0)),
            Gate::Cx => self.sim.cx(qubits[0], qubits[1]),
        };

        match result {
            Ok(()) => {
                self.qasm.record_gate(gate, qubits, angle);
                Ok(())
            }
            Err(SimulatorFault::MeasuredQubit(q)) => fail(
                position,
                format!("cannot apply a gate to measured qubit {q}; reset it first"),
            ),
        }
    }

    fn index_operand(&mut self, expression: &Expression) -> RuntimeResult<i64> {
        let position = expression.position();
        self.eval(expression)?
            .as_int()
            .ok_or(RuntimeError {
                message: "array index is not an integer".into(),
                position,
            })
    }

    fn object_operand(
        &mut self,
        expression: &Expression,
        position: Position,
    ) -> RuntimeResult<usize> {
        match self.eval(expression)? {
            Value::Object(handle) => {
                let instance = self
                    .heap
                    .get(handle)
                    .expect("object handles are never dangling");
                if !instance.alive {
                    return fail(position, "use of a destroyed object");
                }
                Ok(handle)
            }
            Value::Null => fail(position, "member access on null"),
            other => fail(
                position,
                format!("expected an object, found {}", other.render()),
            ),
        }
    }

    // ---- calls ---------------------------------------------------------

    fn is_class_name(&self, name: &str) -> bool {
        if self.analysis.classes.get(name).is_none() {
            return false;
        }
        // a runtime variable of the same name cannot exist after analysis
        self.read_var(name, Position::default()).is_err()
    }

    fn eval_call(
        &mut self,
        function: &str,
        arguments: &[Expression],
        position: Position,
    ) -> RuntimeResult<Value> {
        let mut args = vec![];
        for argument in arguments {
            args.push(self.eval(argument)?);
        }

        // methods of the enclosing class shadow free functions
        if let Some(frame) = self.frames.last() {
            if let Some(class) = frame.class.clone() {
                if self
                    .analysis
                    .classes
                    .resolve_methods(&class, &[], function)
                    .iter()
                    .any(|m| m.parameters.len() == args.len())
                {
                    let this_handle = frame.this_handle;
                    return self.dispatch_method(&class, function, args, this_handle, position);
                }
            }
        }

        let signature = self.pick_function(function, &args, position)?;
        if let Some(gate) = signature.gate {
            self.apply_gate(gate, args, position)?;
            return Ok(Value::Null);
        }

        let declaration = self
            .function_decls
            .get(function)
            .and_then(|decls| {
                decls
                    .iter()
                    .find(|d| d.position == signature.position)
                    .copied()
            })
            .ok_or(RuntimeError {
                message: format!("unknown function '{function}'"),
                position,
            })?;
        self.call_function(declaration, &signature, args, position)
    }

    fn pick_function(
        &self,
        name: &str,
        args: &[Value],
        position: Position,
    ) -> RuntimeResult<FunctionSignature> {
        let overloads = self.analysis.functions.overloads(name);
        let mut best: Option<(u32, &FunctionSignature)> = None;
        for signature in overloads {
            if signature.parameters.len() != args.len() {
                continue;
            }
            let Some(cost) = self.match_cost(&signature.parameters, args) else {
                continue;
            };
            if best.map(|(c, _)| cost < c).unwrap_or(true) {
                best = Some((cost, signature));
            }
        }
        match best {
            Some((_, signature)) => Ok(signature.clone()),
            None => fail(position, format!("unknown function '{name}'")),
        }
    }

    fn match_cost(&self, parameters: &[TypeInfo], args: &[Value]) -> Option<u32> {
        let mut total = 0;
        for (parameter, arg) in parameters.iter().zip(args) {
            total += self.value_cost(arg, parameter)?;
        }
        Some(total)
    }

    fn value_cost(&self, value: &Value, parameter: &TypeInfo) -> Option<u32> {
        match parameter {
            TypeInfo::Primitive(PrimitiveType::Int) | TypeInfo::Primitive(PrimitiveType::Long) => {
                match value {
                    Value::Int(_) => Some(0),
                    Value::Bit(_) => Some(1),
                    Value::Float(_) => Some(4),
                    _ => None,
                }
            }
            TypeInfo::Primitive(PrimitiveType::Float) => match value {
                Value::Float(_) => Some(0),
                Value::Int(_) => Some(1),
                Value::Bit(_) => Some(3),
                _ => None,
            },
            TypeInfo::Primitive(PrimitiveType::Bit) => {
                matches!(value, Value::Bit(_)).then_some(0)
            }
            TypeInfo::Primitive(PrimitiveType::Char) => {
                matches!(value, Value::Char(_)).then_some(0)
            }
            TypeInfo::Primitive(PrimitiveType::String) => {
                matches!(value, Value::Str(_)).then_some(0)
            }
            TypeInfo::Primitive(PrimitiveType::Boolean) => {
                matches!(value, Value::Bool(_)).then_some(0)
            }
            TypeInfo::Primitive(PrimitiveType::Qubit) => {
                matches!(value, Value::Qubit(_)).then_some(0)
            }
            TypeInfo::Array { element, .. } => match value {
                Value::Array(elements) => match elements.first() {
                    Some(first) => self.value_cost(first, element),
                    None => Some(0),
                },
                _ => None,
            },
            TypeInfo::Class { name, .. } => match value {
                Value::Null => Some(1),
                Value::Object(handle) => {
                    let instance = self.heap.get(*handle)?;
                    self.analysis
                        .classes
                        .inheritance_distance(&instance.class_name, name)
                }
                _ => None,
            },
            TypeInfo::TypeParam { .. } => match value {
                Value::Object(_) | Value::Null => Some(1),
                _ => None,
            },
            TypeInfo::Null | TypeInfo::Void => None,
        }
    }

    fn call_function(
        &mut self,
        declaration: &FunctionDeclaration,
        signature: &FunctionSignature,
        args: Vec<Value>,
        position: Position,
    ) -> RuntimeResult<Value> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return fail(position, "stack overflow");
        }

        let mut scope = ScopeMap::default();
        for ((parameter, ty), value) in declaration
            .parameters
            .iter()
            .zip(&signature.parameters)
            .zip(args)
        {
            scope.vars.insert(parameter.name.clone(), coerce_to(value, ty));
        }
        self.frames.push(Frame {
            scopes: vec![scope],
            this_handle: None,
            class: None,
        });

        let mut result = Value::Null;
        for statement in &declaration.body {
            match self.exec(statement) {
                Ok(Flow::Normal) => {}
                Ok(Flow::Return(value)) => {
                    result = value;
                    break;
                }
                Err(error) => {
                    self.pop_frame();
                    return Err(error);
                }
            }
        }
        self.pop_frame();
        Ok(coerce_to(result, &signature.return_type))
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            for scope in frame.scopes.into_iter().rev() {
                self.snapshot_scope(scope);
            }
        }
    }

    fn eval_method_call(
        &mut self,
        object: &Expression,
        method: &str,
        arguments: &[Expression],
        position: Position,
    ) -> RuntimeResult<Value> {
        // static dispatch through the class name
        if let Expression::Variable { name, .. } = object {
            if self.is_class_name(name) {
                let mut args = vec![];
                for argument in arguments {
                    args.push(self.eval(argument)?);
                }
                let class = name.clone();
                return self.dispatch_method(&class, method, args, None, position);
            }
        }

        let handle = self.object_operand(object, position)?;
        let class = self
            .heap
            .get(handle)
            .expect("object handles are never dangling")
            .class_name
            .clone();
        let mut args = vec![];
        for argument in arguments {
            args.push(self.eval(argument)?);
        }
        self.dispatch_method(&class, method, args, Some(handle), position)
    }

    /// Walk the chain from `class` looking for the best-matching bodied
    /// overload of `method`; the most-derived class wins (virtual
    /// dispatch).
    fn dispatch_method(
        &mut self,
        class: &str,
        method: &str,
        args: Vec<Value>,
        this_handle: Option<usize>,
        position: Position,
    ) -> RuntimeResult<Value> {
        let chain: Vec<String> = self
            .analysis
            .classes
            .chain(class)
            .iter()
            .map(|c| c.name.clone())
            .collect();

        for class_name in &chain {
            let Some(declaration) = self.class_decls.get(class_name.as_str()).copied() else {
                continue;
            };
            let mut best: Option<(u32, &MethodDeclaration)> = None;
            for candidate in &declaration.methods {
                if candidate.name != method || candidate.body.is_none() {
                    continue;
                }
                let Some(info) = self
                    .analysis
                    .classes
                    .get(class_name)
                    .and_then(|c| c.methods.get(method))
                    .and_then(|bucket| bucket.iter().find(|m| m.position == candidate.position))
                else {
                    continue;
                };
                if info.parameters.len() != args.len() {
                    continue;
                }
                let Some(cost) = self.match_cost(&info.parameters, &args) else {
                    continue;
                };
                if best.map(|(c, _)| cost < c).unwrap_or(true) {
                    best = Some((cost, candidate));
                }
            }
            if let Some((_, declaration)) = best {
                return self.call_method(class_name.clone(), declaration, args, this_handle, position);
            }
        }

        fail(position, format!("unknown method '{class}.{method}'"))
    }

    fn call_method(
        &mut self,
        class: String,
        declaration: &MethodDeclaration,
        args: Vec<Value>,
        this_handle: Option<usize>,
        position: Position,
    ) -> RuntimeResult<Value> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return fail(position, "stack overflow");
        }

        let mut scope = ScopeMap::default();
        for (parameter, value) in declaration.parameters.iter().zip(args) {
            scope
                .vars
                .insert(parameter.name.clone(), self.coerce_to_node(value, &parameter.ty));
        }
        self.frames.push(Frame {
            scopes: vec![scope],
            this_handle: if declaration.is_static { None } else { this_handle },
            class: Some(class),
        });

        let body = declaration.body.as_ref().expect("dispatch skips bodyless methods");
        let mut result = Value::Null;
        for statement in body {
            match self.exec(statement) {
                Ok(Flow::Normal) => {}
                Ok(Flow::Return(value)) => {
                    result = value;
                    break;
                }
                Err(error) => {
                    self.pop_frame();
                    return Err(error);
                }
            }
        }
        self.pop_frame();
        Ok(result)
    }

    // ---- objects -------------------------------------------------------

    fn construct(
        &mut self,
        class_name: &str,
        args: Vec<Value>,
        position: Position,
    ) -> RuntimeResult<Value> {
        let handle = self.heap.alloc(class_name.to_string());
        self.init_fields(class_name, handle)?;
        self.run_matching_constructor(class_name, args, handle, position)?;
        Ok(Value::Object(handle))
    }

    /// Populate the instance's field table for the whole chain, root first,
    /// evaluating declared initialisers in instance context.
    fn init_fields(&mut self, class_name: &str, handle: usize) -> RuntimeResult<()> {
        let chain: Vec<String> = self
            .analysis
            .classes
            .chain(class_name)
            .iter()
            .map(|c| c.name.clone())
            .collect();

        for class in chain.iter().rev() {
            let Some(declaration) = self.class_decls.get(class.as_str()).copied() else {
                continue;
            };
            let fields: Vec<_> = declaration
                .fields
                .iter()
                .filter(|f| !f.is_static)
                .collect();
            for field in fields {
                self.frames.push(Frame {
                    scopes: vec![ScopeMap::default()],
                    this_handle: Some(handle),
                    class: Some(class.clone()),
                });
                let value = match &field.initializer {
                    Some(initializer) => {
                        let raw = self.eval(initializer)?;
                        self.coerce_to_node(raw, &field.ty)
                    }
                    None => self.default_value(&field.ty)?,
                };
                self.frames.pop();

                if field.is_tracked() {
                    for qubit in qubit_handles(&value) {
                        self.tracked_handles.insert(qubit);
                    }
                }
                self.heap
                    .get_mut(handle)
                    .expect("object handles are never dangling")
                    .fields
                    .insert(field.name.clone(), value);
            }
        }
        Ok(())
    }

    fn run_matching_constructor(
        &mut self,
        class_name: &str,
        args: Vec<Value>,
        handle: usize,
        position: Position,
    ) -> RuntimeResult<()> {
        if class_name == "Object" {
            return Ok(());
        }
        let Some(declaration) = self.class_decls.get(class_name).copied() else {
            return Ok(());
        };

        let info = self
            .analysis
            .classes
            .get(class_name)
            .expect("constructor target is registered");
        let mut best: Option<(u32, &ConstructorDeclaration)> = None;
        for candidate in &declaration.constructors {
            let Some(registered) = info
                .constructors
                .iter()
                .find(|c| c.position == candidate.position)
            else {
                continue;
            };
            if registered.parameters.len() != args.len() {
                continue;
            }
            let Some(cost) = self.match_cost(&registered.parameters, &args) else {
                continue;
            };
            if best.map(|(c, _)| cost < c).unwrap_or(true) {
                best = Some((cost, candidate));
            }
        }
        let Some((_, constructor)) = best else {
            return fail(
                position,
                format!("no matching constructor for '{class_name}'"),
            );
        };

        self.run_constructor(class_name, constructor, args, handle, position)
    }

    fn run_constructor(
        &mut self,
        class_name: &str,
        constructor: &ConstructorDeclaration,
        args: Vec<Value>,
        handle: usize,
        position: Position,
    ) -> RuntimeResult<()> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return fail(position, "stack overflow");
        }

        let base_name = match self
            .analysis
            .classes
            .get(class_name)
            .and_then(|c| c.base.clone())
        {
            Some(TypeInfo::Class { name, .. }) => Some(name),
            _ => None,
        };

        let mut scope = ScopeMap::default();
        for (parameter, value) in constructor.parameters.iter().zip(&args) {
            scope.vars.insert(
                parameter.name.clone(),
                self.coerce_to_node(value.clone(), &parameter.ty),
            );
        }
        self.frames.push(Frame {
            scopes: vec![scope],
            this_handle: Some(handle),
            class: Some(class_name.to_string()),
        });

        let run = (|| -> RuntimeResult<()> {
            match &constructor.body {
                ConstructorBody::Default => {
                    if let Some(base) = &base_name {
                        self.run_matching_constructor(base, vec![], handle, position)?;
                    }
                    for (parameter, value) in constructor.parameters.iter().zip(args) {
                        let coerced = self.coerce_to_node(value, &parameter.ty);
                        let instance = self
                            .heap
                            .get_mut(handle)
                            .expect("object handles are never dangling");
                        if let Some(slot) = instance.fields.get_mut(&parameter.name) {
                            *slot = coerce_like(coerced, slot);
                        }
                    }
                    Ok(())
                }
                ConstructorBody::Block(body) => {
                    let mut rest = body.as_slice();
                    match body.first() {
                        Some(Statement::SuperConstructorCall { arguments, position }) => {
                            let mut super_args = vec![];
                            for argument in arguments {
                                super_args.push(self.eval(argument)?);
                            }
                            if let Some(base) = &base_name {
                                self.run_matching_constructor(
                                    base, super_args, handle, *position,
                                )?;
                            }
                            rest = &body[1..];
                        }
                        _ => {
                            if let Some(base) = &base_name {
                                self.run_matching_constructor(base, vec![], handle, position)?;
                            }
                        }
                    }
                    for statement in rest {
                        if let Flow::Return(_) = self.exec(statement)? {
                            break;
                        }
                    }
                    Ok(())
                }
            }
        })();

        self.pop_frame();
        run
    }

    /// Destructor chain runs base-to-derived; tracked fields snapshot at
    /// destruction, then the instance is reclaimed.
    fn destroy(&mut self, handle: usize, position: Position) -> RuntimeResult<()> {
        let instance = self
            .heap
            .get(handle)
            .expect("object handles are never dangling");
        if !instance.alive {
            return fail(position, "use of a destroyed object");
        }
        let class_name = instance.class_name.clone();

        let chain: Vec<String> = self
            .analysis
            .classes
            .chain(&class_name)
            .iter()
            .map(|c| c.name.clone())
            .collect();

        for class in chain.iter().rev() {
            let Some(declaration) = self.class_decls.get(class.as_str()).copied() else {
                continue;
            };
            let Some(destructor) = &declaration.destructor else {
                continue;
            };
            self.frames.push(Frame {
                scopes: vec![ScopeMap::default()],
                this_handle: Some(handle),
                class: Some(class.clone()),
            });
            for statement in &destructor.body {
                match self.exec(statement) {
                    Ok(Flow::Normal) => {}
                    Ok(Flow::Return(_)) => break,
                    Err(error) => {
                        self.pop_frame();
                        return Err(error);
                    }
                }
            }
            self.pop_frame();
        }

        let mut snapshots = vec![];
        for class in self.analysis.classes.chain(&class_name) {
            for field in &class.fields {
                if field.is_tracked {
                    if let Some(value) = self
                        .heap
                        .get(handle)
                        .and_then(|i| i.fields.get(&field.name))
                    {
                        snapshots.push((field.name.clone(), value.clone()));
                    }
                }
            }
        }
        for (name, value) in snapshots {
            let outcome = self.outcome_of(&value);
            self.tracker.record_once(&name, outcome);
        }

        self.heap
            .get_mut(handle)
            .expect("object handles are never dangling")
            .alive = false;
        Ok(())
    }

    // ---- values --------------------------------------------------------

    /// Default value for a declared type; allocates for qubit storage.
    fn default_value(&mut self, ty: &TypeNode) -> RuntimeResult<Value> {
        Ok(match ty {
            TypeNode::Primitive { primitive, .. } => match primitive {
                PrimitiveType::Int | PrimitiveType::Long => Value::Int(0),
                PrimitiveType::Float => Value::Float(0.0),
                PrimitiveType::Bit => Value::Bit(0),
                PrimitiveType::Char => Value::Char('\0'),
                PrimitiveType::String => Value::Str(String::new()),
                PrimitiveType::Boolean => Value::Bool(false),
                PrimitiveType::Qubit => Value::Qubit(self.sim.allocate()),
            },
            TypeNode::Named { .. } => Value::Null,
            TypeNode::Array { element, size, .. } => {
                let length = match size {
                    Some(crate::parser::ast::ArraySize::Fixed(n)) => *n,
                    _ => 0,
                };
                let mut elements = vec![];
                for _ in 0..length {
                    elements.push(self.default_value(element)?);
                }
                Value::Array(elements)
            }
            TypeNode::Void { .. } => Value::Null,
        })
    }

    /// Coerce a value into the representation a declared type expects.
    fn coerce_to_node(&self, value: Value, ty: &TypeNode) -> Value {
        match ty {
            TypeNode::Primitive { primitive, .. } => coerce_primitive(value, *primitive),
            TypeNode::Array { element, .. } => match value {
                Value::Array(elements) => Value::Array(
                    elements
                        .into_iter()
                        .map(|v| self.coerce_to_node(v, element))
                        .collect(),
                ),
                other => other,
            },
            _ => value,
        }
    }
}

fn qubit_handles(value: &Value) -> Vec<usize> {
    match value {
        Value::Qubit(handle) => vec![*handle],
        Value::Array(elements) => elements
            .iter()
            .filter_map(|v| match v {
                Value::Qubit(handle) => Some(*handle),
                _ => None,
            })
            .collect(),
        _ => vec![],
    }
}

fn coerce_primitive(value: Value, primitive: PrimitiveType) -> Value {
    match primitive {
        PrimitiveType::Int | PrimitiveType::Long => match value {
            Value::Bit(v) => Value::Int(v as i64),
            Value::Float(v) => Value::Int(v.trunc() as i64),
            other => other,
        },
        PrimitiveType::Float => match value {
            Value::Int(v) => Value::Float(v as f64),
            Value::Bit(v) => Value::Float(v as f64),
            other => other,
        },
        _ => value,
    }
}

/// Coerce by the TypeInfo of a signature slot.
fn coerce_to(value: Value, ty: &TypeInfo) -> Value {
    match ty {
        TypeInfo::Primitive(primitive) => coerce_primitive(value, *primitive),
        TypeInfo::Array { element, .. } => match value {
            Value::Array(elements) => Value::Array(
                elements.into_iter().map(|v| coerce_to(v, element)).collect(),
            ),
            other => other,
        },
        _ => value,
    }
}

/// Coerce a new value to the representation already stored in a slot, so a
/// float slot keeps holding floats across assignments.
fn coerce_like(value: Value, slot: &Value) -> Value {
    match slot {
        Value::Float(_) => match value.as_float() {
            Some(v) => Value::Float(v),
            None => value,
        },
        Value::Int(_) => match value {
            Value::Float(v) => Value::Int(v.trunc() as i64),
            Value::Bit(v) => Value::Int(v as i64),
            other => other,
        },
        _ => value,
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Float(_), _) | (_, Value::Float(_)) => match (lhs.as_float(), rhs.as_float()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        (Value::Int(_) | Value::Bit(_), Value::Int(_) | Value::Bit(_)) => {
            lhs.as_int() == rhs.as_int()
        }
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Char(a), Value::Char(b)) => a == b,
        (Value::Object(a), Value::Object(b)) => a == b,
        (Value::Qubit(a), Value::Qubit(b)) => a == b,
        (Value::Null, Value::Null) => true,
        (Value::Null, Value::Object(_)) | (Value::Object(_), Value::Null) => false,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::semantic::analyse;

    fn run_source(input: &str, config: RunConfig) -> RuntimeResult<ExecutionReport> {
        let tokens = Lexer::new(input).lex().expect("lexing failed");
        let mut program = Parser::new(tokens).parse().expect("parsing failed");
        let analysis = analyse(&mut program).expect("analysis failed");
        run(&program, &analysis, config)
    }

    fn run_once(input: &str) -> RuntimeResult<ExecutionReport> {
        run_source(
            input,
            RunConfig {
                seed: Some(11),
                warn_on_exit: false,
                ..RunConfig::default()
            },
        )
    }

    #[test]
    fn test_echo_arithmetic() {
        let report = run_once(
            "function main() -> void { int x = 2 + 3 * 4; echo x; echo 10 % 3; }",
        )
        .unwrap();
        assert_eq!(report.stdout, "14\n1\n");
    }

    #[test]
    fn test_echo_off_silences() {
        let report = run_source(
            "function main() -> void { echo 1; }",
            RunConfig {
                echo: false,
                seed: Some(1),
                warn_on_exit: false,
                ..RunConfig::default()
            },
        )
        .unwrap();
        assert_eq!(report.stdout, "");
    }

    #[test]
    fn test_integer_division_yields_float() {
        let report = run_once("function main() -> void { echo 1 / 2; int t = 7 / 2; echo t; }")
            .unwrap();
        assert_eq!(report.stdout, "0.5\n3\n");
    }

    #[test]
    fn test_division_by_zero_aborts() {
        let error = run_once("function main() -> void { int x = 1/0; }").unwrap_err();
        assert!(error.message.contains("division by zero"));
        assert_eq!(error.position.line, 1);
    }

    #[test]
    fn test_index_out_of_bounds() {
        let error = run_once(
            "function main() -> void { int[] xs = {1, 2}; echo xs[2]; }",
        )
        .unwrap_err();
        assert!(error.message.contains("out of bounds"));

        let report = run_once(
            "function main() -> void { int[] xs = {1, 2}; echo xs[1]; }",
        )
        .unwrap();
        assert_eq!(report.stdout, "2\n");
    }

    #[test]
    fn test_string_concatenation() {
        let report = run_once(
            "function main() -> void { echo \"n = \" + 42; echo \"b = \" + true; }",
        )
        .unwrap();
        assert_eq!(report.stdout, "n = 42\nb = true\n");
    }

    #[test]
    fn test_while_and_postfix() {
        let report = run_once(
            "function main() -> void { int i = 0; int sum = 0; \
             while (i < 5) { sum = sum + i; i++; } echo sum; }",
        )
        .unwrap();
        assert_eq!(report.stdout, "10\n");
    }

    #[test]
    fn test_for_loop() {
        let report = run_once(
            "function main() -> void { int sum = 0; \
             for (int i = 1; i <= 4; i++) { sum = sum + i; } echo sum; }",
        )
        .unwrap();
        assert_eq!(report.stdout, "10\n");
    }

    #[test]
    fn test_function_calls_and_recursion() {
        let report = run_once(
            "function fib(int n) -> int { \
                if (n < 2) { return n; } \
                return fib(n - 1) + fib(n - 2); \
             } \
             function main() -> void { echo fib(10); }",
        )
        .unwrap();
        assert_eq!(report.stdout, "55\n");
    }

    #[test]
    fn test_stack_overflow_is_a_runtime_error() {
        let error = run_once(
            "function loop(int n) -> int { return loop(n); } \
             function main() -> void { echo loop(1); }",
        )
        .unwrap_err();
        assert!(error.message.contains("stack overflow"));
    }

    #[test]
    fn test_objects_and_virtual_dispatch() {
        let report = run_once(
            "class Animal {\
                constructor() -> Animal { }\
                public virtual function speak() -> string { return \"...\"; }\
             }\
             class Dog extends Animal {\
                constructor() -> Dog { }\
                public override function speak() -> string { return \"woof\"; }\
             }\
             function main() -> void {\
                Animal a = new Dog();\
                echo a.speak();\
             }",
        )
        .unwrap();
        assert_eq!(report.stdout, "woof\n");
    }

    #[test]
    fn test_default_constructor_binds_parameters() {
        let report = run_once(
            "class Point {\
                private final int x;\
                private final int y;\
                constructor(int x, int y) -> Point = default;\
                public function sum() -> int { return x + y; }\
             }\
             function main() -> void { Point p = new Point(3, 4); echo p.sum(); }",
        )
        .unwrap();
        assert_eq!(report.stdout, "7\n");
    }

    #[test]
    fn test_destroy_runs_destructors_base_to_derived() {
        let report = run_once(
            "class Base {\
                constructor() -> Base { }\
                destructor() { echo \"base\"; }\
             }\
             class Derived extends Base {\
                constructor() -> Derived { }\
                destructor() { echo \"derived\"; }\
             }\
             function main() -> void {\
                Derived d = new Derived();\
                destroy d;\
             }",
        )
        .unwrap();
        assert_eq!(report.stdout, "base\nderived\n");
    }

    #[test]
    fn test_use_after_destroy_fails() {
        let error = run_once(
            "class Foo {\
                public int x = 1;\
                constructor() -> Foo { }\
             }\
             function main() -> void {\
                Foo f = new Foo();\
                destroy f;\
                echo f.x;\
             }",
        )
        .unwrap_err();
        assert!(error.message.contains("destroyed"));
    }

    #[test]
    fn test_destroy_null_is_a_noop() {
        assert!(run_once(
            "class Foo { constructor() -> Foo { } }\
             function main() -> void { Foo f = null; destroy f; }"
        )
        .is_ok());
    }

    #[test]
    fn test_null_member_access_fails() {
        let error = run_once(
            "class Foo { public int x = 1; constructor() -> Foo { } }\
             function main() -> void { Foo f = null; echo f.x; }",
        )
        .unwrap_err();
        assert!(error.message.contains("null"));
    }

    #[test]
    fn test_gate_after_measurement_aborts() {
        let error = run_once(
            "function main() -> void { qubit q; h(q); measure q; x(q); }",
        )
        .unwrap_err();
        assert!(error.message.contains("measured"));
    }

    #[test]
    fn test_reset_clears_measured_flag() {
        assert!(run_once(
            "function main() -> void { qubit q; h(q); measure q; reset q; x(q); measure q; }"
        )
        .is_ok());
    }

    #[test]
    fn test_tracked_qubit_counts() {
        let report = run_source(
            "@shots(64) function main() -> void { @tracked qubit q; x(q); measure q; }",
            RunConfig {
                shots: 64,
                seed: Some(3),
                warn_on_exit: false,
                ..RunConfig::default()
            },
        )
        .unwrap();

        let outcomes = report.tracked.sorted_outcomes("q");
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, "1");
        assert_eq!(outcomes[0].1, 64);
    }

    #[test]
    fn test_unmeasured_tracked_qubit_records_question_mark() {
        let report = run_source(
            "@shots(8) function main() -> void { @tracked qubit q; h(q); }",
            RunConfig {
                shots: 8,
                seed: Some(5),
                warn_on_exit: false,
                ..RunConfig::default()
            },
        )
        .unwrap();

        let outcomes = report.tracked.sorted_outcomes("q");
        assert_eq!(outcomes, vec![(&"?".to_string(), 8)]);
    }

    #[test]
    fn test_partially_measured_tracked_array_is_unknown() {
        let report = run_once(
            "function main() -> void { @tracked qubit[2] r; measure r[0]; }",
        )
        .unwrap();

        let outcomes = report.tracked.sorted_outcomes("r");
        assert_eq!(outcomes, vec![(&"?".to_string(), 1)]);
    }

    #[test]
    fn test_qasm_trace_for_bell_pair() {
        let report = run_once(
            "function main() -> void {\
                qubit[2] r;\
                h(r[0]);\
                cx(r[0], r[1]);\
                measure r[0];\
                measure r[1];\
             }",
        )
        .unwrap();

        assert!(report.qasm.contains("OPENQASM 2.0;"));
        assert!(report.qasm.contains("include \"qelib1.inc\";"));
        assert!(report.qasm.contains("qreg q[2];"));
        assert!(report.qasm.contains("h q[0];"));
        assert!(report.qasm.contains("cx q[0],q[1];"));
        assert!(report.qasm.contains("measure q[1] -> c[1];"));
    }

    #[test]
    fn test_qasm_without_measurement_has_no_measure_lines() {
        let report = run_once("function main() -> void { qubit q; h(q); }").unwrap();
        assert!(!report.qasm.contains("measure"));
    }

    #[test]
    fn test_statics_and_globals() {
        let report = run_once(
            "static class Counter {\
                public static int total = 0;\
                public static function bump() -> void { total = total + 1; }\
             }\
             int base = 10;\
             function main() -> void {\
                Counter.bump();\
                Counter.bump();\
                echo base + Counter.total;\
             }",
        )
        .unwrap();
        assert_eq!(report.stdout, "12\n");
    }

    #[test]
    fn test_bitwise_arrays() {
        let report = run_once(
            "function main() -> void {\
                bit[2] a = {0b, 1b};\
                bit[2] b = {1b, 1b};\
                echo a & b;\
                echo a | b;\
                echo ~a;\
             }",
        )
        .unwrap();
        assert_eq!(report.stdout, "{0, 1}\n{1, 1}\n{1, 0}\n");
    }

    #[test]
    fn test_ternary_statement() {
        let report = run_once(
            "function main() -> void { int x = 3; x > 2 ? echo \"big\"; : echo \"small\"; }",
        )
        .unwrap();
        assert_eq!(report.stdout, "big\n");
    }

    #[test]
    fn test_casts() {
        let report = run_once(
            "function main() -> void {\
                echo (int) 3.9f;\
                echo (float) 2;\
                echo (bit) 3;\
                echo (int) 'A';\
             }",
        )
        .unwrap();
        assert_eq!(report.stdout, "3\n2\n1\n65\n");
    }

    #[test]
    fn test_shots_are_independent() {
        // a fresh evaluator per shot; the global counter never accumulates
        let report = run_source(
            "int counter = 0;\
             function main() -> void { counter = counter + 1; echo counter; }",
            RunConfig {
                shots: 3,
                seed: Some(9),
                warn_on_exit: false,
                ..RunConfig::default()
            },
        )
        .unwrap();
        assert_eq!(report.stdout, "1\n1\n1\n");
    }
}
