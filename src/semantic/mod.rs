//! Semantic analysis for Bloch.
//!
//! Validates a parsed [`Program`]: binds names, resolves types, checks
//! operator/assignment/call compatibility, enforces annotation and class
//! rules, and performs the two resolver fixups (constant array sizes,
//! diamond type arguments). On success the returned [`Analysis`] carries the
//! class registry and function table the runtime dispatches through.

mod classes;
mod registry;
mod scope;
mod types;

pub use registry::*;
pub use types::*;

use crate::error::{Position, SemanticError, SemanticResult};
use crate::parser::ast::{
    Annotation, AnnotationKind, ArraySize, AssignTarget, BinaryOperator, ClassDeclaration,
    ConstructorBody, Expression, FieldDeclaration, FunctionDeclaration, MethodDeclaration,
    PostfixOperator, PrimitiveType, Program, Statement, TypeNode, UnaryOperator, Visibility,
};

use self::scope::{Scope, ScopeEntry};

/// Metadata produced by a successful analysis, consumed by the runtime.
#[derive(Debug)]
pub struct Analysis {
    pub classes: ClassRegistry,
    pub functions: FunctionTable,
}

/// Analyse `program` in place (the resolver fixups mutate type nodes and
/// `new` expressions).
pub fn analyse(program: &mut Program) -> SemanticResult<Analysis> {
    Analyser::new().analyse(program)
}

struct Analyser {
    registry: ClassRegistry,
    functions: FunctionTable,
    scope: Scope,
    current_class: Option<String>,
    current_return: Option<TypeInfo>,
    in_static_context: bool,
    in_constructor: bool,
    /// Set only while checking the first top-level statement of a
    /// constructor body; `super(...)` is invalid anywhere else.
    super_call_allowed: bool,
    /// Whether the statement under check is a top-level constructor
    /// statement; assignments to `final` fields are restricted to these.
    at_constructor_top_level: bool,
}

fn err<T>(position: Position, message: impl Into<String>) -> SemanticResult<T> {
    Err(SemanticError {
        message: message.into(),
        position,
    })
}

impl Analyser {
    fn new() -> Self {
        Self {
            registry: ClassRegistry::new(),
            functions: FunctionTable::new(),
            scope: Scope::new(),
            current_class: None,
            current_return: None,
            in_static_context: false,
            in_constructor: false,
            super_call_allowed: false,
            at_constructor_top_level: false,
        }
    }

    fn analyse(mut self, program: &mut Program) -> SemanticResult<Analysis> {
        fixup_array_sizes(program)?;

        self.register_classes(program)?;
        self.register_functions(program)?;
        classes::validate(&mut self.registry, program)?;

        // class names share the namespace with variables
        let names: Vec<String> = self.registry.names().cloned().collect();
        for name in names {
            let ty = TypeInfo::class(name.clone());
            self.scope.declare(&name, ScopeEntry::type_name(ty));
        }

        // top-level statements run before main and populate the globals
        for statement in &mut program.statements {
            self.check_statement(statement)?;
        }

        for class in &mut program.classes {
            self.check_class(class)?;
        }

        for function in &mut program.functions {
            self.check_function(function)?;
        }

        Ok(Analysis {
            classes: self.registry,
            functions: self.functions,
        })
    }

    // ---- registry build ------------------------------------------------

    fn register_classes(&mut self, program: &Program) -> SemanticResult<()> {
        // skeletons first so member types can refer to any class
        for class in &program.classes {
            if self.registry.contains(&class.name) {
                return err(
                    class.position,
                    format!("class '{}' is already defined", class.name),
                );
            }
            self.registry.insert(ClassInfo {
                name: class.name.clone(),
                base: None,
                is_abstract: class.is_abstract,
                is_static: class.is_static,
                type_parameters: class
                    .type_parameters
                    .iter()
                    .map(|p| (p.name.clone(), TypeInfo::object()))
                    .collect(),
                fields: vec![],
                methods: Default::default(),
                constructors: vec![],
                has_destructor: class.destructor.is_some(),
                abstract_methods: vec![],
                position: class.position,
            });
        }

        for class in &program.classes {
            self.current_class = Some(class.name.clone());

            // resolve type parameter bounds
            let mut type_parameters = vec![];
            for parameter in &class.type_parameters {
                let bound = match &parameter.bound {
                    Some(node) => {
                        let ty = self.type_from_ast(node)?;
                        if !matches!(ty, TypeInfo::Class { .. }) {
                            return err(
                                node.position(),
                                format!("type parameter bound '{ty}' is not a class type"),
                            );
                        }
                        ty
                    }
                    None => TypeInfo::object(),
                };
                type_parameters.push((parameter.name.clone(), bound));
            }
            self.registry.get_mut(&class.name).unwrap().type_parameters = type_parameters;

            let base = match &class.base {
                Some(node) => {
                    let ty = self.type_from_ast(node)?;
                    let TypeInfo::Class { ref name, .. } = ty else {
                        return err(
                            node.position(),
                            format!("cannot extend non-class type '{ty}'"),
                        );
                    };
                    if self.registry.get(name).map(|c| c.is_static).unwrap_or(false) {
                        return err(node.position(), format!("cannot extend static class '{name}'"));
                    }
                    Some(ty)
                }
                None => Some(TypeInfo::object()),
            };
            self.registry.get_mut(&class.name).unwrap().base = base;

            let mut fields = vec![];
            for field in &class.fields {
                if fields.iter().any(|f: &FieldInfo| f.name == field.name) {
                    return err(
                        field.position,
                        format!("field '{}' is already declared in this class", field.name),
                    );
                }
                self.check_member_annotations(&field.annotations, field.ty.clone(), true)?;
                let ty = self.type_from_ast(&field.ty)?;
                if ty == TypeInfo::Void {
                    return err(field.position, "fields cannot have type void");
                }
                fields.push(FieldInfo {
                    name: field.name.clone(),
                    visibility: field.visibility,
                    is_static: field.is_static,
                    is_final: field.is_final,
                    is_tracked: field.is_tracked(),
                    ty,
                    has_initializer: field.initializer.is_some(),
                    owner: class.name.clone(),
                    position: field.position,
                });
            }
            self.registry.get_mut(&class.name).unwrap().fields = fields;

            for method in &class.methods {
                let mut parameters = vec![];
                for parameter in &method.parameters {
                    parameters.push(self.type_from_ast(&parameter.ty)?);
                }
                let return_type = self.type_from_ast(&method.return_type)?;
                let info = MethodInfo {
                    name: method.name.clone(),
                    visibility: method.visibility,
                    is_static: method.is_static,
                    is_virtual: method.is_virtual,
                    is_override: method.is_override,
                    is_final: method.is_final,
                    is_abstract: method.body.is_none(),
                    is_quantum: method.has_annotation(AnnotationKind::Quantum),
                    parameters,
                    return_type,
                    owner: class.name.clone(),
                    position: method.position,
                };

                let class_info = self.registry.get_mut(&class.name).unwrap();
                let bucket = class_info.methods.entry(method.name.clone()).or_default();
                if bucket.iter().any(|m| m.same_signature(&info)) {
                    return err(
                        method.position,
                        format!(
                            "method '{}' with this signature is already declared",
                            method.name
                        ),
                    );
                }
                bucket.push(info);
            }

            for constructor in &class.constructors {
                let mut parameters = vec![];
                for parameter in &constructor.parameters {
                    parameters.push(self.type_from_ast(&parameter.ty)?);
                }
                let info = ConstructorInfo {
                    visibility: constructor.visibility,
                    parameters,
                    is_default: matches!(constructor.body, ConstructorBody::Default),
                    position: constructor.position,
                };
                let class_info = self.registry.get_mut(&class.name).unwrap();
                if class_info
                    .constructors
                    .iter()
                    .any(|c| c.parameters == info.parameters)
                {
                    return err(
                        constructor.position,
                        "a constructor with this signature is already declared",
                    );
                }
                class_info.constructors.push(info);
            }
        }

        self.current_class = None;
        Ok(())
    }

    fn register_functions(&mut self, program: &Program) -> SemanticResult<()> {
        for function in &program.functions {
            if self
                .functions
                .overloads(&function.name)
                .iter()
                .any(|f| f.gate.is_some())
            {
                return err(
                    function.position,
                    format!("'{}' redefines a built-in gate", function.name),
                );
            }

            let mut parameters = vec![];
            for parameter in &function.parameters {
                parameters.push(self.type_from_ast(&parameter.ty)?);
            }
            let return_type = self.type_from_ast(&function.return_type)?;

            if self
                .functions
                .overloads(&function.name)
                .iter()
                .any(|f| f.parameters == parameters)
            {
                return err(
                    function.position,
                    format!(
                        "function '{}' with this signature is already defined",
                        function.name
                    ),
                );
            }

            self.functions.insert(FunctionSignature {
                name: function.name.clone(),
                parameters,
                return_type,
                is_quantum: function.has_annotation(AnnotationKind::Quantum),
                gate: None,
                position: function.position,
            });
        }
        Ok(())
    }

    // ---- type resolution -----------------------------------------------

    fn type_from_ast(&self, node: &TypeNode) -> SemanticResult<TypeInfo> {
        match node {
            TypeNode::Primitive { primitive, .. } => Ok(TypeInfo::Primitive(*primitive)),
            TypeNode::Void { .. } => Ok(TypeInfo::Void),
            TypeNode::Array { element, size, position } => {
                let element = self.type_from_ast(element)?;
                if element == TypeInfo::Void {
                    return err(*position, "arrays of void are not a type");
                }
                let size = match size {
                    None => None,
                    Some(ArraySize::Fixed(n)) => Some(*n),
                    Some(ArraySize::Expr(_)) => {
                        return err(
                            *position,
                            "array size must be a constant integer expression",
                        );
                    }
                };
                Ok(TypeInfo::Array {
                    element: Box::new(element),
                    size,
                })
            }
            TypeNode::Named {
                name,
                type_args,
                position,
            } => {
                // type parameters of the enclosing class win over classes
                if let Some(class_name) = &self.current_class {
                    if let Some(class) = self.registry.get(class_name) {
                        if let Some((_, bound)) = class
                            .type_parameters
                            .iter()
                            .find(|(n, _)| n == name)
                        {
                            if !type_args.is_empty() {
                                return err(
                                    *position,
                                    format!("type parameter '{name}' does not take arguments"),
                                );
                            }
                            return Ok(TypeInfo::TypeParam {
                                name: name.clone(),
                                bound: Box::new(bound.clone()),
                            });
                        }
                    }
                }

                let Some(class) = self.registry.get(name) else {
                    return err(*position, format!("unknown type '{name}'"));
                };

                if type_args.len() != class.type_parameters.len() {
                    return err(
                        *position,
                        format!(
                            "'{name}' takes {} type argument(s) but {} were given",
                            class.type_parameters.len(),
                            type_args.len()
                        ),
                    );
                }

                let mut args = vec![];
                for (node, (parameter, bound)) in
                    type_args.iter().zip(class.type_parameters.iter())
                {
                    let arg = self.type_from_ast(node)?;
                    if !arg.is_class() {
                        return err(
                            node.position(),
                            format!("type argument '{arg}' is not a class type"),
                        );
                    }
                    if conversion_cost(&arg, bound, &self.registry).is_none() {
                        return err(
                            node.position(),
                            format!(
                                "type argument '{arg}' for '{parameter}' is not within bound '{bound}'"
                            ),
                        );
                    }
                    args.push(arg);
                }

                Ok(TypeInfo::Class {
                    name: name.clone(),
                    type_args: args,
                })
            }
        }
    }

    /// The instantiation of the current class with its own type parameters,
    /// as seen from inside its body.
    fn self_type(&self) -> Option<TypeInfo> {
        let name = self.current_class.as_ref()?;
        let class = self.registry.get(name)?;
        Some(TypeInfo::Class {
            name: name.clone(),
            type_args: class
                .type_parameters
                .iter()
                .map(|(n, b)| TypeInfo::TypeParam {
                    name: n.clone(),
                    bound: Box::new(b.clone()),
                })
                .collect(),
        })
    }

    fn assignable(&self, from: &TypeInfo, to: &TypeInfo) -> bool {
        conversion_cost(from, to, &self.registry).is_some()
    }

    // ---- annotations ---------------------------------------------------

    fn check_member_annotations(
        &self,
        annotations: &[Annotation],
        declared: TypeNode,
        _is_field: bool,
    ) -> SemanticResult<()> {
        for annotation in annotations {
            match annotation.kind {
                AnnotationKind::Tracked => {
                    let ty = self.type_from_ast(&declared)?;
                    if !ty.is_qubit_or_qubit_array() {
                        return err(
                            annotation.position,
                            "@tracked only applies to qubit and qubit[] declarations",
                        );
                    }
                }
                AnnotationKind::Quantum => {
                    return err(
                        annotation.position,
                        "@quantum only applies to functions and methods",
                    );
                }
                AnnotationKind::Shots => {
                    return err(annotation.position, "@shots only applies to main");
                }
            }
        }
        Ok(())
    }

    fn check_function_annotations(
        &self,
        annotations: &[Annotation],
        name: &str,
        return_type: &TypeInfo,
        is_main_candidate: bool,
    ) -> SemanticResult<()> {
        for annotation in annotations {
            match annotation.kind {
                AnnotationKind::Quantum => {
                    if is_main_candidate && name == "main" {
                        return err(annotation.position, "main cannot be @quantum");
                    }
                    let bit = TypeInfo::Primitive(PrimitiveType::Bit);
                    let bit_array = TypeInfo::array_of(bit.clone());
                    let ok = *return_type == TypeInfo::Void
                        || *return_type == bit
                        || matches!(return_type, TypeInfo::Array { element, .. } if **element == bit)
                        || *return_type == bit_array;
                    if !ok {
                        return err(
                            annotation.position,
                            "@quantum functions must return bit, bit[], or void",
                        );
                    }
                }
                AnnotationKind::Shots => {
                    if !(is_main_candidate && name == "main") {
                        return err(annotation.position, "@shots only applies to main");
                    }
                    match annotation.argument {
                        Some(n) if n > 0 => {}
                        _ => {
                            return err(
                                annotation.position,
                                "@shots requires a positive integer literal",
                            )
                        }
                    }
                }
                AnnotationKind::Tracked => {
                    return err(
                        annotation.position,
                        "@tracked only applies to qubit and qubit[] declarations",
                    );
                }
            }
        }
        Ok(())
    }

    // ---- declarations --------------------------------------------------

    fn check_function(&mut self, function: &mut FunctionDeclaration) -> SemanticResult<()> {
        let return_type = self.type_from_ast(&function.return_type)?;
        self.check_function_annotations(
            &function.annotations,
            &function.name,
            &return_type,
            true,
        )?;

        if function.name == "main" && !function.parameters.is_empty() {
            return err(function.position, "main takes no parameters");
        }

        self.scope.begin();
        for parameter in &function.parameters {
            let ty = self.type_from_ast(&parameter.ty)?;
            if ty == TypeInfo::Void {
                return err(parameter.position, "parameters cannot have type void");
            }
            if !self
                .scope
                .declare(&parameter.name, ScopeEntry::variable(ty, false, true))
            {
                return err(
                    parameter.position,
                    format!("parameter '{}' is already declared", parameter.name),
                );
            }
        }

        self.current_return = Some(return_type.clone());
        for statement in &mut function.body {
            self.check_statement(statement)?;
        }
        self.current_return = None;
        self.scope.end();

        if return_type != TypeInfo::Void && !block_returns(&function.body) {
            return err(
                function.position,
                format!(
                    "function '{}' must return a value on every path",
                    function.name
                ),
            );
        }

        Ok(())
    }

    fn check_class(&mut self, class: &mut ClassDeclaration) -> SemanticResult<()> {
        if let Some(annotation) = class.annotations.first() {
            return err(
                annotation.position,
                format!("@{} does not apply to classes", annotation.kind.name()),
            );
        }
        self.current_class = Some(class.name.clone());

        for field in &mut class.fields {
            self.check_field(field)?;
        }

        let methods = std::mem::take(&mut class.methods);
        let mut checked_methods = vec![];
        for mut method in methods {
            self.check_method(&class.name, &mut method)?;
            checked_methods.push(method);
        }
        class.methods = checked_methods;

        for constructor in &mut class.constructors {
            if let ConstructorBody::Block(body) = &mut constructor.body {
                self.scope.begin();
                for parameter in &constructor.parameters {
                    let ty = self.type_from_ast(&parameter.ty)?;
                    if !self
                        .scope
                        .declare(&parameter.name, ScopeEntry::variable(ty, false, true))
                    {
                        return err(
                            parameter.position,
                            format!("parameter '{}' is already declared", parameter.name),
                        );
                    }
                }
                self.current_return = Some(TypeInfo::Void);
                self.in_constructor = true;
                for (index, statement) in body.iter_mut().enumerate() {
                    self.super_call_allowed = index == 0;
                    self.at_constructor_top_level = true;
                    self.check_statement(statement)?;
                }
                self.super_call_allowed = false;
                self.at_constructor_top_level = false;
                self.in_constructor = false;
                self.current_return = None;
                self.scope.end();
            }
        }

        if let Some(destructor) = &mut class.destructor {
            self.scope.begin();
            self.current_return = Some(TypeInfo::Void);
            for statement in &mut destructor.body {
                self.check_statement(statement)?;
            }
            self.current_return = None;
            self.scope.end();
        }

        self.current_class = None;
        Ok(())
    }

    fn check_field(&mut self, field: &mut FieldDeclaration) -> SemanticResult<()> {
        let ty = self.type_from_ast(&field.ty)?;
        if let Some(initializer) = &mut field.initializer {
            if ty.is_primitive(PrimitiveType::Qubit) || ty.is_qubit_or_qubit_array() {
                return err(
                    field.position,
                    "qubit fields cannot take an initialiser; allocation is implicit",
                );
            }
            let actual = self.check_expression(initializer, Some(&ty))?;
            if !self.assignable(&actual, &ty) {
                return err(
                    initializer.position(),
                    format!("cannot initialise field of type '{ty}' with '{actual}'"),
                );
            }
        }
        Ok(())
    }

    fn check_method(&mut self, class_name: &str, method: &mut MethodDeclaration) -> SemanticResult<()> {
        let return_type = self.type_from_ast(&method.return_type)?;
        self.check_function_annotations(&method.annotations, &method.name, &return_type, false)?;

        let Some(body) = &mut method.body else {
            return Ok(());
        };

        self.scope.begin();
        for parameter in &method.parameters {
            let ty = self.type_from_ast(&parameter.ty)?;
            if ty == TypeInfo::Void {
                return err(parameter.position, "parameters cannot have type void");
            }
            if !self
                .scope
                .declare(&parameter.name, ScopeEntry::variable(ty, false, true))
            {
                return err(
                    parameter.position,
                    format!("parameter '{}' is already declared", parameter.name),
                );
            }
        }

        self.current_return = Some(return_type.clone());
        self.in_static_context = method.is_static;
        for statement in body.iter_mut() {
            self.check_statement(statement)?;
        }
        self.in_static_context = false;
        self.current_return = None;
        self.scope.end();

        if return_type != TypeInfo::Void && !block_returns(body) {
            return err(
                method.position,
                format!(
                    "method '{class_name}.{}' must return a value on every path",
                    method.name
                ),
            );
        }

        Ok(())
    }

    // ---- statements ----------------------------------------------------

    fn check_statement(&mut self, statement: &mut Statement) -> SemanticResult<()> {
        let allow_super = std::mem::replace(&mut self.super_call_allowed, false);
        let at_ctor_top = std::mem::replace(&mut self.at_constructor_top_level, false);

        match statement {
            Statement::Block { statements, .. } => {
                self.scope.begin();
                for statement in statements {
                    self.check_statement(statement)?;
                }
                self.scope.end();
            }
            Statement::VariableDeclaration {
                annotations,
                is_final,
                ty,
                names,
                initializer,
                position,
            } => {
                self.check_member_annotations(annotations, ty.clone(), false)?;
                let resolved = self.type_from_ast(ty)?;
                if resolved == TypeInfo::Void {
                    return err(*position, "variables cannot have type void");
                }
                if let TypeInfo::Array { element, size } = &resolved {
                    if element.is_primitive(PrimitiveType::Qubit) && size.is_none() {
                        return err(*position, "qubit arrays must declare a fixed size");
                    }
                }

                let is_quantum_storage = resolved.is_qubit_or_qubit_array();
                if let Some(initializer) = initializer {
                    if is_quantum_storage {
                        return err(
                            *position,
                            "qubit declarations cannot take an initialiser; allocation is implicit",
                        );
                    }
                    let actual = self.check_expression(initializer, Some(&resolved))?;
                    if !self.assignable(&actual, &resolved) {
                        return err(
                            initializer.position(),
                            format!("cannot initialise '{resolved}' with a value of type '{actual}'"),
                        );
                    }
                }

                let tracked = annotations
                    .iter()
                    .any(|a| a.kind == AnnotationKind::Tracked);
                let initialized = initializer.is_some() || is_quantum_storage;
                for name in names.iter() {
                    let mut entry =
                        ScopeEntry::variable(resolved.clone(), *is_final, initialized);
                    entry.is_tracked = tracked;
                    if !self.scope.declare(name, entry) {
                        return err(
                            *position,
                            format!("'{name}' is already declared in an enclosing scope"),
                        );
                    }
                }
            }
            Statement::Expression { expression, .. } => {
                self.check_expression(expression, None)?;
            }
            Statement::Assignment {
                target,
                value,
                position,
            } => {
                self.at_constructor_top_level = at_ctor_top;
                let result = self.check_assignment(target, value, *position);
                self.at_constructor_top_level = false;
                result?;
            }
            Statement::Return { value, position } => {
                let Some(expected) = self.current_return.clone() else {
                    return err(*position, "return outside of a function");
                };
                match value {
                    None => {
                        if expected != TypeInfo::Void {
                            return err(
                                *position,
                                format!("this function must return a value of type '{expected}'"),
                            );
                        }
                    }
                    Some(value) => {
                        if expected == TypeInfo::Void {
                            return err(*position, "a void function may not return a value");
                        }
                        let actual = self.check_expression(value, Some(&expected))?;
                        if !self.assignable(&actual, &expected) {
                            return err(
                                value.position(),
                                format!("cannot return '{actual}' from a function returning '{expected}'"),
                            );
                        }
                    }
                }
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.check_condition(condition)?;
                self.check_statement(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.check_statement(else_branch)?;
                }
            }
            Statement::While {
                condition, body, ..
            } => {
                self.check_condition(condition)?;
                self.check_statement(body)?;
            }
            Statement::For {
                init,
                condition,
                update,
                body,
                ..
            } => {
                self.scope.begin();
                if let Some(init) = init {
                    self.check_statement(init)?;
                }
                if let Some(condition) = condition {
                    self.check_condition(condition)?;
                }
                if let Some(update) = update {
                    self.check_statement(update)?;
                }
                self.check_statement(body)?;
                self.scope.end();
            }
            Statement::Echo { value, .. } => {
                let ty = self.check_expression(value, None)?;
                if ty == TypeInfo::Void {
                    return err(value.position(), "cannot echo a void expression");
                }
            }
            Statement::Reset { qubit, .. } => {
                let ty = self.check_expression(qubit, None)?;
                if !ty.is_primitive(PrimitiveType::Qubit) {
                    return err(
                        qubit.position(),
                        format!("reset expects a qubit but found '{ty}'"),
                    );
                }
            }
            Statement::Measure { qubit, .. } => {
                let ty = self.check_expression(qubit, None)?;
                if !ty.is_primitive(PrimitiveType::Qubit) {
                    return err(
                        qubit.position(),
                        format!("measure expects a qubit but found '{ty}'"),
                    );
                }
            }
            Statement::Destroy { object, .. } => {
                let ty = self.check_expression(object, None)?;
                if !ty.is_class() && ty != TypeInfo::Null {
                    return err(
                        object.position(),
                        format!("destroy expects an object but found '{ty}'"),
                    );
                }
            }
            Statement::Ternary {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.check_condition(condition)?;
                self.check_statement(then_branch)?;
                self.check_statement(else_branch)?;
            }
            Statement::SuperConstructorCall {
                arguments,
                position,
            } => {
                if !self.in_constructor {
                    return err(*position, "super(...) is only valid inside a constructor");
                }
                if !allow_super {
                    return err(
                        *position,
                        "super(...) must be the first statement of the constructor",
                    );
                }
                let class_name = self.current_class.clone().expect("constructor context");
                let base = self
                    .registry
                    .get(&class_name)
                    .and_then(|c| c.base.clone())
                    .expect("every class has a base");
                let TypeInfo::Class { name: base_name, .. } = base else {
                    unreachable!("base is always a class type");
                };

                let mut argument_types = vec![];
                for argument in arguments.iter_mut() {
                    argument_types.push(self.check_expression(argument, None)?);
                }
                self.resolve_constructor(&base_name, &argument_types, false, *position)?;
            }
        }

        Ok(())
    }

    fn check_condition(&mut self, condition: &mut Expression) -> SemanticResult<()> {
        let ty = self.check_expression(condition, None)?;
        let ok = ty.is_primitive(PrimitiveType::Boolean) || ty.is_primitive(PrimitiveType::Bit);
        if !ok {
            return err(
                condition.position(),
                format!("condition must be boolean or bit, found '{ty}'"),
            );
        }
        Ok(())
    }

    fn check_assignment(
        &mut self,
        target: &mut AssignTarget,
        value: &mut Expression,
        position: Position,
    ) -> SemanticResult<TypeInfo> {
        let at_ctor_top = self.at_constructor_top_level;
        // assignments nested inside the value expression are not top-level
        self.at_constructor_top_level = false;
        let target_type = match target {
            AssignTarget::Variable { name, position } => {
                if let Some(entry) = self.scope.lookup(name) {
                    if entry.is_type_name {
                        return err(*position, format!("'{name}' is a type name"));
                    }
                    let entry_ty = entry.ty.clone();
                    if entry.is_final {
                        if entry.initialized {
                            return err(
                                *position,
                                format!("cannot assign to final variable '{name}'"),
                            );
                        }
                        self.scope.lookup_mut(name).unwrap().initialized = true;
                    }
                    entry_ty
                } else {
                    // unqualified field access from inside a class body
                    self.field_assignment_type(name, *position, at_ctor_top)?
                }
            }
            AssignTarget::Member {
                object,
                field,
                position,
            } => {
                let (info, ty) = self.member_field(object, field, *position)?;
                self.check_final_field_assignment(&info, *position, at_ctor_top)?;
                ty
            }
            AssignTarget::Index {
                array,
                index,
                position,
            } => {
                let array_type = self.check_expression(array, None)?;
                let TypeInfo::Array { element, .. } = array_type else {
                    return err(
                        *position,
                        format!("cannot index into non-array type '{array_type}'"),
                    );
                };
                let index_type = self.check_expression(index, None)?;
                if !index_type.is_integer() {
                    return err(
                        index.position(),
                        format!("array index must be an integer, found '{index_type}'"),
                    );
                }
                *element
            }
        };

        let value_type = self.check_expression(value, Some(&target_type))?;
        if !self.assignable(&value_type, &target_type) {
            return err(
                position,
                format!("cannot assign '{value_type}' to a target of type '{target_type}'"),
            );
        }
        Ok(target_type)
    }

    /// Type of the unqualified field `name` when assigned from inside the
    /// current class, enforcing the `final` field rules.
    fn field_assignment_type(
        &mut self,
        name: &str,
        position: Position,
        at_ctor_top: bool,
    ) -> SemanticResult<TypeInfo> {
        let Some(class_name) = self.current_class.clone() else {
            return err(position, format!("unknown variable '{name}'"));
        };
        let self_type = self.self_type().expect("current class is registered");
        let TypeInfo::Class { type_args, .. } = &self_type else {
            unreachable!()
        };
        let Some((info, ty)) = self.registry.resolve_field(&class_name, type_args, name) else {
            return err(position, format!("unknown variable '{name}'"));
        };
        if self.in_static_context && !info.is_static {
            return err(
                position,
                format!("cannot assign instance field '{name}' from a static method"),
            );
        }
        self.check_final_field_assignment(&info, position, at_ctor_top)?;
        Ok(ty)
    }

    fn check_final_field_assignment(
        &self,
        info: &FieldInfo,
        position: Position,
        at_ctor_top: bool,
    ) -> SemanticResult<()> {
        if !info.is_final {
            return Ok(());
        }
        let in_owning_constructor = self.in_constructor
            && self.current_class.as_deref() == Some(info.owner.as_str());
        if info.has_initializer || !in_owning_constructor {
            return err(
                position,
                format!("cannot assign to final field '{}'", info.name),
            );
        }
        if !at_ctor_top {
            return err(
                position,
                format!(
                    "final field '{}' must be assigned as a top-level constructor statement",
                    info.name
                ),
            );
        }
        Ok(())
    }

    // ---- expressions ---------------------------------------------------

    fn check_expression(
        &mut self,
        expression: &mut Expression,
        expected: Option<&TypeInfo>,
    ) -> SemanticResult<TypeInfo> {
        match expression {
            Expression::IntLiteral { .. } => Ok(TypeInfo::Primitive(PrimitiveType::Int)),
            Expression::LongLiteral { .. } => Ok(TypeInfo::Primitive(PrimitiveType::Long)),
            Expression::FloatLiteral { .. } => Ok(TypeInfo::Primitive(PrimitiveType::Float)),
            Expression::BitLiteral { .. } => Ok(TypeInfo::Primitive(PrimitiveType::Bit)),
            Expression::CharLiteral { .. } => Ok(TypeInfo::Primitive(PrimitiveType::Char)),
            Expression::StringLiteral { .. } => Ok(TypeInfo::Primitive(PrimitiveType::String)),
            Expression::BooleanLiteral { .. } => Ok(TypeInfo::Primitive(PrimitiveType::Boolean)),
            Expression::NullLiteral { .. } => Ok(TypeInfo::Null),
            Expression::Variable { name, position } => self.check_variable(name, *position),
            Expression::Grouping { inner, .. } => self.check_expression(inner, expected),
            Expression::Binary {
                operator,
                left,
                right,
                position,
            } => self.check_binary(*operator, left, right, *position),
            Expression::Unary {
                operator,
                operand,
                position,
            } => self.check_unary(*operator, operand, *position),
            Expression::Postfix {
                operator, name, position,
            } => self.check_postfix(*operator, name, *position),
            Expression::Cast {
                target,
                operand,
                position,
            } => self.check_cast(*target, operand, *position),
            Expression::Measure { qubit, position } => {
                let ty = self.check_expression(qubit, None)?;
                if !ty.is_primitive(PrimitiveType::Qubit) {
                    return err(
                        *position,
                        format!("measure expects a qubit but found '{ty}'"),
                    );
                }
                Ok(TypeInfo::Primitive(PrimitiveType::Bit))
            }
            Expression::ArrayLiteral { elements, position } => {
                self.check_array_literal(elements, expected, *position)
            }
            Expression::Index {
                array,
                index,
                position,
            } => {
                let array_type = self.check_expression(array, None)?;
                let TypeInfo::Array { element, .. } = array_type else {
                    return err(
                        *position,
                        format!("cannot index into non-array type '{array_type}'"),
                    );
                };
                let index_type = self.check_expression(index, None)?;
                if !index_type.is_integer() {
                    return err(
                        index.position(),
                        format!("array index must be an integer, found '{index_type}'"),
                    );
                }
                Ok(*element)
            }
            Expression::Assignment {
                target,
                value,
                position,
            } => self.check_assignment(target, value, *position),
            Expression::This { position } => {
                let Some(self_type) = self.self_type() else {
                    return err(*position, "'this' is only valid inside a class");
                };
                if self.in_static_context {
                    return err(*position, "'this' is not available in a static method");
                }
                Ok(self_type)
            }
            Expression::MemberAccess {
                object,
                field,
                position,
            } => {
                // `ClassName.field` reads a static field
                if let Expression::Variable { name, .. } = object.as_ref() {
                    if self.is_type_name(name) {
                        return self.check_static_field(name, field, *position);
                    }
                }
                let (_, ty) = self.member_field(object, field, *position)?;
                Ok(ty)
            }
            Expression::Call {
                function,
                arguments,
                position,
            } => self.check_call(function, arguments, *position),
            Expression::MethodCall {
                object,
                method,
                arguments,
                position,
            } => self.check_method_call(object, method, arguments, *position),
            Expression::SuperMethodCall {
                method,
                arguments,
                position,
            } => self.check_super_method_call(method, arguments, *position),
            Expression::New { .. } => self.check_new(expression, expected),
        }
    }

    fn is_type_name(&self, name: &str) -> bool {
        self.scope
            .lookup(name)
            .map(|e| e.is_type_name)
            .unwrap_or(false)
            || self.registry.contains(name)
    }

    fn check_variable(&mut self, name: &str, position: Position) -> SemanticResult<TypeInfo> {
        if let Some(entry) = self.scope.lookup(name) {
            if entry.is_type_name {
                return err(position, format!("class '{name}' used as a value"));
            }
            if entry.is_final && !entry.initialized {
                return err(
                    position,
                    format!("final variable '{name}' may be used before initialisation"),
                );
            }
            return Ok(entry.ty.clone());
        }

        // unqualified field access from inside a class body
        if let Some(class_name) = self.current_class.clone() {
            let self_type = self.self_type().expect("current class is registered");
            let TypeInfo::Class { type_args, .. } = &self_type else {
                unreachable!()
            };
            if let Some((info, ty)) = self.registry.resolve_field(&class_name, type_args, name) {
                if self.in_static_context && !info.is_static {
                    return err(
                        position,
                        format!("cannot read instance field '{name}' from a static method"),
                    );
                }
                return Ok(ty);
            }
        }

        err(position, format!("unknown variable '{name}'"))
    }

    fn check_binary(
        &mut self,
        operator: BinaryOperator,
        left: &mut Expression,
        right: &mut Expression,
        position: Position,
    ) -> SemanticResult<TypeInfo> {
        use BinaryOperator::*;

        let left_type = self.check_expression(left, None)?;
        let right_type = self.check_expression(right, None)?;

        let string = TypeInfo::Primitive(PrimitiveType::String);
        let boolean = TypeInfo::Primitive(PrimitiveType::Boolean);
        let bit = TypeInfo::Primitive(PrimitiveType::Bit);

        match operator {
            Add if left_type == string || right_type == string => {
                // string concatenation coerces the other operand
                Ok(string)
            }
            Add | Subtract | Multiply => {
                self.require_numeric(&left_type, left.position())?;
                self.require_numeric(&right_type, right.position())?;
                Ok(widest_numeric(&left_type, &right_type))
            }
            Divide => {
                self.require_numeric(&left_type, left.position())?;
                self.require_numeric(&right_type, right.position())?;
                // integer division promotes to float
                Ok(TypeInfo::Primitive(PrimitiveType::Float))
            }
            Modulo => {
                if !left_type.is_integer() || !right_type.is_integer() {
                    return err(
                        position,
                        format!("'%' requires integer operands, found '{left_type}' and '{right_type}'"),
                    );
                }
                Ok(widest_numeric(&left_type, &right_type))
            }
            Less | LessEqual | Greater | GreaterEqual => {
                self.require_numeric(&left_type, left.position())?;
                self.require_numeric(&right_type, right.position())?;
                Ok(boolean)
            }
            Equal | NotEqual => {
                let comparable = (left_type.is_numeric() && right_type.is_numeric())
                    || left_type == right_type
                    || (left_type == TypeInfo::Null && right_type.is_class())
                    || (right_type == TypeInfo::Null && left_type.is_class())
                    || (left_type.is_class()
                        && right_type.is_class()
                        && (self.assignable(&left_type, &right_type)
                            || self.assignable(&right_type, &left_type)));
                if !comparable {
                    return err(
                        position,
                        format!("cannot compare '{left_type}' with '{right_type}'"),
                    );
                }
                Ok(boolean)
            }
            And | Or => {
                if left_type != boolean || right_type != boolean {
                    return err(
                        position,
                        format!(
                            "'{}' requires boolean operands, found '{left_type}' and '{right_type}'",
                            operator.symbol()
                        ),
                    );
                }
                Ok(boolean)
            }
            BitAnd | BitOr | BitXor => {
                if left_type == bit && right_type == bit {
                    return Ok(bit);
                }
                let bits = |ty: &TypeInfo| -> Option<Option<usize>> {
                    match ty {
                        TypeInfo::Array { element, size }
                            if element.is_primitive(PrimitiveType::Bit) =>
                        {
                            Some(*size)
                        }
                        _ => None,
                    }
                };
                match (bits(&left_type), bits(&right_type)) {
                    (Some(left_size), Some(right_size)) => {
                        if let (Some(a), Some(b)) = (left_size, right_size) {
                            if a != b {
                                return err(
                                    position,
                                    format!("bitwise operands have different lengths ({a} and {b})"),
                                );
                            }
                        }
                        Ok(TypeInfo::Array {
                            element: Box::new(bit),
                            size: left_size.or(right_size),
                        })
                    }
                    _ => err(
                        position,
                        format!(
                            "'{}' requires bit or bit[] operands, found '{left_type}' and '{right_type}'",
                            operator.symbol()
                        ),
                    ),
                }
            }
        }
    }

    fn require_numeric(&self, ty: &TypeInfo, position: Position) -> SemanticResult<()> {
        if !ty.is_numeric() {
            return err(position, format!("expected a numeric operand, found '{ty}'"));
        }
        Ok(())
    }

    fn check_unary(
        &mut self,
        operator: UnaryOperator,
        operand: &mut Expression,
        position: Position,
    ) -> SemanticResult<TypeInfo> {
        let ty = self.check_expression(operand, None)?;
        match operator {
            UnaryOperator::Negate => {
                self.require_numeric(&ty, position)?;
                // negating a bit promotes to int
                if ty.is_primitive(PrimitiveType::Bit) {
                    Ok(TypeInfo::Primitive(PrimitiveType::Int))
                } else {
                    Ok(ty)
                }
            }
            UnaryOperator::Not => {
                if !ty.is_primitive(PrimitiveType::Boolean) {
                    return err(position, format!("'!' requires a boolean operand, found '{ty}'"));
                }
                Ok(ty)
            }
            UnaryOperator::BitNot => {
                let is_bits = ty.is_primitive(PrimitiveType::Bit)
                    || matches!(&ty, TypeInfo::Array { element, .. } if element.is_primitive(PrimitiveType::Bit));
                if !is_bits {
                    return err(
                        position,
                        format!("'~' requires a bit or bit[] operand, found '{ty}'"),
                    );
                }
                Ok(ty)
            }
        }
    }

    fn check_postfix(
        &mut self,
        operator: PostfixOperator,
        name: &str,
        position: Position,
    ) -> SemanticResult<TypeInfo> {
        let symbol = match operator {
            PostfixOperator::Increment => "++",
            PostfixOperator::Decrement => "--",
        };
        let Some(entry) = self.scope.lookup(name) else {
            return err(position, format!("unknown variable '{name}'"));
        };
        if entry.is_type_name {
            return err(position, format!("class '{name}' used as a value"));
        }
        if !entry.ty.is_primitive(PrimitiveType::Int) {
            return err(
                position,
                format!("'{symbol}' only applies to int variables, found '{}'", entry.ty),
            );
        }
        if entry.is_final {
            return err(
                position,
                format!("'{symbol}' cannot modify final variable '{name}'"),
            );
        }
        Ok(TypeInfo::Primitive(PrimitiveType::Int))
    }

    fn check_cast(
        &mut self,
        target: PrimitiveType,
        operand: &mut Expression,
        position: Position,
    ) -> SemanticResult<TypeInfo> {
        let ty = self.check_expression(operand, None)?;

        match target {
            PrimitiveType::Int => {
                if !(ty.is_numeric() || ty.is_primitive(PrimitiveType::Char)) {
                    return err(position, format!("cannot cast '{ty}' to int"));
                }
            }
            PrimitiveType::Long | PrimitiveType::Float | PrimitiveType::Bit => {
                if !ty.is_numeric() {
                    return err(position, format!("cannot cast '{ty}' to {}", target.name()));
                }
            }
            other => {
                return err(position, format!("casts to {} are not permitted", other.name()));
            }
        }

        Ok(TypeInfo::Primitive(target))
    }

    fn check_array_literal(
        &mut self,
        elements: &mut [Expression],
        expected: Option<&TypeInfo>,
        position: Position,
    ) -> SemanticResult<TypeInfo> {
        let expected_element = match expected {
            Some(TypeInfo::Array { element, .. }) => Some(element.as_ref().clone()),
            _ => None,
        };

        if elements.is_empty() {
            let Some(element) = expected_element else {
                return err(position, "cannot infer the element type of an empty array literal");
            };
            return Ok(TypeInfo::Array {
                element: Box::new(element),
                size: Some(0),
            });
        }

        let mut unified = match &expected_element {
            Some(element) => element.clone(),
            None => self.check_expression(&mut elements[0], None)?,
        };

        for element in elements.iter_mut() {
            let ty = self.check_expression(element, expected_element.as_ref())?;
            if self.assignable(&ty, &unified) {
                continue;
            }
            if expected_element.is_none() && self.assignable(&unified, &ty) {
                unified = ty;
                continue;
            }
            return err(
                element.position(),
                format!("array element of type '{ty}' does not fit element type '{unified}'"),
            );
        }

        Ok(TypeInfo::Array {
            element: Box::new(unified),
            size: Some(elements.len()),
        })
    }

    // ---- calls ---------------------------------------------------------

    fn check_arguments(&mut self, arguments: &mut [Expression]) -> SemanticResult<Vec<TypeInfo>> {
        let mut types = vec![];
        for argument in arguments.iter_mut() {
            let ty = self.check_expression(argument, None)?;
            if ty == TypeInfo::Void {
                return err(argument.position(), "void expressions cannot be arguments");
            }
            types.push(ty);
        }
        Ok(types)
    }

    /// Lowest-total-conversion-cost overload selection; ties are ambiguous.
    fn pick_overload<'c, C>(
        &self,
        candidates: &'c [C],
        parameters_of: impl Fn(&C) -> &[TypeInfo],
        arguments: &[TypeInfo],
    ) -> Result<&'c C, OverloadFailure> {
        let mut best: Option<(&C, u32)> = None;
        let mut ambiguous = false;
        let mut any_arity = false;

        for candidate in candidates {
            let parameters = parameters_of(candidate);
            if parameters.len() != arguments.len() {
                continue;
            }
            any_arity = true;

            let mut total = 0u32;
            let mut feasible = true;
            for (argument, parameter) in arguments.iter().zip(parameters) {
                match conversion_cost(argument, parameter, &self.registry) {
                    Some(cost) => total += cost,
                    None => {
                        feasible = false;
                        break;
                    }
                }
            }
            if !feasible {
                continue;
            }

            match &best {
                Some((_, best_cost)) if *best_cost == total => ambiguous = true,
                Some((_, best_cost)) if *best_cost < total => {}
                _ => {
                    best = Some((candidate, total));
                    ambiguous = false;
                }
            }
        }

        match best {
            Some((candidate, _)) if !ambiguous => Ok(candidate),
            Some(_) => Err(OverloadFailure::Ambiguous),
            None if any_arity => Err(OverloadFailure::NoMatch),
            None => Err(OverloadFailure::WrongArity),
        }
    }

    fn check_call(
        &mut self,
        function: &str,
        arguments: &mut Vec<Expression>,
        position: Position,
    ) -> SemanticResult<TypeInfo> {
        let argument_types = self.check_arguments(arguments)?;

        // methods of the enclosing class take precedence over free functions
        if let Some(class_name) = self.current_class.clone() {
            let self_args = match self.self_type() {
                Some(TypeInfo::Class { type_args, .. }) => type_args,
                _ => vec![],
            };
            let methods = self.registry.resolve_methods(&class_name, &self_args, function);
            if !methods.is_empty() {
                let method = self
                    .pick_overload(&methods, |m| m.parameters.as_slice(), &argument_types)
                    .map_err(|failure| {
                        failure.into_error(position, &format!("method '{function}'"))
                    })?;
                if self.in_static_context && !method.is_static {
                    return err(
                        position,
                        format!("cannot call instance method '{function}' from a static method"),
                    );
                }
                return Ok(method.return_type.clone());
            }
        }

        let overloads = self.functions.overloads(function);
        if overloads.is_empty() {
            return err(position, format!("unknown function '{function}'"));
        }
        let signature = self
            .pick_overload(overloads, |f| f.parameters.as_slice(), &argument_types)
            .map_err(|failure| failure.into_error(position, &format!("function '{function}'")))?;
        Ok(signature.return_type.clone())
    }

    fn check_method_call(
        &mut self,
        object: &mut Expression,
        method: &str,
        arguments: &mut Vec<Expression>,
        position: Position,
    ) -> SemanticResult<TypeInfo> {
        // `ClassName.method(...)` is a static dispatch
        if let Expression::Variable { name, .. } = object {
            if self.is_type_name(name) {
                let class_name = name.clone();
                let argument_types = self.check_arguments(arguments)?;
                let methods = self.registry.resolve_methods(&class_name, &[], method);
                if methods.is_empty() {
                    return err(
                        position,
                        format!("class '{class_name}' has no method '{method}'"),
                    );
                }
                let info = self
                    .pick_overload(&methods, |m| m.parameters.as_slice(), &argument_types)
                    .map_err(|failure| {
                        failure.into_error(position, &format!("method '{class_name}.{method}'"))
                    })?;
                if !info.is_static {
                    return err(
                        position,
                        format!("'{method}' is an instance method; call it on an object"),
                    );
                }
                self.check_member_visibility(info.visibility, &info.owner, position, method)?;
                return Ok(info.return_type.clone());
            }
        }

        let object_type = self.check_expression(object, None)?;
        let (class_name, type_args) = match &object_type {
            TypeInfo::Class { name, type_args } => (name.clone(), type_args.clone()),
            TypeInfo::TypeParam { bound, .. } => match bound.as_ref() {
                TypeInfo::Class { name, type_args } => (name.clone(), type_args.clone()),
                _ => {
                    return err(
                        position,
                        format!("cannot call a method on '{object_type}'"),
                    )
                }
            },
            _ => {
                return err(
                    object.position(),
                    format!("cannot call a method on '{object_type}'"),
                )
            }
        };

        let argument_types = self.check_arguments(arguments)?;
        let methods = self.registry.resolve_methods(&class_name, &type_args, method);
        if methods.is_empty() {
            return err(
                position,
                format!("class '{class_name}' has no method '{method}'"),
            );
        }
        let info = self
            .pick_overload(&methods, |m| m.parameters.as_slice(), &argument_types)
            .map_err(|failure| {
                failure.into_error(position, &format!("method '{class_name}.{method}'"))
            })?;
        if info.is_static {
            return err(
                position,
                format!("'{method}' is static; call it on the class name"),
            );
        }
        self.check_member_visibility(info.visibility, &info.owner, position, method)?;
        Ok(info.return_type.clone())
    }

    fn check_super_method_call(
        &mut self,
        method: &str,
        arguments: &mut Vec<Expression>,
        position: Position,
    ) -> SemanticResult<TypeInfo> {
        let Some(class_name) = self.current_class.clone() else {
            return err(position, "'super' is only valid inside a class");
        };
        if self.in_static_context {
            return err(position, "'super' is not available in a static method");
        }
        let base = self
            .registry
            .get(&class_name)
            .and_then(|c| c.base.clone())
            .expect("every class has a base");
        let TypeInfo::Class { name: base_name, type_args } = base else {
            unreachable!("base is always a class type");
        };

        let argument_types = self.check_arguments(arguments)?;
        let methods = self.registry.resolve_methods(&base_name, &type_args, method);
        if methods.is_empty() {
            return err(
                position,
                format!("class '{base_name}' has no method '{method}'"),
            );
        }
        let info = self
            .pick_overload(&methods, |m| m.parameters.as_slice(), &argument_types)
            .map_err(|failure| {
                failure.into_error(position, &format!("method '{base_name}.{method}'"))
            })?;
        if info.is_abstract {
            return err(
                position,
                format!("cannot call abstract method '{base_name}.{method}' via super"),
            );
        }
        self.check_member_visibility(info.visibility, &info.owner, position, method)?;
        Ok(info.return_type.clone())
    }

    fn check_member_visibility(
        &self,
        visibility: Visibility,
        owner: &str,
        position: Position,
        member: &str,
    ) -> SemanticResult<()> {
        let accessible = match visibility {
            Visibility::Public => true,
            Visibility::Private => self.current_class.as_deref() == Some(owner),
            Visibility::Protected => self
                .current_class
                .as_ref()
                .map(|c| self.registry.inheritance_distance(c, owner).is_some())
                .unwrap_or(false),
        };
        if !accessible {
            return err(
                position,
                format!("'{member}' is {} in '{owner}'", visibility.name()),
            );
        }
        Ok(())
    }

    fn member_field(
        &mut self,
        object: &mut Expression,
        field: &str,
        position: Position,
    ) -> SemanticResult<(FieldInfo, TypeInfo)> {
        let object_type = self.check_expression(object, None)?;
        let (class_name, type_args) = match &object_type {
            TypeInfo::Class { name, type_args } => (name.clone(), type_args.clone()),
            TypeInfo::TypeParam { bound, .. } => match bound.as_ref() {
                TypeInfo::Class { name, type_args } => (name.clone(), type_args.clone()),
                _ => {
                    return err(position, format!("'{object_type}' has no members"));
                }
            },
            _ => {
                return err(
                    object.position(),
                    format!("'{object_type}' has no members"),
                )
            }
        };

        let Some((info, ty)) = self.registry.resolve_field(&class_name, &type_args, field) else {
            return err(
                position,
                format!("class '{class_name}' has no field '{field}'"),
            );
        };
        if info.is_static {
            return err(
                position,
                format!("'{field}' is static; access it through the class name"),
            );
        }
        self.check_member_visibility(info.visibility, &info.owner, position, field)?;
        Ok((info, ty))
    }

    fn check_static_field(
        &mut self,
        class_name: &str,
        field: &str,
        position: Position,
    ) -> SemanticResult<TypeInfo> {
        let Some((info, ty)) = self.registry.resolve_field(class_name, &[], field) else {
            return err(
                position,
                format!("class '{class_name}' has no field '{field}'"),
            );
        };
        if !info.is_static {
            return err(
                position,
                format!("'{field}' is an instance field; access it through an object"),
            );
        }
        self.check_member_visibility(info.visibility, &info.owner, position, field)?;
        Ok(ty)
    }

    fn check_new(
        &mut self,
        expression: &mut Expression,
        expected: Option<&TypeInfo>,
    ) -> SemanticResult<TypeInfo> {
        let Expression::New {
            class_name,
            type_args,
            diamond,
            arguments,
            position,
        } = expression
        else {
            unreachable!("check_new is only called on new expressions");
        };
        let position = *position;
        let class_name = class_name.clone();

        let Some(class) = self.registry.get(&class_name) else {
            return err(position, format!("unknown class '{class_name}'"));
        };
        let parameter_count = class.type_parameters.len();

        // diamond inference fills the type arguments from the expected type
        if *diamond {
            let Some(TypeInfo::Class {
                name: expected_name,
                type_args: expected_args,
            }) = expected
            else {
                return err(
                    position,
                    format!("cannot infer type arguments for 'new {class_name}<>'"),
                );
            };
            if *expected_name != class_name || expected_args.len() != parameter_count {
                return err(
                    position,
                    format!("cannot infer type arguments for 'new {class_name}<>'"),
                );
            }
            *type_args = expected_args
                .iter()
                .map(|a| type_info_to_node(a, position))
                .collect::<Option<Vec<_>>>()
                .ok_or(SemanticError {
                    message: format!("cannot infer type arguments for 'new {class_name}<>'"),
                    position,
                })?;
            *diamond = false;
        } else if type_args.is_empty() && parameter_count > 0 {
            return err(
                position,
                format!("'{class_name}' requires {parameter_count} type argument(s)"),
            );
        }

        let type_args = type_args.clone();
        let instantiated = self.type_from_ast(&TypeNode::Named {
            name: class_name.clone(),
            type_args,
            position,
        })?;
        let TypeInfo::Class { type_args: resolved_args, .. } = &instantiated else {
            unreachable!("new always instantiates a class type");
        };

        let class = self.registry.get(&class_name).unwrap();
        if class.is_static {
            return err(position, format!("cannot instantiate static class '{class_name}'"));
        }
        if class.is_abstract || !class.abstract_methods.is_empty() {
            return err(
                position,
                format!("cannot instantiate abstract class '{class_name}'"),
            );
        }

        let mut argument_types = vec![];
        for argument in arguments.iter_mut() {
            argument_types.push(self.check_expression(argument, None)?);
        }
        self.resolve_constructor_with_args(&class_name, resolved_args, &argument_types, position)?;

        Ok(instantiated)
    }

    fn resolve_constructor(
        &self,
        class_name: &str,
        argument_types: &[TypeInfo],
        _from_new: bool,
        position: Position,
    ) -> SemanticResult<ConstructorInfo> {
        self.resolve_constructor_with_args(class_name, &[], argument_types, position)
    }

    fn resolve_constructor_with_args(
        &self,
        class_name: &str,
        type_args: &[TypeInfo],
        argument_types: &[TypeInfo],
        position: Position,
    ) -> SemanticResult<ConstructorInfo> {
        let class = self
            .registry
            .get(class_name)
            .expect("constructor target is registered");
        let map = substitution_map(class, type_args);
        let candidates: Vec<ConstructorInfo> = class
            .constructors
            .iter()
            .map(|c| ConstructorInfo {
                parameters: c.parameters.iter().map(|p| p.substitute(&map)).collect(),
                ..c.clone()
            })
            .collect();

        let info = self
            .pick_overload(&candidates, |c| c.parameters.as_slice(), argument_types)
            .map_err(|failure| {
                failure.into_error(position, &format!("constructor of '{class_name}'"))
            })?;

        let accessible = match info.visibility {
            Visibility::Public => true,
            Visibility::Private => self.current_class.as_deref() == Some(class_name),
            Visibility::Protected => self
                .current_class
                .as_ref()
                .map(|c| self.registry.inheritance_distance(c, class_name).is_some())
                .unwrap_or(false),
        };
        if !accessible {
            return err(
                position,
                format!(
                    "constructor of '{class_name}' is {}",
                    info.visibility.name()
                ),
            );
        }

        Ok(info.clone())
    }
}

enum OverloadFailure {
    WrongArity,
    NoMatch,
    Ambiguous,
}

impl OverloadFailure {
    fn into_error(self, position: Position, what: &str) -> SemanticError {
        let message = match self {
            OverloadFailure::WrongArity => format!("no overload of {what} takes these arguments"),
            OverloadFailure::NoMatch => {
                format!("no overload of {what} accepts the given argument types")
            }
            OverloadFailure::Ambiguous => format!("ambiguous call to {what}"),
        };
        SemanticError { message, position }
    }
}

/// Widest numeric type of two operands: float > long > int; lone bits
/// promote to int.
fn widest_numeric(left: &TypeInfo, right: &TypeInfo) -> TypeInfo {
    let float = TypeInfo::Primitive(PrimitiveType::Float);
    let long = TypeInfo::Primitive(PrimitiveType::Long);
    if *left == float || *right == float {
        float
    } else if *left == long || *right == long {
        long
    } else {
        TypeInfo::Primitive(PrimitiveType::Int)
    }
}

/// Structural return-path analysis: a block returns when any of its
/// statements definitely returns.
pub(crate) fn block_returns(statements: &[Statement]) -> bool {
    statements.iter().any(statement_returns)
}

fn statement_returns(statement: &Statement) -> bool {
    match statement {
        Statement::Return { .. } => true,
        Statement::Block { statements, .. } => block_returns(statements),
        Statement::If {
            then_branch,
            else_branch: Some(else_branch),
            ..
        } => statement_returns(then_branch) && statement_returns(else_branch),
        Statement::Ternary {
            then_branch,
            else_branch,
            ..
        } => statement_returns(then_branch) && statement_returns(else_branch),
        _ => false,
    }
}

/// Render a resolved type back into a syntactic node, for the diamond
/// fixup. Fails on types with no syntax (null, void).
fn type_info_to_node(ty: &TypeInfo, position: Position) -> Option<TypeNode> {
    match ty {
        TypeInfo::Primitive(primitive) => Some(TypeNode::Primitive {
            primitive: *primitive,
            position,
        }),
        TypeInfo::Class { name, type_args } => Some(TypeNode::Named {
            name: name.clone(),
            type_args: type_args
                .iter()
                .map(|a| type_info_to_node(a, position))
                .collect::<Option<Vec<_>>>()?,
            position,
        }),
        TypeInfo::TypeParam { name, .. } => Some(TypeNode::Named {
            name: name.clone(),
            type_args: vec![],
            position,
        }),
        TypeInfo::Array { element, size } => Some(TypeNode::Array {
            element: Box::new(type_info_to_node(element, position)?),
            size: size.map(ArraySize::Fixed),
            position,
        }),
        TypeInfo::Null | TypeInfo::Void => None,
    }
}

// ---- resolver fixup: constant array sizes -----------------------------

/// Fold statically derivable array-size expressions into fixed sizes,
/// across every type node in the program.
fn fixup_array_sizes(program: &mut Program) -> SemanticResult<()> {
    for class in &mut program.classes {
        for field in &mut class.fields {
            fixup_type(&mut field.ty)?;
        }
        for method in &mut class.methods {
            for parameter in &mut method.parameters {
                fixup_type(&mut parameter.ty)?;
            }
            fixup_type(&mut method.return_type)?;
            if let Some(body) = &mut method.body {
                for statement in body {
                    fixup_statement(statement)?;
                }
            }
        }
        for constructor in &mut class.constructors {
            for parameter in &mut constructor.parameters {
                fixup_type(&mut parameter.ty)?;
            }
            if let ConstructorBody::Block(body) = &mut constructor.body {
                for statement in body {
                    fixup_statement(statement)?;
                }
            }
        }
        if let Some(destructor) = &mut class.destructor {
            for statement in &mut destructor.body {
                fixup_statement(statement)?;
            }
        }
    }
    for function in &mut program.functions {
        for parameter in &mut function.parameters {
            fixup_type(&mut parameter.ty)?;
        }
        fixup_type(&mut function.return_type)?;
        for statement in &mut function.body {
            fixup_statement(statement)?;
        }
    }
    for statement in &mut program.statements {
        fixup_statement(statement)?;
    }
    Ok(())
}

fn fixup_statement(statement: &mut Statement) -> SemanticResult<()> {
    match statement {
        Statement::VariableDeclaration { ty, .. } => fixup_type(ty)?,
        Statement::Block { statements, .. } => {
            for statement in statements {
                fixup_statement(statement)?;
            }
        }
        Statement::If {
            then_branch,
            else_branch,
            ..
        } => {
            fixup_statement(then_branch)?;
            if let Some(else_branch) = else_branch {
                fixup_statement(else_branch)?;
            }
        }
        Statement::While { body, .. } => fixup_statement(body)?,
        Statement::For {
            init, update, body, ..
        } => {
            if let Some(init) = init {
                fixup_statement(init)?;
            }
            if let Some(update) = update {
                fixup_statement(update)?;
            }
            fixup_statement(body)?;
        }
        Statement::Ternary {
            then_branch,
            else_branch,
            ..
        } => {
            fixup_statement(then_branch)?;
            fixup_statement(else_branch)?;
        }
        _ => {}
    }
    Ok(())
}

fn fixup_type(ty: &mut TypeNode) -> SemanticResult<()> {
    if let TypeNode::Array { element, size, position } = ty {
        fixup_type(element)?;
        if let Some(ArraySize::Expr(expression)) = size {
            let Some(value) = const_eval(expression) else {
                return err(
                    *position,
                    "array size must be a constant integer expression",
                );
            };
            if value <= 0 {
                return err(*position, "array size must be positive");
            }
            *size = Some(ArraySize::Fixed(value as usize));
        }
    }
    if let TypeNode::Named { type_args, .. } = ty {
        for arg in type_args {
            fixup_type(arg)?;
        }
    }
    Ok(())
}

/// Constant folding over integer literals and `+ - *`.
fn const_eval(expression: &Expression) -> Option<i64> {
    match expression {
        Expression::IntLiteral { value, .. } | Expression::LongLiteral { value, .. } => {
            Some(*value)
        }
        Expression::Grouping { inner, .. } => const_eval(inner),
        Expression::Unary {
            operator: UnaryOperator::Negate,
            operand,
            ..
        } => const_eval(operand).map(|v| -v),
        Expression::Binary {
            operator,
            left,
            right,
            ..
        } => {
            let left = const_eval(left)?;
            let right = const_eval(right)?;
            match operator {
                BinaryOperator::Add => Some(left.wrapping_add(right)),
                BinaryOperator::Subtract => Some(left.wrapping_sub(right)),
                BinaryOperator::Multiply => Some(left.wrapping_mul(right)),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn analyse_source(input: &str) -> SemanticResult<Analysis> {
        let tokens = Lexer::new(input).lex().expect("lexing failed");
        let mut program = Parser::new(tokens).parse().expect("parsing failed");
        analyse(&mut program)
    }

    #[test]
    fn test_redeclaration_rejected() {
        let err = analyse_source("function main() -> void { int a = 1; int a = 2; }").unwrap_err();
        assert!(err.message.contains("already declared"));
        assert_eq!(err.position.line, 1);
    }

    #[test]
    fn test_no_shadowing_in_nested_scope() {
        let err = analyse_source("function main() -> void { int a = 1; { int a = 2; } }")
            .unwrap_err();
        assert!(err.message.contains("already declared"));
    }

    #[test]
    fn test_final_reassignment_rejected() {
        let err =
            analyse_source("function main() -> void { final int a = 1; a = 2; }").unwrap_err();
        assert!(err.message.contains("final"));
    }

    #[test]
    fn test_final_deferred_initialisation() {
        assert!(
            analyse_source("function main() -> void { final int a; a = 1; int b = a; }").is_ok()
        );
        let err = analyse_source("function main() -> void { final int a; a = 1; a = 2; }")
            .unwrap_err();
        assert!(err.message.contains("final"));
    }

    #[test]
    fn test_unknown_variable() {
        let err = analyse_source("function main() -> void { int a = b; }").unwrap_err();
        assert!(err.message.contains("unknown variable 'b'"));
    }

    #[test]
    fn test_integer_division_promotes_to_float() {
        assert!(analyse_source("function main() -> void { float f = 1 / 2; }").is_ok());
        // the float result still lands in an int slot, truncating at runtime
        assert!(analyse_source("function main() -> void { int f = 1 / 2; }").is_ok());
    }

    #[test]
    fn test_bit_accepts_no_narrowing() {
        let err = analyse_source("function main() -> void { bit b = 0; }").unwrap_err();
        assert!(err.message.contains("bit"));
    }

    #[test]
    fn test_modulo_is_integer_only() {
        let err = analyse_source("function main() -> void { float f = 1.5f % 2.0f; }").unwrap_err();
        assert!(err.message.contains("'%'"));
    }

    #[test]
    fn test_condition_must_be_boolean_or_bit() {
        assert!(analyse_source(
            "function main() -> void { bit b = 1b; if (b) { echo 1; } }"
        )
        .is_ok());
        let err = analyse_source("function main() -> void { if (1) { echo 1; } }").unwrap_err();
        assert!(err.message.contains("condition"));
    }

    #[test]
    fn test_missing_return_rejected() {
        let err = analyse_source(
            "function f(int x) -> int { if (x > 0) { return 1; } } function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("every path"));

        assert!(analyse_source(
            "function f(int x) -> int { if (x > 0) { return 1; } else { return 2; } }\
             function main() -> void { }"
        )
        .is_ok());
    }

    #[test]
    fn test_void_function_may_not_return_value() {
        let err = analyse_source("function main() -> void { return 1; }").unwrap_err();
        assert!(err.message.contains("void"));
    }

    #[test]
    fn test_quantum_annotation_return_types() {
        assert!(analyse_source(
            "@quantum function f(qubit q) -> bit { return measure q; } function main() -> void { }"
        )
        .is_ok());
        let err = analyse_source(
            "@quantum function f() -> int { return 1; } function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("@quantum"));
    }

    #[test]
    fn test_shots_only_on_main() {
        let err = analyse_source(
            "@shots(10) function f() -> void { } function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("@shots"));
    }

    #[test]
    fn test_tracked_requires_qubit() {
        let err =
            analyse_source("function main() -> void { @tracked int x = 1; }").unwrap_err();
        assert!(err.message.contains("@tracked"));
        assert!(analyse_source("function main() -> void { @tracked qubit q; }").is_ok());
    }

    #[test]
    fn test_gate_signatures_enforced() {
        assert!(analyse_source("function main() -> void { qubit q; h(q); }").is_ok());
        let err = analyse_source("function main() -> void { h(1); }").unwrap_err();
        assert!(err.message.contains("'h'"));
        assert!(analyse_source(
            "function main() -> void { qubit q; rx(q, 1.5f); }"
        )
        .is_ok());
    }

    #[test]
    fn test_overload_resolution_by_cost() {
        // int argument prefers the int overload over the widening float one
        assert!(analyse_source(
            "function f(int x) -> int { return 0; }\
             function f(float x) -> int { return 1; }\
             function main() -> void { int r = f(1); }"
        )
        .is_ok());
    }

    #[test]
    fn test_class_instantiation_and_members() {
        assert!(analyse_source(
            "class Counter {\
                private int count = 0;\
                constructor() -> Counter { }\
                public function bump() -> void { count = count + 1; }\
                public function value() -> int { return count; }\
             }\
             function main() -> void {\
                Counter c = new Counter();\
                c.bump();\
                int v = c.value();\
             }"
        )
        .is_ok());
    }

    #[test]
    fn test_private_member_inaccessible() {
        let err = analyse_source(
            "class Counter {\
                private int count = 0;\
                constructor() -> Counter { }\
             }\
             function main() -> void {\
                Counter c = new Counter();\
                int v = c.count;\
             }",
        )
        .unwrap_err();
        assert!(err.message.contains("private"));
    }

    #[test]
    fn test_abstract_class_cannot_be_instantiated() {
        let err = analyse_source(
            "abstract class Shape {\
                constructor() -> Shape { }\
                public virtual function area() -> float;\
             }\
             function main() -> void { Shape s = new Shape(); }",
        )
        .unwrap_err();
        assert!(err.message.contains("abstract"));
    }

    #[test]
    fn test_diamond_inference_from_declaration() {
        assert!(analyse_source(
            "class Box<T> {\
                private T value;\
                constructor(T value) -> Box = default;\
                public function get() -> T { return value; }\
             }\
             class Item { constructor() -> Item { } }\
             function main() -> void {\
                Box<Item> b = new Box<>(new Item());\
                Item i = b.get();\
             }"
        )
        .is_ok());
    }

    #[test]
    fn test_diamond_without_target_type_rejected() {
        let err = analyse_source(
            "class Box<T> { constructor() -> Box { } }\
             function main() -> void { echo new Box<>(); }",
        )
        .unwrap_err();
        assert!(err.message.contains("infer"));
    }

    #[test]
    fn test_null_only_assignable_to_classes() {
        let err = analyse_source("function main() -> void { int x = null; }").unwrap_err();
        assert!(err.message.contains("null"));
        assert!(analyse_source(
            "class Foo { constructor() -> Foo { } }\
             function main() -> void { Foo f = null; }"
        )
        .is_ok());
    }

    #[test]
    fn test_cast_rules() {
        assert!(analyse_source("function main() -> void { int x = (int) 3.7f; }").is_ok());
        assert!(analyse_source("function main() -> void { int x = (int) 'a'; }").is_ok());
        let err = analyse_source("function main() -> void { char c = (char) 65; }").unwrap_err();
        assert!(err.message.contains("char"));
    }

    #[test]
    fn test_bitwise_on_bit_arrays() {
        assert!(analyse_source(
            "function main() -> void { bit[2] a = {0b, 1b}; bit[2] b = {1b, 1b}; bit[] c = a & b; }"
        )
        .is_ok());
        let err = analyse_source(
            "function main() -> void { bit[2] a = {0b, 1b}; bit[3] b = {1b, 1b, 0b}; bit[] c = a ^ b; }",
        )
        .unwrap_err();
        assert!(err.message.contains("length"));
    }

    #[test]
    fn test_postfix_increment_rules() {
        assert!(analyse_source("function main() -> void { int i = 0; i++; }").is_ok());
        let err = analyse_source("function main() -> void { final int i = 0; i++; }").unwrap_err();
        assert!(err.message.contains("final"));
        let err = analyse_source("function main() -> void { float f = 0.0f; f++; }").unwrap_err();
        assert!(err.message.contains("int"));
    }

    #[test]
    fn test_array_size_fixup() {
        let tokens = Lexer::new("function main() -> void { bit[2 + 2] r; }")
            .lex()
            .unwrap();
        let mut program = Parser::new(tokens).parse().unwrap();
        analyse(&mut program).unwrap();

        let Statement::VariableDeclaration { ty, .. } = &program.functions[0].body[0] else {
            panic!("expected a declaration");
        };
        assert!(matches!(
            ty,
            TypeNode::Array {
                size: Some(ArraySize::Fixed(4)),
                ..
            }
        ));
    }

    #[test]
    fn test_analysis_is_idempotent() {
        let source = "class Foo { constructor() -> Foo { } }\
                      function main() -> void { Foo f = new Foo(); }";
        let tokens = Lexer::new(source).lex().unwrap();
        let mut program = Parser::new(tokens).parse().unwrap();

        assert!(analyse(&mut program).is_ok());
        // fixups already applied; a second run reaches the same verdict
        assert!(analyse(&mut program).is_ok());
    }

    #[test]
    fn test_super_must_be_first_statement() {
        let err = analyse_source(
            "class Base { constructor() -> Base { } }\
             class Derived extends Base {\
                constructor() -> Derived { echo 1; super(); }\
             }\
             function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("first statement"));
    }

    #[test]
    fn test_string_concatenation_coerces() {
        assert!(analyse_source(
            "function main() -> void { string s = \"n = \" + 42; }"
        )
        .is_ok());
    }
}
