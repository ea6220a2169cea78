//! Class-hierarchy validation.
//!
//! Runs after the registries are built and before any body is checked:
//! cycle detection, static-class constraints, constructor presence and
//! delegation, override matching, effective-abstractness computation, and
//! the exactly-once rule for `final` instance fields.

use std::collections::HashSet;

use crate::error::{Position, SemanticError, SemanticResult};
use crate::parser::ast::{
    AssignTarget, ConstructorBody, Expression, Program, Statement, Visibility,
};

use super::registry::{ClassRegistry, MethodInfo};
use super::types::{conversion_cost, TypeInfo};

fn err<T>(position: Position, message: impl Into<String>) -> SemanticResult<T> {
    Err(SemanticError {
        message: message.into(),
        position,
    })
}

pub(super) fn validate(registry: &mut ClassRegistry, program: &Program) -> SemanticResult<()> {
    detect_cycles(registry, program)?;

    for class in &program.classes {
        if class.is_static {
            validate_static_class(registry, class)?;
        } else if class.constructors.is_empty() {
            return err(
                class.position,
                format!(
                    "class '{}' must declare at least one constructor",
                    class.name
                ),
            );
        }

        validate_field_shadowing(registry, class)?;
        validate_overrides(registry, class)?;
        validate_constructor_delegation(registry, class)?;
        validate_default_constructors(registry, class)?;
        validate_final_fields(registry, class)?;
    }

    compute_abstract_methods(registry, program);
    Ok(())
}

/// Iterative walk with a visited set; reports the class that closes the
/// cycle.
fn detect_cycles(registry: &ClassRegistry, program: &Program) -> SemanticResult<()> {
    for class in &program.classes {
        let mut visited = HashSet::new();
        let mut current = class.name.clone();

        loop {
            if !visited.insert(current.clone()) {
                return err(
                    class.position,
                    format!(
                        "inheritance cycle detected involving class '{}'",
                        class.name
                    ),
                );
            }
            let Some(info) = registry.get(&current) else {
                break;
            };
            match &info.base {
                Some(TypeInfo::Class { name, .. }) => current = name.clone(),
                _ => break,
            }
        }
    }
    Ok(())
}

fn validate_static_class(
    _registry: &ClassRegistry,
    class: &crate::parser::ast::ClassDeclaration,
) -> SemanticResult<()> {
    if let Some(field) = class.fields.iter().find(|f| !f.is_static) {
        return err(
            field.position,
            format!(
                "static class '{}' cannot have instance fields",
                class.name
            ),
        );
    }
    if let Some(constructor) = class.constructors.first() {
        return err(
            constructor.position,
            format!("static class '{}' cannot have constructors", class.name),
        );
    }
    if let Some(destructor) = &class.destructor {
        return err(
            destructor.position,
            format!("static class '{}' cannot have a destructor", class.name),
        );
    }
    if let Some(method) = class.methods.iter().find(|m| !m.is_static) {
        return err(
            method.position,
            format!(
                "static class '{}' can only declare static methods",
                class.name
            ),
        );
    }
    Ok(())
}

fn validate_field_shadowing(
    registry: &ClassRegistry,
    class: &crate::parser::ast::ClassDeclaration,
) -> SemanticResult<()> {
    let chain = registry.chain(&class.name);
    for field in &class.fields {
        for ancestor in chain.iter().skip(1) {
            if ancestor.field(&field.name).is_some() {
                return err(
                    field.position,
                    format!(
                        "field '{}' shadows a field of base class '{}'",
                        field.name, ancestor.name
                    ),
                );
            }
        }
    }
    Ok(())
}

/// Ancestor overloads for `name` as seen from `class_name`, substituted
/// along the base instantiation.
fn ancestor_methods(registry: &ClassRegistry, class_name: &str, name: &str) -> Vec<MethodInfo> {
    let Some(class) = registry.get(class_name) else {
        return vec![];
    };
    match &class.base {
        Some(TypeInfo::Class {
            name: base_name,
            type_args,
        }) => registry.resolve_methods(base_name, type_args, name),
        _ => vec![],
    }
}

fn validate_overrides(
    registry: &ClassRegistry,
    class: &crate::parser::ast::ClassDeclaration,
) -> SemanticResult<()> {
    for method in &class.methods {
        if method.is_static && (method.is_virtual || method.is_override) {
            return err(
                method.position,
                format!(
                    "static method '{}' cannot be virtual or override",
                    method.name
                ),
            );
        }

        let Some(info) = registry
            .get(&class.name)
            .and_then(|c| c.methods.get(&method.name))
            .and_then(|bucket| {
                bucket
                    .iter()
                    .find(|m| m.position == method.position)
            })
            .cloned()
        else {
            continue;
        };

        let ancestors = ancestor_methods(registry, &class.name, &method.name);
        let matching = ancestors.iter().find(|m| m.same_signature(&info));

        if method.is_override {
            let Some(overridden) = matching else {
                return err(
                    method.position,
                    format!(
                        "'{}' does not override any method of a base class",
                        method.name
                    ),
                );
            };
            if !overridden.is_virtual && !overridden.is_override {
                return err(
                    method.position,
                    format!(
                        "'{}' overrides a method of '{}' that is not virtual",
                        method.name, overridden.owner
                    ),
                );
            }
            if overridden.is_final {
                return err(
                    method.position,
                    format!(
                        "'{}' overrides a final method of '{}'",
                        method.name, overridden.owner
                    ),
                );
            }
            if overridden.return_type != info.return_type {
                return err(
                    method.position,
                    format!(
                        "override '{}' changes the return type from '{}' to '{}'",
                        method.name, overridden.return_type, info.return_type
                    ),
                );
            }
        } else if let Some(shadowed) = matching {
            if shadowed.is_virtual || shadowed.is_override {
                return err(
                    method.position,
                    format!(
                        "'{}' hides a virtual method of '{}'; declare it override",
                        method.name, shadowed.owner
                    ),
                );
            }
        }
    }
    Ok(())
}

/// Every constructor either opens with `super(...)` or implicitly
/// delegates to an accessible zero-argument base constructor.
fn validate_constructor_delegation(
    registry: &ClassRegistry,
    class: &crate::parser::ast::ClassDeclaration,
) -> SemanticResult<()> {
    let Some(info) = registry.get(&class.name) else {
        return Ok(());
    };
    let Some(TypeInfo::Class { name: base_name, .. }) = &info.base else {
        return Ok(());
    };

    for constructor in &class.constructors {
        let delegates = match &constructor.body {
            ConstructorBody::Block(body) => {
                matches!(body.first(), Some(Statement::SuperConstructorCall { .. }))
            }
            ConstructorBody::Default => false,
        };
        if delegates {
            continue;
        }

        let base = registry.get(base_name).expect("base class is registered");
        let has_accessible_zero_arg = base.constructors.iter().any(|c| {
            c.parameters.is_empty() && c.visibility != Visibility::Private
        });
        if !has_accessible_zero_arg {
            return err(
                constructor.position,
                format!(
                    "base class '{base_name}' has no accessible zero-argument constructor; add super(...)"
                ),
            );
        }
    }
    Ok(())
}

/// `constructor(params) -> C = default;` binds every parameter to the field
/// of the same name.
fn validate_default_constructors(
    registry: &ClassRegistry,
    class: &crate::parser::ast::ClassDeclaration,
) -> SemanticResult<()> {
    let Some(info) = registry.get(&class.name) else {
        return Ok(());
    };

    for constructor in &class.constructors {
        if !matches!(constructor.body, ConstructorBody::Default) {
            continue;
        }
        let registered = info
            .constructors
            .iter()
            .find(|c| c.is_default && c.position == constructor.position)
            .expect("default constructor is registered");

        for (parameter, ty) in constructor.parameters.iter().zip(&registered.parameters) {
            let Some(field) = info.field(&parameter.name) else {
                return err(
                    parameter.position,
                    format!(
                        "default constructor parameter '{}' has no matching field",
                        parameter.name
                    ),
                );
            };
            if field.is_static {
                return err(
                    parameter.position,
                    format!(
                        "default constructor parameter '{}' matches a static field",
                        parameter.name
                    ),
                );
            }
            if conversion_cost(ty, &field.ty, registry).is_none() {
                return err(
                    parameter.position,
                    format!(
                        "default constructor parameter '{}' of type '{ty}' does not fit field type '{}'",
                        parameter.name, field.ty
                    ),
                );
            }
        }
    }
    Ok(())
}

/// Final instance fields without a declaration initialiser must be assigned
/// exactly once, as a top-level statement, in every constructor of the
/// declaring class.
fn validate_final_fields(
    registry: &ClassRegistry,
    class: &crate::parser::ast::ClassDeclaration,
) -> SemanticResult<()> {
    let Some(info) = registry.get(&class.name) else {
        return Ok(());
    };

    let pending: Vec<&str> = info
        .fields
        .iter()
        .filter(|f| f.is_final && !f.is_static && !f.has_initializer)
        .map(|f| f.name.as_str())
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    for field_name in pending {
        for constructor in &class.constructors {
            let count = match &constructor.body {
                ConstructorBody::Default => constructor
                    .parameters
                    .iter()
                    .filter(|p| p.name == field_name)
                    .count(),
                ConstructorBody::Block(body) => {
                    let param_shadows = constructor
                        .parameters
                        .iter()
                        .any(|p| p.name == field_name);
                    body.iter()
                        .filter(|statement| {
                            assigns_field(statement, field_name, param_shadows)
                        })
                        .count()
                }
            };

            if count != 1 {
                return err(
                    constructor.position,
                    format!(
                        "final field '{field_name}' must be initialised exactly once in every \
                         constructor of '{}' (found {count} assignment(s))",
                        class.name
                    ),
                );
            }
        }
    }
    Ok(())
}

fn assigns_field(statement: &Statement, field: &str, param_shadows: bool) -> bool {
    let Statement::Assignment { target, .. } = statement else {
        return false;
    };
    match target {
        AssignTarget::Variable { name, .. } => !param_shadows && name == field,
        AssignTarget::Member { object, field: f, .. } => {
            matches!(object.as_ref(), Expression::This { .. }) && f == field
        }
        AssignTarget::Index { .. } => false,
    }
}

/// A class's effective abstract-method set: bodyless virtual methods of the
/// chain with no bodied override below them.
fn compute_abstract_methods(registry: &mut ClassRegistry, program: &Program) {
    let mut computed: Vec<(String, Vec<String>)> = vec![];

    for class in &program.classes {
        let chain = registry.chain(&class.name);
        let mut names = vec![];

        for (depth, ancestor) in chain.iter().enumerate() {
            for bucket in ancestor.methods.values() {
                for method in bucket {
                    if !method.is_abstract {
                        continue;
                    }
                    let overridden = chain[..depth].iter().any(|below| {
                        below
                            .methods
                            .get(&method.name)
                            .map(|b| {
                                b.iter().any(|m| {
                                    !m.is_abstract && m.same_signature(method)
                                })
                            })
                            .unwrap_or(false)
                    });
                    if !overridden && !names.contains(&method.name) {
                        names.push(method.name.clone());
                    }
                }
            }
        }

        computed.push((class.name.clone(), names));
    }

    for (name, names) in computed {
        if let Some(info) = registry.get_mut(&name) {
            info.abstract_methods = names;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::semantic::analyse;

    fn check(input: &str) -> Result<(), crate::error::SemanticError> {
        let tokens = Lexer::new(input).lex().expect("lexing failed");
        let mut program = Parser::new(tokens).parse().expect("parsing failed");
        analyse(&mut program).map(|_| ())
    }

    #[test]
    fn test_inheritance_cycle_detected() {
        let err = check(
            "class A extends B { constructor() -> A { } }\
             class B extends A { constructor() -> B { } }\
             function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("cycle"));
    }

    #[test]
    fn test_missing_constructor_rejected() {
        let err = check("class Foo { } function main() -> void { }").unwrap_err();
        assert!(err.message.contains("constructor"));
    }

    #[test]
    fn test_static_class_constraints() {
        let err = check(
            "static class Util { private int x; }\
             function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("instance fields"));

        assert!(check(
            "static class Util {\
                public static function twice(int x) -> int { return x * 2; }\
             }\
             function main() -> void { int y = Util.twice(4); }"
        )
        .is_ok());
    }

    #[test]
    fn test_override_must_match_virtual_ancestor() {
        let err = check(
            "class Base { constructor() -> Base { } public function f() -> void { } }\
             class Derived extends Base {\
                constructor() -> Derived { }\
                public override function f() -> void { }\
             }\
             function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("not virtual"));

        assert!(check(
            "class Base { constructor() -> Base { } public virtual function f() -> void { } }\
             class Derived extends Base {\
                constructor() -> Derived { }\
                public override function f() -> void { }\
             }\
             function main() -> void { }"
        )
        .is_ok());
    }

    #[test]
    fn test_override_without_keyword_rejected() {
        let err = check(
            "class Base { constructor() -> Base { } public virtual function f() -> void { } }\
             class Derived extends Base {\
                constructor() -> Derived { }\
                public function f() -> void { }\
             }\
             function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("override"));
    }

    #[test]
    fn test_bodyless_virtual_makes_class_abstract() {
        let err = check(
            "class Shape {\
                constructor() -> Shape { }\
                public virtual function area() -> float;\
             }\
             function main() -> void { Shape s = new Shape(); }",
        )
        .unwrap_err();
        assert!(err.message.contains("abstract"));
    }

    #[test]
    fn test_concrete_subclass_of_abstract_is_instantiable() {
        assert!(check(
            "abstract class Shape {\
                constructor() -> Shape { }\
                public virtual function area() -> float;\
             }\
             class Square extends Shape {\
                private float side = 1.0f;\
                constructor() -> Square { }\
                public override function area() -> float { return side * side; }\
             }\
             function main() -> void { Square s = new Square(); float a = s.area(); }"
        )
        .is_ok());
    }

    #[test]
    fn test_missing_super_for_base_without_zero_arg() {
        let err = check(
            "class Base { constructor(int x) -> Base { } }\
             class Derived extends Base { constructor() -> Derived { } }\
             function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("super"));

        assert!(check(
            "class Base { constructor(int x) -> Base { } }\
             class Derived extends Base { constructor() -> Derived { super(1); } }\
             function main() -> void { }"
        )
        .is_ok());
    }

    #[test]
    fn test_final_field_initialised_in_every_constructor() {
        let err = check(
            "class Foo {\
                private final int x;\
                constructor() -> Foo { }\
             }\
             function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("exactly once"));

        assert!(check(
            "class Foo {\
                private final int x;\
                constructor() -> Foo { x = 1; }\
                constructor(int seed) -> Foo { x = seed; }\
             }\
             function main() -> void { }"
        )
        .is_ok());
    }

    #[test]
    fn test_default_constructor_binds_fields() {
        assert!(check(
            "class Point {\
                private final int x;\
                private final int y;\
                constructor(int x, int y) -> Point = default;\
             }\
             function main() -> void { Point p = new Point(1, 2); }"
        )
        .is_ok());

        let err = check(
            "class Point {\
                private int x;\
                constructor(int z) -> Point = default;\
             }\
             function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("matching field"));
    }

    #[test]
    fn test_field_shadowing_rejected() {
        let err = check(
            "class Base { protected int x = 1; constructor() -> Base { } }\
             class Derived extends Base { private int x = 2; constructor() -> Derived { } }\
             function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("shadows"));
    }

    #[test]
    fn test_derived_constructor_cannot_assign_inherited_final() {
        let err = check(
            "class Base {\
                protected final int x;\
                constructor() -> Base { x = 1; }\
             }\
             class Derived extends Base {\
                constructor() -> Derived { x = 2; }\
             }\
             function main() -> void { }",
        )
        .unwrap_err();
        assert!(err.message.contains("final"));
    }
}
