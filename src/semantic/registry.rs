//! Class and function registries.
//!
//! Built in a declaration pass before any body is checked, so forward
//! references and mutual recursion need no special handling. The registries
//! double as the runtime's dispatch metadata.

use std::collections::HashMap;

use crate::error::Position;
use crate::parser::ast::Visibility;

use super::types::{ClassHierarchy, TypeInfo};

/// The built-in quantum gates, registered as ordinary functions with fixed
/// signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Gate {
    H,
    X,
    Y,
    Z,
    Rx,
    Ry,
    Rz,
    Cx,
}

impl Gate {
    pub fn name(&self) -> &'static str {
        match self {
            Gate::H => "h",
            Gate::X => "x",
            Gate::Y => "y",
            Gate::Z => "z",
            Gate::Rx => "rx",
            Gate::Ry => "ry",
            Gate::Rz => "rz",
            Gate::Cx => "cx",
        }
    }

    pub fn all() -> [Gate; 8] {
        [
            Gate::H,
            Gate::X,
            Gate::Y,
            Gate::Z,
            Gate::Rx,
            Gate::Ry,
            Gate::Rz,
            Gate::Cx,
        ]
    }

    /// Number of qubit operands.
    pub fn arity(&self) -> usize {
        match self {
            Gate::Cx => 2,
            _ => 1,
        }
    }

    /// Whether the gate takes a trailing angle parameter.
    pub fn has_angle(&self) -> bool {
        matches!(self, Gate::Rx | Gate::Ry | Gate::Rz)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_final: bool,
    pub is_tracked: bool,
    pub ty: TypeInfo,
    pub has_initializer: bool,
    pub owner: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_final: bool,
    /// Bodyless virtual method; makes the owning class abstract.
    pub is_abstract: bool,
    pub is_quantum: bool,
    pub parameters: Vec<TypeInfo>,
    pub return_type: TypeInfo,
    pub owner: String,
    pub position: Position,
}

impl MethodInfo {
    /// Overload identity: arity plus exact parameter types.
    pub fn same_signature(&self, other: &MethodInfo) -> bool {
        self.parameters == other.parameters
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructorInfo {
    pub visibility: Visibility,
    pub parameters: Vec<TypeInfo>,
    pub is_default: bool,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub name: String,
    /// Base class instantiation (`TypeInfo::Class`); `None` only for the
    /// root `Object`.
    pub base: Option<TypeInfo>,
    pub is_abstract: bool,
    pub is_static: bool,
    /// Type parameter names with their upper bounds (default `Object`).
    pub type_parameters: Vec<(String, TypeInfo)>,
    /// Declaration order matters for construction and destruction.
    pub fields: Vec<FieldInfo>,
    /// Overload buckets: method name to declared overloads.
    pub methods: HashMap<String, Vec<MethodInfo>>,
    pub constructors: Vec<ConstructorInfo>,
    pub has_destructor: bool,
    /// Names of abstract methods not yet overridden, including inherited
    /// ones; computed during validation.
    pub abstract_methods: Vec<String>,
    pub position: Position,
}

impl ClassInfo {
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Effective abstractness: declared abstract or carrying unoverridden
    /// abstract methods.
    pub fn is_instantiable(&self) -> bool {
        !self.is_abstract && self.abstract_methods.is_empty() && !self.is_static
    }
}

/// Name to class descriptor; seeded with the implicit root `Object`.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, ClassInfo>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            classes: HashMap::new(),
        };
        registry.insert(object_class());
        registry
    }

    pub fn insert(&mut self, class: ClassInfo) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ClassInfo> {
        self.classes.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.classes.keys()
    }

    /// Walk the chain from `name` to the root, inclusive. Stops on a
    /// missing or cyclic base; cycle detection proper happens during
    /// validation.
    pub fn chain(&self, name: &str) -> Vec<&ClassInfo> {
        let mut chain = vec![];
        let mut seen = std::collections::HashSet::new();
        let mut current = self.get(name);
        while let Some(class) = current {
            if !seen.insert(class.name.clone()) {
                break;
            }
            chain.push(class);
            current = match &class.base {
                Some(TypeInfo::Class { name, .. }) => self.get(name),
                _ => None,
            };
        }
        chain
    }

    /// Find `field` on `class_name` or an ancestor, with the substitution
    /// map accumulated along the chain applied to its type.
    pub fn resolve_field(
        &self,
        class_name: &str,
        type_args: &[TypeInfo],
        field: &str,
    ) -> Option<(FieldInfo, TypeInfo)> {
        let mut current = class_name.to_string();
        let mut args = type_args.to_vec();

        loop {
            let class = self.get(&current)?;
            let map = substitution_map(class, &args);
            if let Some(info) = class.field(field) {
                let ty = info.ty.substitute(&map);
                return Some((info.clone(), ty));
            }
            match &class.base {
                Some(TypeInfo::Class { name, type_args }) => {
                    args = type_args
                        .iter()
                        .map(|a| a.substitute(&map))
                        .collect();
                    current = name.clone();
                }
                _ => return None,
            }
        }
    }

    /// Collect the overload bucket for `method` along the chain of
    /// `class_name`, substituted. Overloads shadowed by an exact-signature
    /// redeclaration further down the chain appear only once.
    pub fn resolve_methods(
        &self,
        class_name: &str,
        type_args: &[TypeInfo],
        method: &str,
    ) -> Vec<MethodInfo> {
        let mut found: Vec<MethodInfo> = vec![];
        let mut current = class_name.to_string();
        let mut args = type_args.to_vec();

        loop {
            let Some(class) = self.get(&current) else {
                return found;
            };
            let map = substitution_map(class, &args);
            if let Some(bucket) = class.methods.get(method) {
                for info in bucket {
                    let substituted = MethodInfo {
                        parameters: info.parameters.iter().map(|p| p.substitute(&map)).collect(),
                        return_type: info.return_type.substitute(&map),
                        ..info.clone()
                    };
                    if !found.iter().any(|m| m.same_signature(&substituted)) {
                        found.push(substituted);
                    }
                }
            }
            match &class.base {
                Some(TypeInfo::Class { name, type_args }) => {
                    args = type_args
                        .iter()
                        .map(|a| a.substitute(&map))
                        .collect();
                    current = name.clone();
                }
                _ => return found,
            }
        }
    }
}

impl ClassHierarchy for ClassRegistry {
    fn inheritance_distance(&self, class_name: &str, ancestor: &str) -> Option<u32> {
        let mut distance = 0;
        for class in self.chain(class_name) {
            if class.name == ancestor {
                return Some(distance);
            }
            distance += 1;
        }
        None
    }
}

/// Map from a class's type parameter names to the given arguments. An empty
/// argument list on a generic class maps each parameter to its bound.
pub fn substitution_map(class: &ClassInfo, type_args: &[TypeInfo]) -> HashMap<String, TypeInfo> {
    let mut map = HashMap::new();
    for (i, (name, bound)) in class.type_parameters.iter().enumerate() {
        let value = type_args.get(i).cloned().unwrap_or_else(|| bound.clone());
        map.insert(name.clone(), value);
    }
    map
}

fn object_class() -> ClassInfo {
    ClassInfo {
        name: "Object".into(),
        base: None,
        is_abstract: false,
        is_static: false,
        type_parameters: vec![],
        fields: vec![],
        methods: HashMap::new(),
        // the implicit public zero-arg constructor every chain ends in
        constructors: vec![ConstructorInfo {
            visibility: Visibility::Public,
            parameters: vec![],
            is_default: false,
            position: Position::default(),
        }],
        has_destructor: false,
        abstract_methods: vec![],
        position: Position::default(),
    }
}

/// A free-function signature. Gates carry their [`Gate`] tag so the
/// evaluator can intercept them.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub name: String,
    pub parameters: Vec<TypeInfo>,
    pub return_type: TypeInfo,
    pub is_quantum: bool,
    pub gate: Option<Gate>,
    pub position: Position,
}

/// Overload buckets for free functions, seeded with the built-in gates.
#[derive(Debug, Default)]
pub struct FunctionTable {
    functions: HashMap<String, Vec<FunctionSignature>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        use crate::parser::ast::PrimitiveType;

        let mut table = Self {
            functions: HashMap::new(),
        };

        let qubit = TypeInfo::Primitive(PrimitiveType::Qubit);
        let float = TypeInfo::Primitive(PrimitiveType::Float);

        for gate in Gate::all() {
            let mut parameters = vec![qubit.clone(); gate.arity()];
            if gate.has_angle() {
                parameters.push(float.clone());
            }
            table.insert(FunctionSignature {
                name: gate.name().into(),
                parameters,
                return_type: TypeInfo::Void,
                is_quantum: false,
                gate: Some(gate),
                position: Position::default(),
            });
        }

        table
    }

    pub fn insert(&mut self, signature: FunctionSignature) {
        self.functions
            .entry(signature.name.clone())
            .or_default()
            .push(signature);
    }

    pub fn overloads(&self, name: &str) -> &[FunctionSignature] {
        self.functions.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_seeds_object() {
        let registry = ClassRegistry::new();
        let object = registry.get("Object").unwrap();

        assert!(object.base.is_none());
        assert_eq!(object.constructors.len(), 1);
        assert!(object.constructors[0].parameters.is_empty());
    }

    #[test]
    fn test_function_table_seeds_gates() {
        let table = FunctionTable::new();

        assert_eq!(table.overloads("h").len(), 1);
        assert_eq!(table.overloads("cx")[0].parameters.len(), 2);
        assert_eq!(table.overloads("rx")[0].parameters.len(), 2);
        assert!(table.overloads("rx")[0].gate.unwrap().has_angle());
    }

    #[test]
    fn test_inheritance_distance() {
        let mut registry = ClassRegistry::new();
        registry.insert(ClassInfo {
            name: "Base".into(),
            base: Some(TypeInfo::object()),
            is_abstract: false,
            is_static: false,
            type_parameters: vec![],
            fields: vec![],
            methods: HashMap::new(),
            constructors: vec![],
            has_destructor: false,
            abstract_methods: vec![],
            position: Position::default(),
        });
        registry.insert(ClassInfo {
            name: "Derived".into(),
            base: Some(TypeInfo::class("Base")),
            is_abstract: false,
            is_static: false,
            type_parameters: vec![],
            fields: vec![],
            methods: HashMap::new(),
            constructors: vec![],
            has_destructor: false,
            abstract_methods: vec![],
            position: Position::default(),
        });

        assert_eq!(registry.inheritance_distance("Derived", "Base"), Some(1));
        assert_eq!(registry.inheritance_distance("Derived", "Object"), Some(2));
        assert_eq!(registry.inheritance_distance("Base", "Derived"), None);
    }
}
