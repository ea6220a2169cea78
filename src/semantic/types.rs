use std::collections::HashMap;
use std::fmt::Display;

use crate::parser::ast::PrimitiveType;

/// A resolved type descriptor. The implicit root class is `Object`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TypeInfo {
    Primitive(PrimitiveType),
    Array {
        element: Box<TypeInfo>,
        size: Option<usize>,
    },
    Class {
        name: String,
        type_args: Vec<TypeInfo>,
    },
    /// A class type parameter in scope, carrying its upper bound.
    TypeParam {
        name: String,
        bound: Box<TypeInfo>,
    },
    /// The type of the `null` literal.
    Null,
    Void,
}

impl TypeInfo {
    pub fn object() -> TypeInfo {
        TypeInfo::Class {
            name: "Object".into(),
            type_args: vec![],
        }
    }

    pub fn class(name: impl Into<String>) -> TypeInfo {
        TypeInfo::Class {
            name: name.into(),
            type_args: vec![],
        }
    }

    pub fn array_of(element: TypeInfo) -> TypeInfo {
        TypeInfo::Array {
            element: Box::new(element),
            size: None,
        }
    }

    pub fn is_primitive(&self, primitive: PrimitiveType) -> bool {
        matches!(self, TypeInfo::Primitive(p) if *p == primitive)
    }

    /// bit, int, long, or float.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            TypeInfo::Primitive(
                PrimitiveType::Bit | PrimitiveType::Int | PrimitiveType::Long | PrimitiveType::Float
            )
        )
    }

    /// bit, int, or long.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            TypeInfo::Primitive(PrimitiveType::Bit | PrimitiveType::Int | PrimitiveType::Long)
        )
    }

    pub fn is_class(&self) -> bool {
        matches!(self, TypeInfo::Class { .. } | TypeInfo::TypeParam { .. })
    }

    pub fn is_qubit_or_qubit_array(&self) -> bool {
        match self {
            TypeInfo::Primitive(PrimitiveType::Qubit) => true,
            TypeInfo::Array { element, .. } => element.is_primitive(PrimitiveType::Qubit),
            _ => false,
        }
    }

    /// Position of a primitive kind on the widening lattice
    /// `bit → int → long → float`; `None` for kinds outside it.
    fn widening_rank(&self) -> Option<u32> {
        match self {
            TypeInfo::Primitive(PrimitiveType::Bit) => Some(0),
            TypeInfo::Primitive(PrimitiveType::Int) => Some(1),
            TypeInfo::Primitive(PrimitiveType::Long) => Some(2),
            TypeInfo::Primitive(PrimitiveType::Float) => Some(3),
            _ => None,
        }
    }

    /// Replace type parameters by their entries in `map`, recursively.
    pub fn substitute(&self, map: &HashMap<String, TypeInfo>) -> TypeInfo {
        match self {
            TypeInfo::TypeParam { name, .. } => map
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            TypeInfo::Array { element, size } => TypeInfo::Array {
                element: Box::new(element.substitute(map)),
                size: *size,
            },
            TypeInfo::Class { name, type_args } => TypeInfo::Class {
                name: name.clone(),
                type_args: type_args.iter().map(|a| a.substitute(map)).collect(),
            },
            other => other.clone(),
        }
    }
}

impl Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeInfo::Primitive(p) => p.fmt(f),
            TypeInfo::Array { element, size } => {
                element.fmt(f)?;
                match size {
                    Some(n) => write!(f, "[{n}]"),
                    None => write!(f, "[]"),
                }
            }
            TypeInfo::Class { name, type_args } => {
                f.write_str(name)?;
                if !type_args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in type_args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        arg.fmt(f)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            TypeInfo::TypeParam { name, .. } => f.write_str(name),
            TypeInfo::Null => f.write_str("null"),
            TypeInfo::Void => f.write_str("void"),
        }
    }
}

/// Subclass walker used for assignability; implemented by the class
/// registry.
pub trait ClassHierarchy {
    /// Distance from `class_name` up to `ancestor` along the inheritance
    /// chain: 0 when equal, `None` when unrelated.
    fn inheritance_distance(&self, class_name: &str, ancestor: &str) -> Option<u32>;
}

/// Cost of converting a value of type `from` into `to`: 0 for an exact
/// match, positive for widening/upcast steps, `None` when no implicit
/// conversion exists. Explicit casts are handled separately.
pub fn conversion_cost(
    from: &TypeInfo,
    to: &TypeInfo,
    hierarchy: &dyn ClassHierarchy,
) -> Option<u32> {
    if from == to {
        return Some(0);
    }

    match (from, to) {
        (TypeInfo::Primitive(_), TypeInfo::Primitive(_)) => {
            let from_rank = from.widening_rank()?;
            let to_rank = to.widening_rank()?;
            if from_rank <= to_rank {
                Some(to_rank - from_rank)
            } else if to_rank >= 1 {
                // narrowing among int/long/float truncates toward zero at
                // runtime and always loses to a widening candidate
                Some(3 + (from_rank - to_rank))
            } else {
                // nothing narrows into bit
                None
            }
        }
        (TypeInfo::Null, TypeInfo::Class { .. } | TypeInfo::TypeParam { .. }) => Some(1),
        (
            TypeInfo::Class {
                name: from_name,
                type_args: from_args,
            },
            TypeInfo::Class {
                name: to_name,
                type_args: to_args,
            },
        ) => {
            if from_name == to_name {
                // generic types are invariant in their arguments
                return (from_args == to_args).then_some(0);
            }
            let distance = hierarchy.inheritance_distance(from_name, to_name)?;
            // the upcast must land exactly on the target instantiation;
            // argument checks along the chain happened at declaration time
            (to_args.is_empty() || from_args == to_args).then_some(distance)
        }
        (TypeInfo::TypeParam { name: a, .. }, TypeInfo::TypeParam { name: b, .. }) => {
            (a == b).then_some(0)
        }
        // a type parameter may flow wherever its bound may
        (TypeInfo::TypeParam { bound, .. }, _) => {
            conversion_cost(bound, to, hierarchy).map(|c| c + 1)
        }
        (
            TypeInfo::Array {
                element: from_element,
                size: from_size,
            },
            TypeInfo::Array {
                element: to_element,
                size: to_size,
            },
        ) => {
            if from_element != to_element {
                return None;
            }
            match (from_size, to_size) {
                (_, None) => Some(0),
                (Some(a), Some(b)) if a == b => Some(0),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatHierarchy;

    impl ClassHierarchy for FlatHierarchy {
        fn inheritance_distance(&self, class_name: &str, ancestor: &str) -> Option<u32> {
            match (class_name, ancestor) {
                (a, b) if a == b => Some(0),
                (_, "Object") => Some(1),
                _ => None,
            }
        }
    }

    #[test]
    fn test_widening_costs() {
        let bit = TypeInfo::Primitive(PrimitiveType::Bit);
        let int = TypeInfo::Primitive(PrimitiveType::Int);
        let float = TypeInfo::Primitive(PrimitiveType::Float);

        assert_eq!(conversion_cost(&bit, &int, &FlatHierarchy), Some(1));
        assert_eq!(conversion_cost(&bit, &float, &FlatHierarchy), Some(3));
        // narrowing is permitted but costlier than any widening
        assert_eq!(conversion_cost(&float, &int, &FlatHierarchy), Some(5));
        assert_eq!(conversion_cost(&int, &bit, &FlatHierarchy), None);
    }

    #[test]
    fn test_char_does_not_widen() {
        let char_ty = TypeInfo::Primitive(PrimitiveType::Char);
        let int = TypeInfo::Primitive(PrimitiveType::Int);

        assert_eq!(conversion_cost(&char_ty, &int, &FlatHierarchy), None);
    }

    #[test]
    fn test_null_assignable_to_classes_only() {
        let int = TypeInfo::Primitive(PrimitiveType::Int);

        assert_eq!(
            conversion_cost(&TypeInfo::Null, &TypeInfo::object(), &FlatHierarchy),
            Some(1)
        );
        assert_eq!(conversion_cost(&TypeInfo::Null, &int, &FlatHierarchy), None);
    }

    #[test]
    fn test_array_sizes() {
        let fixed = TypeInfo::Array {
            element: Box::new(TypeInfo::Primitive(PrimitiveType::Bit)),
            size: Some(4),
        };
        let dynamic = TypeInfo::array_of(TypeInfo::Primitive(PrimitiveType::Bit));

        assert_eq!(conversion_cost(&fixed, &dynamic, &FlatHierarchy), Some(0));
        assert_eq!(conversion_cost(&dynamic, &fixed, &FlatHierarchy), None);
    }

    #[test]
    fn test_substitute_type_params() {
        let mut map = HashMap::new();
        map.insert("T".to_string(), TypeInfo::Primitive(PrimitiveType::Int));

        let param = TypeInfo::TypeParam {
            name: "T".into(),
            bound: Box::new(TypeInfo::object()),
        };
        assert_eq!(
            param.substitute(&map),
            TypeInfo::Primitive(PrimitiveType::Int)
        );

        let array = TypeInfo::array_of(param);
        assert_eq!(
            array.substitute(&map),
            TypeInfo::array_of(TypeInfo::Primitive(PrimitiveType::Int))
        );
    }
}
