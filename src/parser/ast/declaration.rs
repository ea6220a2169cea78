use crate::error::Position;

use super::{Expression, Statement, TypeNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AnnotationKind {
    Quantum,
    Shots,
    Tracked,
}

impl AnnotationKind {
    pub fn name(&self) -> &'static str {
        match self {
            AnnotationKind::Quantum => "quantum",
            AnnotationKind::Shots => "shots",
            AnnotationKind::Tracked => "tracked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    /// Only `@shots(N)` carries an argument.
    pub argument: Option<i64>,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Visibility {
    Public,
    #[default]
    Private,
    Protected,
}

impl Visibility {
    pub fn name(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Protected => "protected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeNode,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TypeParameter {
    pub name: String,
    pub bound: Option<TypeNode>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDeclaration {
    pub annotations: Vec<Annotation>,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: TypeNode,
    pub body: Vec<Statement>,
    pub position: Position,
}

impl FunctionDeclaration {
    pub fn has_annotation(&self, kind: AnnotationKind) -> bool {
        self.annotations.iter().any(|a| a.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldDeclaration {
    pub annotations: Vec<Annotation>,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_final: bool,
    pub ty: TypeNode,
    pub name: String,
    pub initializer: Option<Expression>,
    pub position: Position,
}

impl FieldDeclaration {
    pub fn is_tracked(&self) -> bool {
        self.annotations
            .iter()
            .any(|a| a.kind == AnnotationKind::Tracked)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MethodDeclaration {
    pub annotations: Vec<Annotation>,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_final: bool,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: TypeNode,
    /// `None` for a bodyless `virtual` method, which makes the class
    /// abstract.
    pub body: Option<Vec<Statement>>,
    pub position: Position,
}

impl MethodDeclaration {
    pub fn has_annotation(&self, kind: AnnotationKind) -> bool {
        self.annotations.iter().any(|a| a.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ConstructorBody {
    Block(Vec<Statement>),
    /// `constructor(params) -> ClassName = default;` binds each parameter to
    /// the field of the same name.
    Default,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConstructorDeclaration {
    pub visibility: Visibility,
    pub parameters: Vec<Parameter>,
    /// Class name written after the `->`; must match the enclosing class.
    pub class_name: String,
    pub body: ConstructorBody,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DestructorDeclaration {
    pub body: Vec<Statement>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassDeclaration {
    pub annotations: Vec<Annotation>,
    pub is_abstract: bool,
    pub is_static: bool,
    pub name: String,
    pub type_parameters: Vec<TypeParameter>,
    pub base: Option<TypeNode>,
    pub fields: Vec<FieldDeclaration>,
    pub methods: Vec<MethodDeclaration>,
    pub constructors: Vec<ConstructorDeclaration>,
    pub destructor: Option<DestructorDeclaration>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImportDeclaration {
    pub path: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PackageDeclaration {
    pub name: String,
    pub position: Position,
}

/// Shot count attached to the program: whether `@shots(N)` was present, and
/// the count itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ShotSpec {
    pub annotated: bool,
    pub count: u64,
}

impl Default for ShotSpec {
    fn default() -> Self {
        Self {
            annotated: false,
            count: 1,
        }
    }
}

/// A parsed (and possibly merged) program.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Program {
    pub package: Option<PackageDeclaration>,
    pub imports: Vec<ImportDeclaration>,
    pub classes: Vec<ClassDeclaration>,
    pub functions: Vec<FunctionDeclaration>,
    pub statements: Vec<Statement>,
    pub shots: ShotSpec,
}

impl Program {
    pub fn main(&self) -> Option<&FunctionDeclaration> {
        self.functions.iter().find(|f| f.name == "main")
    }
}
