use std::collections::HashMap;

use super::types::TypeInfo;

/// What a name in scope refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeEntry {
    pub ty: TypeInfo,
    pub is_final: bool,
    /// Finals may be declared uninitialised and assigned exactly once.
    pub initialized: bool,
    pub is_tracked: bool,
    /// Type names (classes, type parameters) share the namespace with
    /// variables and cannot be shadowed.
    pub is_type_name: bool,
}

impl ScopeEntry {
    pub fn variable(ty: TypeInfo, is_final: bool, initialized: bool) -> Self {
        Self {
            ty,
            is_final,
            initialized,
            is_tracked: false,
            is_type_name: false,
        }
    }

    pub fn type_name(ty: TypeInfo) -> Self {
        Self {
            ty,
            is_final: false,
            initialized: true,
            is_tracked: false,
            is_type_name: true,
        }
    }
}

/// A stack of scope frames. Declaring a name present in *any* active frame
/// is a redeclaration; the language permits no shadowing.
#[derive(Debug, Default)]
pub struct Scope {
    frames: Vec<HashMap<String, ScopeEntry>>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }

    pub fn begin(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn end(&mut self) {
        self.frames.pop();
    }

    /// Declare a name in the innermost frame. Returns `false` if the name is
    /// already bound in any active frame.
    pub fn declare(&mut self, name: &str, entry: ScopeEntry) -> bool {
        if self.lookup(name).is_some() {
            return false;
        }
        self.frames
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.to_string(), entry);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<&ScopeEntry> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut ScopeEntry> {
        self.frames
            .iter_mut()
            .rev()
            .find_map(|frame| frame.get_mut(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_and_lookup() {
        let mut scope = Scope::new();
        assert!(scope.declare("x", ScopeEntry::variable(TypeInfo::object(), false, true)));
        assert!(scope.lookup("x").is_some());
    }

    #[test]
    fn test_no_shadowing_across_frames() {
        let mut scope = Scope::new();
        assert!(scope.declare("x", ScopeEntry::variable(TypeInfo::object(), false, true)));

        scope.begin();
        assert!(!scope.declare("x", ScopeEntry::variable(TypeInfo::object(), false, true)));
        scope.end();
    }

    #[test]
    fn test_frame_exit_unbinds() {
        let mut scope = Scope::new();
        scope.begin();
        assert!(scope.declare("x", ScopeEntry::variable(TypeInfo::object(), false, true)));
        scope.end();
        assert!(scope.lookup("x").is_none());
    }
}
