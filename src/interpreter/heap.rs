use std::collections::HashMap;

use super::value::Value;

/// A heap-allocated object instance. Fields of the whole inheritance chain
/// live flattened in one table; `alive` is cleared by `destroy`.
#[derive(Debug)]
pub struct Instance {
    pub class_name: String,
    pub fields: HashMap<String, Value>,
    pub alive: bool,
}

/// Object heap addressed by handle. Handles are never reused within a shot;
/// cyclic references among objects simply persist until the shot ends.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Instance>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, class_name: String) -> usize {
        self.objects.push(Instance {
            class_name,
            fields: HashMap::new(),
            alive: true,
        });
        self.objects.len() - 1
    }

    pub fn get(&self, handle: usize) -> Option<&Instance> {
        self.objects.get(handle)
    }

    pub fn get_mut(&mut self, handle: usize) -> Option<&mut Instance> {
        self.objects.get_mut(handle)
    }

    /// All still-live instances, for the end-of-shot tracked-field sweep.
    pub fn live(&self) -> impl Iterator<Item = &Instance> {
        self.objects.iter().filter(|o| o.alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_field_access() {
        let mut heap = Heap::new();
        let handle = heap.alloc("Foo".into());

        heap.get_mut(handle)
            .unwrap()
            .fields
            .insert("x".into(), Value::Int(7));
        assert_eq!(heap.get(handle).unwrap().fields["x"], Value::Int(7));
        assert!(heap.get(handle).unwrap().alive);
    }
}
