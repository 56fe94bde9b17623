//! Lexically scoped name table shared by the type checker and interpreter.
//!
//! Frames form a parent-linked stack. `environment_id` exposes a handle to
//! the current frame so a caller can be suspended while a callee runs under
//! the global frame, then restored; this is what gives function bodies
//! static (global) scoping rather than dynamic scoping.

use std::collections::HashMap;

#[derive(Debug)]
struct Frame<T> {
    names: HashMap<String, T>,
    parent: Option<usize>,
}

#[derive(Debug)]
pub struct SymbolTable<T> {
    frames: Vec<Frame<T>>,
    current: Option<usize>,
}

impl<T> Default for SymbolTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SymbolTable<T> {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            current: None,
        }
    }

    pub fn push_frame(&mut self) {
        let frame = Frame {
            names: HashMap::new(),
            parent: self.current,
        };
        self.frames.push(frame);
        self.current = Some(self.frames.len() - 1);
    }

    pub fn pop_frame(&mut self) {
        let Some(current) = self.current else {
            panic!("pop_frame on an empty symbol table");
        };
        self.current = self.frames[current].parent;
        // the usual case: the popped frame is the newest one, so its slot
        // can be reclaimed immediately
        if current == self.frames.len() - 1 {
            self.frames.pop();
        }
    }

    /// Handle to the current frame, valid while that frame is alive.
    pub fn environment_id(&self) -> usize {
        self.current.expect("environment_id on an empty symbol table")
    }

    pub fn set_environment_id(&mut self, id: usize) {
        assert!(id < self.frames.len(), "stale environment id {id}");
        self.current = Some(id);
    }

    /// Bind `name` in the current frame, shadowing any outer binding.
    pub fn add(&mut self, name: impl Into<String>, info: T) {
        let current = self.current.expect("add on an empty symbol table");
        self.frames[current].names.insert(name.into(), info);
    }

    /// Innermost-wins lookup across the frame chain.
    pub fn get(&self, name: &str) -> Option<&T> {
        let mut frame = self.current;
        while let Some(id) = frame {
            if let Some(info) = self.frames[id].names.get(name) {
                return Some(info);
            }
            frame = self.frames[id].parent;
        }
        None
    }

    /// Overwrite the nearest existing binding of `name`. Returns false when
    /// no frame in the chain binds it.
    pub fn assign(&mut self, name: &str, info: T) -> bool {
        let mut frame = self.current;
        while let Some(id) = frame {
            if self.frames[id].names.contains_key(name) {
                self.frames[id].names.insert(name.to_string(), info);
                return true;
            }
            frame = self.frames[id].parent;
        }
        false
    }

    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn exists_in_current(&self, name: &str) -> bool {
        self.current
            .map(|id| self.frames[id].names.contains_key(name))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_frames_shadow_outer_bindings() {
        let mut table = SymbolTable::new();
        table.push_frame();
        table.add("x", 1);
        table.push_frame();
        assert_eq!(table.get("x"), Some(&1));
        table.add("x", 2);
        assert_eq!(table.get("x"), Some(&2));
        assert!(table.exists_in_current("x"));
        table.pop_frame();
        assert_eq!(table.get("x"), Some(&1));
    }

    #[test]
    fn assign_updates_nearest_binding() {
        let mut table = SymbolTable::new();
        table.push_frame();
        table.add("x", 1);
        table.push_frame();
        assert!(table.assign("x", 5));
        table.pop_frame();
        assert_eq!(table.get("x"), Some(&5));
        assert!(!table.assign("missing", 0));
    }

    #[test]
    fn exists_in_current_ignores_outer_frames() {
        let mut table = SymbolTable::new();
        table.push_frame();
        table.add("x", 1);
        table.push_frame();
        assert!(table.exists("x"));
        assert!(!table.exists_in_current("x"));
    }

    #[test]
    fn environment_switch_hides_caller_locals() {
        let mut table = SymbolTable::new();
        table.push_frame();
        let global = table.environment_id();
        table.add("g", 10);

        // caller scope with a local
        table.push_frame();
        table.add("local", 20);
        let caller = table.environment_id();

        // callee runs under the global frame only
        table.set_environment_id(global);
        table.push_frame();
        table.add("param", 30);
        assert_eq!(table.get("g"), Some(&10));
        assert_eq!(table.get("param"), Some(&30));
        assert_eq!(table.get("local"), None);
        table.pop_frame();

        table.set_environment_id(caller);
        assert_eq!(table.get("local"), Some(&20));
    }
}
