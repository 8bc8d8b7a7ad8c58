//! IR modules and globals
//!
//! A module owns its functions, global variables and the deduplicated string
//! table. Dropping the module releases every IR object it owns in one
//! operation; cloning the module is a deep copy usable for
//! clone-and-discard experiments.

use crate::function::Function;
use crate::types::Type;
use crate::value::Value;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// A global variable with an optional initializer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub init: Option<Value>,
}

impl Global {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty, init: None }
    }

    pub fn with_init(mut self, init: Value) -> Self {
        self.init = Some(init);
        self
    }
}

/// An IR module: one compiled source unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
    strings: IndexSet<String>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
            strings: IndexSet::new(),
        }
    }

    pub fn add_function(&mut self, func: Function) {
        self.functions.push(func);
    }

    pub fn add_global(&mut self, global: Global) {
        self.globals.push(global);
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Intern a string and return its id. The same content always yields the
    /// same id.
    pub fn intern_string(&mut self, s: &str) -> u32 {
        if let Some(idx) = self.strings.get_index_of(s) {
            return idx as u32;
        }
        let (idx, _) = self.strings.insert_full(s.to_owned());
        idx as u32
    }

    pub fn string(&self, id: u32) -> Option<&str> {
        self.strings.get_index(id as usize).map(String::as_str)
    }

    /// All interned strings in id order.
    pub fn strings(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }

    pub fn string_count(&self) -> usize {
        self.strings.len()
    }
}
