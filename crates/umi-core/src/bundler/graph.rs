//! Module dependency graph.

use super::scan::Import;
use rustc_hash::FxHashMap as HashMap;

/// Unique identifier for a module in the graph.
pub type ModuleId = usize;

/// Where an import specifier points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// A module bundled into the output.
    Internal(ModuleId),
    /// Left to the runtime `require`, under this request string.
    External(String),
}

/// A module in the graph.
#[derive(Debug, Clone)]
pub struct Module {
    /// Module id: an absolute path or a plugin-provided virtual id.
    pub path: String,
    /// Transpiled, transformed JavaScript.
    pub code: String,
    /// Imports found in `code`.
    pub imports: Vec<Import>,
    /// Specifier → resolved dependency.
    pub dependencies: HashMap<String, Dependency>,
}

/// The module dependency graph. Ids follow discovery order, so id 0 is the entry.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    path_to_id: HashMap<String, ModuleId>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for `path` before the module is loaded, so cycles
    /// resolve to the same id. Returns the existing id if already known.
    pub fn reserve(&mut self, path: &str) -> (ModuleId, bool) {
        if let Some(&id) = self.path_to_id.get(path) {
            return (id, false);
        }
        let id = self.modules.len();
        self.path_to_id.insert(path.to_string(), id);
        self.modules.push(Module {
            path: path.to_string(),
            code: String::new(),
            imports: Vec::new(),
            dependencies: HashMap::default(),
        });
        (id, true)
    }

    /// Fill in a reserved module.
    pub fn set(&mut self, id: ModuleId, module: Module) {
        if let Some(slot) = self.modules.get_mut(id) {
            *slot = module;
        }
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    /// Resolve a specifier used inside module `from`.
    #[must_use]
    pub fn dependency(&self, from: ModuleId, specifier: &str) -> Option<&Dependency> {
        self.modules.get(from)?.dependencies.get(specifier)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules.iter().enumerate()
    }

    /// External requests in first-use order, deduplicated.
    #[must_use]
    pub fn externals(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for module in &self.modules {
            for import in &module.imports {
                if let Some(Dependency::External(request)) = module.dependencies.get(&import.specifier) {
                    if !out.contains(request) {
                        out.push(request.clone());
                    }
                }
            }
        }
        out
    }
}
