//! `require` and the module searchers behind it.
//!
//! Every module name has at most one cache entry. `Loading` doubles as the
//! cycle guard and `Failed` is sticky: once the first load of a name fails,
//! later `require` calls for it fail with the same generic message without
//! running anything. A name no searcher knows is not cached at all.

use crate::error::LuaError;
use crate::state::LuaState;
use crate::thread::{LuaThread, ThreadStatus};
use crate::value::{LuaValue, TableRef};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

/// Cache entry for one module name.
#[derive(Debug, Clone)]
pub enum ModuleState {
    Loading,
    Loaded(LuaValue),
    Failed,
}

/// Answer of a [`Searcher`].
pub enum Search {
    /// A loader for the module: called with the module name as its only
    /// argument, its first result becomes the module value.
    Found(LuaValue),
    /// Why this searcher could not find the module, appended to the
    /// "not found" message. Conventionally starts with `"\n\t"`.
    Declined(String),
}

/// One strategy for locating modules.
pub trait Searcher: Send + Sync {
    fn name(&self) -> &str;
    fn search(&self, lua: &mut LuaState, module: &str) -> Result<Search, LuaError>;
}

/// Source of module files for the source searcher.
pub trait ResourceFinder: Send + Sync {
    /// Contents of `path`, or `None` if there is no such resource.
    fn find(&self, path: &str) -> Result<Option<Vec<u8>>, LuaError>;
}

/// Host hook producing a native module's loader on demand.
pub type NativeFactory = Arc<dyn Fn(&mut LuaState) -> Result<LuaValue, LuaError> + Send + Sync>;

pub struct Package {
    cache: HashMap<String, ModuleState>,
    searchers: Vec<Arc<dyn Searcher>>,
    pub(crate) preload: TableRef,
    natives: HashMap<String, NativeFactory>,
}

impl Package {
    pub(crate) fn new() -> Self {
        Self {
            cache: HashMap::new(),
            searchers: vec![Arc::new(PreloadSearcher), Arc::new(NativeSearcher)],
            preload: TableRef::default(),
            natives: HashMap::new(),
        }
    }

    /// Append a searcher; it is consulted after the existing ones.
    pub fn add_searcher(&mut self, searcher: impl Searcher + 'static) {
        self.searchers.push(Arc::new(searcher));
    }

    /// Enable loading modules from `finder`, right after `package.preload`.
    pub fn set_resource_finder(&mut self, finder: impl ResourceFinder + 'static) {
        self.searchers.retain(|s| s.name() != SourceSearcher::NAME);
        let at = self.searchers.len().min(1);
        self.searchers.insert(at, Arc::new(SourceSearcher { finder: Box::new(finder) }));
    }

    /// Register a native module. `factory` runs on the first `require` and
    /// must produce the module's loader.
    pub fn register_native<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&mut LuaState) -> Result<LuaValue, LuaError> + Send + Sync + 'static,
    {
        self.natives.insert(name.to_owned(), Arc::new(factory));
    }

    /// The `package.preload` table.
    pub fn preload(&self) -> TableRef {
        self.preload.clone()
    }

    pub fn state(&self, name: &str) -> Option<&ModuleState> {
        self.cache.get(name)
    }

    /// Drop the cache entry for `name` so the next `require` loads it again.
    pub fn forget(&mut self, name: &str) -> Option<ModuleState> {
        self.cache.remove(name)
    }
}

enum Attempt {
    Loaded(LuaValue),
    NotFound(String),
}

/// Scheduler state captured before running a loader, restored if the loader
/// panics.
struct SavePoint {
    current: LuaThread,
    resumers: usize,
    native_depth: usize,
    depth: usize,
}

impl LuaState {
    /// Load module `name` once and return its cached value.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn require(&mut self, name: &str) -> Result<LuaValue, LuaError> {
        match self.package.cache.get(name) {
            Some(ModuleState::Loaded(value)) => return Ok(value.clone()),
            Some(ModuleState::Loading | ModuleState::Failed) => {
                return Err(LuaError::ModuleLoop { name: name.to_owned() })
            }
            None => {}
        }
        self.package.cache.insert(name.to_owned(), ModuleState::Loading);

        let save = self.save_point();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.load_module(name)));
        let cache = &mut self.package.cache;
        match outcome {
            Ok(Ok(Attempt::Loaded(value))) => {
                cache.insert(name.to_owned(), ModuleState::Loaded(value.clone()));
                tracing::debug!("module loaded");
                Ok(value)
            }
            Ok(Ok(Attempt::NotFound(tried))) => {
                cache.remove(name);
                Err(LuaError::ModuleNotFound {
                    name: name.to_owned(),
                    tried,
                })
            }
            Ok(Err(e)) => {
                cache.insert(name.to_owned(), ModuleState::Failed);
                tracing::debug!(error = %e, "module failed to load");
                Err(e)
            }
            Err(payload) => {
                cache.insert(name.to_owned(), ModuleState::Failed);
                self.restore(save);
                tracing::debug!("module loader panicked");
                panic::resume_unwind(payload)
            }
        }
    }

    fn load_module(&mut self, name: &str) -> Result<Attempt, LuaError> {
        let searchers = self.package.searchers.clone();
        let mut tried = String::new();
        let mut found = None;
        for searcher in searchers {
            match searcher.search(self, name)? {
                Search::Found(loader) => {
                    tracing::trace!(searcher = searcher.name(), "module located");
                    found = Some(loader);
                    break;
                }
                Search::Declined(reason) => tried.push_str(&reason),
            }
        }
        let Some(loader) = found else {
            return Ok(Attempt::NotFound(tried));
        };
        if !self.is_callable(&loader) {
            return Err(LuaError::ModuleShape {
                name: name.to_owned(),
                got: loader.type_name(),
            });
        }
        let value = self
            .call(&loader, vec![name.into()])?
            .into_iter()
            .next()
            .unwrap_or_default();
        Ok(Attempt::Loaded(if value.is_nil() { true.into() } else { value }))
    }

    fn save_point(&mut self) -> SavePoint {
        let current = self.current.clone();
        let depth = self.stack(current.slot()).frames.len();
        SavePoint {
            current,
            resumers: self.resumers.len(),
            native_depth: self.native_depth,
            depth,
        }
    }

    /// Put the scheduler back where it was at `save`. Coroutines resumed
    /// since then are left dead.
    fn restore(&mut self, save: SavePoint) {
        let mut abandoned = self.resumers.split_off(save.resumers);
        abandoned.push(self.current.clone());
        for thread in abandoned.into_iter().filter(|t| *t != save.current) {
            thread.set_status(ThreadStatus::Dead);
            self.stack(thread.slot()).reset();
        }
        save.current.set_status(ThreadStatus::Running);
        self.stack(save.current.slot()).unwind_to(save.depth);
        self.current = save.current;
        self.native_depth = save.native_depth;
    }
}

// ── Searchers ─────────────────────────────────────────────────────────────────

struct PreloadSearcher;

impl Searcher for PreloadSearcher {
    fn name(&self) -> &str {
        "preload"
    }

    fn search(&self, lua: &mut LuaState, module: &str) -> Result<Search, LuaError> {
        let loader = lua.package.preload.read().get_str(module);
        Ok(if loader.is_nil() {
            Search::Declined(format!("\n\tno field package.preload['{module}']"))
        } else {
            Search::Found(loader)
        })
    }
}

/// Loads source or binary chunks located through `package_path`.
struct SourceSearcher {
    finder: Box<dyn ResourceFinder>,
}

impl SourceSearcher {
    const NAME: &'static str = "source";
}

impl Searcher for SourceSearcher {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn search(&self, lua: &mut LuaState, module: &str) -> Result<Search, LuaError> {
        let file = module.replace('.', "/");
        let mut tried = String::new();
        let templates = lua.config().package_path.clone();
        for template in templates.split(';').filter(|t| !t.is_empty()) {
            let path = template.replace('?', &file);
            if let Some(bytes) = self.finder.find(&path)? {
                let chunk = lua.load(&bytes, &format!("@{path}"))?;
                return Ok(Search::Found(chunk));
            }
            tried.push_str(&format!("\n\tno file '{path}'"));
        }
        Ok(Search::Declined(tried))
    }
}

struct NativeSearcher;

impl Searcher for NativeSearcher {
    fn name(&self) -> &str {
        "native"
    }

    fn search(&self, lua: &mut LuaState, module: &str) -> Result<Search, LuaError> {
        let Some(factory) = lua.package.natives.get(module).cloned() else {
            return Ok(Search::Declined(format!("\n\tno native module '{module}'")));
        };
        factory(lua).map(Search::Found)
    }
}

// ── Resource finders ──────────────────────────────────────────────────────────

/// Reads module files relative to a root directory.
pub struct FileResourceFinder {
    root: PathBuf,
}

impl FileResourceFinder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceFinder for FileResourceFinder {
    fn find(&self, path: &str) -> Result<Option<Vec<u8>>, LuaError> {
        match std::fs::read(self.root.join(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("cannot read module file '{path}'"))
                .into()),
        }
    }
}

/// In-memory module files, keyed by path.
#[derive(Default)]
pub struct MemoryResources {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.to_owned(), contents.into());
        self
    }
}

impl ResourceFinder for MemoryResources {
    fn find(&self, path: &str) -> Result<Option<Vec<u8>>, LuaError> {
        Ok(self.files.get(path).cloned())
    }
}
