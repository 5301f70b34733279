//! Test harness for engine operations.
//!
//! Wraps an [`Engine`] with A1-notation helpers and a consistency check
//! that compares live propagation against a from-scratch rebuild of the
//! same grid. Test builds only.

use crate::cell_ref::CellRef;
use crate::engine::Engine;

pub struct EngineHarness {
    engine: Engine,
}

impl EngineHarness {
    /// Create a harness with a fresh engine.
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Set a cell by A1 address. Returns false when the edit was rejected
    /// as a circular reference.
    pub fn set(&mut self, at: &str, text: &str) -> bool {
        self.engine.set_cell_content(Self::r(at), text).is_ok()
    }

    pub fn display(&self, at: &str) -> String {
        self.engine.get_display_value(Self::r(at))
    }

    pub fn raw(&self, at: &str) -> String {
        self.engine.get_cell_text(Self::r(at))
    }

    /// Rebuild a fresh engine from the same raw contents and assert every
    /// occupied cell displays the same value: live propagation must agree
    /// with a full from-scratch recompute.
    pub fn assert_matches_full_recompute(&self) {
        let fresh = Engine::from_sheet(self.engine.sheet().clone());

        for (&at, _) in self.engine.sheet().cells_iter() {
            assert_eq!(
                self.engine.get_display_value(at),
                fresh.get_display_value(at),
                "cell {} diverged from full recompute",
                at
            );
        }
    }

    fn r(at: &str) -> CellRef {
        CellRef::parse(at).unwrap_or_else(|| panic!("bad cell address in test: {}", at))
    }
}

impl Default for EngineHarness {
    fn default() -> Self {
        Self::new()
    }
}
