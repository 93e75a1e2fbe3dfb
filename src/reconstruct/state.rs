//! # Declaration-group state
//!
//! A recursive-descent unparser threads control-flow context (the
//! reference's parallel `if`/loop/switch stacks, spec §3.4) through Rust's
//! own call stack instead of separate owned vectors — each construct's
//! consumer function recurses into its body and returns once its
//! terminating template is found. Expression reduction is likewise local
//! to each `consume_expr` call (spec §4.5.2). The one piece of state that
//! still spans several instructions with no natural recursive caller is
//! the pending declaration-group buffer (spec §4.5.1, §4.5.5): a block's
//! statement loop owns one of these for its own scope.

#[derive(Debug, Clone, Default)]
pub struct DeclGroup {
    pub names: Vec<String>,
    pub is_local: bool,
}

impl DeclGroup {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Tracks, per declared local name, whether an initializing assignment
/// has definitely been seen (spec §3.4). Not load-bearing for rendering
/// today (the parser only ever emits an inline initializer immediately
/// after its `decl`), kept so a future multi-statement-later initializer
/// quirk has somewhere to record state without a signature change.
#[derive(Debug, Clone, Default)]
pub struct LocalInitTracker {
    initialized: std::collections::HashSet<String>,
}

impl LocalInitTracker {
    pub fn mark_initialized(&mut self, name: &str) {
        self.initialized.insert(name.to_string());
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.initialized.contains(name)
    }
}
