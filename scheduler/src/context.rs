//! Multiplexing of independent simulation contexts.
//!
//! Each context is one loaded program with its own breakpoints and
//! output buffers.  Several contexts can be enabled (and stepped) at
//! once, but only one is *active*, i.e. displayed; the others keep
//! accumulating output silently and can be switched to without
//! losing anything.

use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use tracing::{event, Level};

use base::prelude::*;

/// Per-context state that survives while the context is not
/// displayed.  Cleared only on explicit disable or a full reset.
#[derive(Debug)]
pub struct SimulationContext {
    id: ContextId,
    enabled: bool,
    breakpoints: BTreeSet<Address>,
    stdout: String,
    stderr: String,
}

impl SimulationContext {
    fn new(id: ContextId, enabled: bool) -> SimulationContext {
        SimulationContext {
            id,
            enabled,
            breakpoints: BTreeSet::new(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn breakpoints(&self) -> &BTreeSet<Address> {
        &self.breakpoints
    }

    #[must_use]
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    fn clear_retained_state(&mut self) {
        self.breakpoints.clear();
        self.stdout.clear();
        self.stderr.clear();
    }
}

/// A context operation referred to a context that cannot take part.
#[derive(Debug, PartialEq, Eq)]
pub enum ContextError {
    Unknown(ContextId),
    NotEnabled(ContextId),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ContextError::Unknown(id) => write!(f, "{id} does not exist"),
            ContextError::NotEnabled(id) => write!(f, "{id} is not enabled"),
        }
    }
}

impl Error for ContextError {}

/// What an enable/disable did to the active context, so the caller
/// knows which views (if any) need rehydrating.
#[derive(Debug, PartialEq, Eq)]
pub enum ActiveChange {
    /// The active context is unchanged.
    Unchanged,
    /// A different (or first) context became active.
    NewlyActive(ContextId),
    /// The enabled set became empty; nothing is displayable.
    Cleared,
}

/// Owns the contexts and the active-context selection policy.
#[derive(Debug)]
pub struct ContextCoordinator {
    contexts: Vec<SimulationContext>,
    active: Option<ContextId>,
}

impl ContextCoordinator {
    /// Creates `count` contexts, all enabled, with context 0 active.
    #[must_use]
    pub fn new(count: usize) -> ContextCoordinator {
        let contexts = (0..count)
            .map(|i| SimulationContext::new(ContextId::new(i as u32), true))
            .collect();
        ContextCoordinator {
            contexts,
            active: if count > 0 {
                Some(ContextId::new(0))
            } else {
                None
            },
        }
    }

    #[must_use]
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// The displayed context, a member of the enabled set (or `None`
    /// if that set is empty).
    #[must_use]
    pub fn active(&self) -> Option<ContextId> {
        self.active
    }

    #[must_use]
    pub fn context(&self, id: ContextId) -> Option<&SimulationContext> {
        self.contexts.get(id.index())
    }

    fn context_mut(&mut self, id: ContextId) -> Result<&mut SimulationContext, ContextError> {
        self.contexts
            .get_mut(id.index())
            .ok_or(ContextError::Unknown(id))
    }

    /// The enabled contexts, lowest index first.
    #[must_use]
    pub fn enabled_ids(&self) -> Vec<ContextId> {
        self.contexts
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.id)
            .collect()
    }

    /// Makes `id` the displayed context.  Only enabled contexts are
    /// selectable.
    pub fn switch_to(&mut self, id: ContextId) -> Result<(), ContextError> {
        let ctx = self.context(id).ok_or(ContextError::Unknown(id))?;
        if !ctx.enabled {
            return Err(ContextError::NotEnabled(id));
        }
        event!(Level::DEBUG, "switching active context to {id}");
        self.active = Some(id);
        Ok(())
    }

    /// Adds or removes a context from the rotation.
    ///
    /// Disabling clears the context's retained state (buffers and
    /// breakpoints); disabling the active context promotes the
    /// lowest-index remaining enabled context, or clears the active
    /// selection entirely.  Enabling the only enabled context makes
    /// it active.
    pub fn set_enabled(
        &mut self,
        id: ContextId,
        enabled: bool,
    ) -> Result<ActiveChange, ContextError> {
        let ctx = self.context_mut(id)?;
        if ctx.enabled == enabled {
            return Ok(ActiveChange::Unchanged);
        }
        ctx.enabled = enabled;
        if enabled {
            event!(Level::INFO, "{id} enabled");
            if self.active.is_none() {
                self.active = Some(id);
                return Ok(ActiveChange::NewlyActive(id));
            }
            return Ok(ActiveChange::Unchanged);
        }
        ctx.clear_retained_state();
        event!(Level::INFO, "{id} disabled, retained state cleared");
        if self.active == Some(id) {
            match self.enabled_ids().first() {
                Some(&next) => {
                    self.active = Some(next);
                    Ok(ActiveChange::NewlyActive(next))
                }
                None => {
                    self.active = None;
                    Ok(ActiveChange::Cleared)
                }
            }
        } else {
            Ok(ActiveChange::Unchanged)
        }
    }

    /// Appends an engine output chunk to its context's buffer.
    /// Output for every enabled context is retained, displayed or
    /// not; output for a disabled context is dropped (the engine
    /// raced a disable).
    pub fn append_output(&mut self, chunk: &OutputChunk) {
        match self.contexts.get_mut(chunk.context.index()) {
            Some(ctx) if ctx.enabled => match chunk.stream {
                OutputStream::Stdout => ctx.stdout.push_str(&chunk.text),
                OutputStream::Stderr => ctx.stderr.push_str(&chunk.text),
            },
            Some(_) => {
                event!(
                    Level::TRACE,
                    "dropping {} output for disabled {}",
                    chunk.stream,
                    chunk.context
                );
            }
            None => {
                event!(
                    Level::WARN,
                    "engine produced output for nonexistent {}",
                    chunk.context
                );
            }
        }
    }

    /// Empties the output buffers of every context (init/reset).
    pub fn clear_all_output(&mut self) {
        for ctx in &mut self.contexts {
            ctx.stdout.clear();
            ctx.stderr.clear();
        }
    }

    /// Records a breakpoint the engine accepted.
    pub fn record_breakpoint(&mut self, id: ContextId, address: Address) -> Result<(), ContextError> {
        self.context_mut(id)?.breakpoints.insert(address);
        Ok(())
    }

    /// Forgets a breakpoint the engine removed.
    pub fn forget_breakpoint(&mut self, id: ContextId, address: Address) -> Result<(), ContextError> {
        self.context_mut(id)?.breakpoints.remove(&address);
        Ok(())
    }

    /// Drops every recorded breakpoint in every context (full reset).
    pub fn clear_all_breakpoints(&mut self) {
        for ctx in &mut self.contexts {
            ctx.breakpoints.clear();
        }
    }
}
