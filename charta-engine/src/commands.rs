//! Command stack with a reentrant silent mode.
//!
//! Commands execute through named handlers. A normal execution records a
//! history entry (for undo) and notifies `changed` listeners; a silent
//! execution does neither. Silent spans nest: the flag is saved on entry
//! and restored on every exit path, including the error path, so an inner
//! span never re-enables events for an outer one.

use charta_model::ModelStore;
use serde_json::Value;
use std::collections::HashMap;

/// Payload handed to a command handler.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub element_id: Option<String>,
    pub payload: Value,
}

impl CommandContext {
    pub fn new(element_id: impl Into<String>, payload: Value) -> Self {
        Self {
            element_id: Some(element_id.into()),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    UnknownCommand(String),
    Failed(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCommand(name) => write!(f, "no handler registered for: {name}"),
            Self::Failed(reason) => write!(f, "command failed: {reason}"),
        }
    }
}

impl std::error::Error for CommandError {}

/// Notification emitted after a non-silent execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStackEvent {
    pub command: String,
    pub element_id: Option<String>,
}

/// One applied command, retained for undo.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub command: String,
    pub element_id: Option<String>,
}

type CommandHandler =
    Box<dyn FnMut(&mut ModelStore, &CommandContext) -> Result<Value, CommandError> + Send>;
type ChangedListener = Box<dyn FnMut(&CommandStackEvent) + Send>;

/// The command executor.
#[derive(Default)]
pub struct CommandStack {
    handlers: HashMap<String, CommandHandler>,
    history: Vec<HistoryEntry>,
    listeners: Vec<ChangedListener>,
    silent: bool,
}

impl CommandStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named command handler.
    pub fn register_handler<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: FnMut(&mut ModelStore, &CommandContext) -> Result<Value, CommandError> + Send + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// Subscribe to `commandStack.changed` notifications.
    pub fn on_changed<F>(&mut self, listener: F)
    where
        F: FnMut(&CommandStackEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn set_silent_mode(&mut self, silent: bool) {
        self.silent = silent;
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Execute a command. On success, records history and notifies
    /// listeners unless silent mode is active.
    pub fn execute(
        &mut self,
        model: &mut ModelStore,
        name: &str,
        ctx: &CommandContext,
    ) -> Result<Value, CommandError> {
        let handler = self
            .handlers
            .get_mut(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        let value = handler(model, ctx)?;
        if !self.silent {
            self.history.push(HistoryEntry {
                command: name.to_string(),
                element_id: ctx.element_id.clone(),
            });
            let event = CommandStackEvent {
                command: name.to_string(),
                element_id: ctx.element_id.clone(),
            };
            for listener in &mut self.listeners {
                listener(&event);
            }
        }
        Ok(value)
    }

    /// Execute one command under a silent span. The prior silent flag is
    /// restored on both the success and the failure path.
    pub fn execute_silently(
        &mut self,
        model: &mut ModelStore,
        name: &str,
        ctx: &CommandContext,
    ) -> Result<Value, CommandError> {
        let prev = self.silent;
        self.silent = true;
        let result = self.execute(model, name, ctx);
        self.silent = prev;
        result
    }

    /// Execute a sequence under a single silent span. The first failure
    /// aborts the remainder and propagates after the flag is restored.
    pub fn execute_batch_silently(
        &mut self,
        model: &mut ModelStore,
        commands: &[(String, CommandContext)],
    ) -> Result<Vec<Value>, CommandError> {
        let prev = self.silent;
        self.silent = true;
        let mut results = Vec::with_capacity(commands.len());
        let mut failure = None;
        for (name, ctx) in commands {
            match self.execute(model, name, ctx) {
                Ok(value) => results.push(value),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.silent = prev;
        match failure {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charta_model::Element;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn stack_with_handlers() -> CommandStack {
        let mut stack = CommandStack::new();
        stack.register_handler("shape.create", |model, ctx| {
            let id = ctx.element_id.clone().unwrap_or_default();
            model
                .insert_shape(Element::shape(&id, "Task"))
                .map_err(|e| CommandError::Failed(e.to_string()))?;
            Ok(json!({"id": id}))
        });
        stack.register_handler("always.fails", |_, _| {
            Err(CommandError::Failed("boom".into()))
        });
        stack
    }

    fn changed_counter(stack: &mut CommandStack) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        let observer = counter.clone();
        stack.on_changed(move |_| {
            observer.fetch_add(1, Ordering::SeqCst);
        });
        counter
    }

    #[test]
    fn test_execute_records_history_and_notifies() {
        let mut stack = stack_with_handlers();
        let mut model = ModelStore::new();
        let fired = changed_counter(&mut stack);

        let ctx = CommandContext::new("t1", Value::Null);
        let result = stack.execute(&mut model, "shape.create", &ctx).unwrap();
        assert_eq!(result, json!({"id": "t1"}));
        assert_eq!(stack.history_len(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(model.contains("t1"));
    }

    #[test]
    fn test_unknown_command() {
        let mut stack = CommandStack::new();
        let mut model = ModelStore::new();
        let err = stack
            .execute(&mut model, "nope", &CommandContext::default())
            .unwrap_err();
        assert_eq!(err, CommandError::UnknownCommand("nope".into()));
    }

    #[test]
    fn test_silent_execution_is_silent() {
        let mut stack = stack_with_handlers();
        let mut model = ModelStore::new();
        let fired = changed_counter(&mut stack);

        let ctx = CommandContext::new("t1", Value::Null);
        stack
            .execute_silently(&mut model, "shape.create", &ctx)
            .unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(stack.history_len(), 0);
        assert!(model.contains("t1"));
        assert!(!stack.is_silent());
    }

    #[test]
    fn test_silent_flag_restored_on_failure() {
        let mut stack = stack_with_handlers();
        let mut model = ModelStore::new();

        let err = stack
            .execute_silently(&mut model, "always.fails", &CommandContext::default())
            .unwrap_err();
        assert_eq!(err, CommandError::Failed("boom".into()));
        assert!(!stack.is_silent());
    }

    #[test]
    fn test_nested_silent_preserves_outer_flag() {
        let mut stack = stack_with_handlers();
        let mut model = ModelStore::new();
        let fired = changed_counter(&mut stack);

        // Outer span set via the public toggle, inner via execute_silently:
        // the inner restore must not re-enable events for the outer span.
        stack.set_silent_mode(true);
        let err = stack
            .execute_silently(&mut model, "always.fails", &CommandContext::default())
            .unwrap_err();
        assert_eq!(err, CommandError::Failed("boom".into()));
        assert!(stack.is_silent());

        let ctx = CommandContext::new("t1", Value::Null);
        stack.execute(&mut model, "shape.create", &ctx).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(stack.history_len(), 0);

        stack.set_silent_mode(false);
        assert!(!stack.is_silent());
    }

    #[test]
    fn test_batch_silently_returns_results() {
        let mut stack = stack_with_handlers();
        let mut model = ModelStore::new();
        let fired = changed_counter(&mut stack);

        let commands = vec![
            ("shape.create".to_string(), CommandContext::new("a", Value::Null)),
            ("shape.create".to_string(), CommandContext::new("b", Value::Null)),
        ];
        let results = stack
            .execute_batch_silently(&mut model, &commands)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!stack.is_silent());
        assert!(model.contains("a") && model.contains("b"));
    }

    #[test]
    fn test_batch_silently_propagates_first_failure_after_restore() {
        let mut stack = stack_with_handlers();
        let mut model = ModelStore::new();

        let commands = vec![
            ("shape.create".to_string(), CommandContext::new("a", Value::Null)),
            ("always.fails".to_string(), CommandContext::default()),
            ("shape.create".to_string(), CommandContext::new("c", Value::Null)),
        ];
        let err = stack
            .execute_batch_silently(&mut model, &commands)
            .unwrap_err();
        assert_eq!(err, CommandError::Failed("boom".into()));
        assert!(!stack.is_silent());
        // The failure aborted the remainder.
        assert!(model.contains("a"));
        assert!(!model.contains("c"));
    }

    #[test]
    fn test_handler_can_reenter_stack_state() {
        // Handlers observe the model only; the silent flag governs the
        // stack itself and survives handler mutation of the model.
        let mut stack = stack_with_handlers();
        let mut model = ModelStore::new();
        stack.set_silent_mode(true);
        stack
            .execute(&mut model, "shape.create", &CommandContext::new("x", Value::Null))
            .unwrap();
        assert_eq!(stack.history_len(), 0);
        assert!(stack.is_silent());
    }
}
