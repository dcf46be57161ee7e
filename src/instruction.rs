//! # Instructions
//!
//! An instruction is a canonical work order: an action plus the params,
//! context, and run options it should be executed with. Callers rarely
//! build them by hand; normalization accepts the shorthand shapes
//! (action alone, action + params, and so on) and produces the canonical
//! form. Instructions are immutable once built.

use serde_json::Value;
use uuid::Uuid;

use crate::action::ActionRef;
use crate::error::ExecError;
use crate::exec::RunOptions;
use crate::params::{self, Params};

// ============================================================================
// INSTRUCTION
// ============================================================================

/// Canonical work order.
#[derive(Clone)]
pub struct Instruction {
    pub id: Uuid,
    pub action: ActionRef,
    pub params: Params,
    pub context: Params,
    pub opts: RunOptions,
}

impl Instruction {
    /// Build a canonical instruction. `params` and `context` accept a map
    /// or a key-value pair list.
    pub fn new(
        action: ActionRef,
        params: Value,
        context: Value,
        opts: RunOptions,
    ) -> Result<Self, ExecError> {
        Ok(Self {
            id: Uuid::new_v4(),
            action,
            params: params::normalize(params)?,
            context: params::normalize(context)?,
            opts,
        })
    }

    /// Instruction with empty params, empty context, default options.
    pub fn of(action: ActionRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            params: Params::new(),
            context: Params::new(),
            opts: RunOptions::default(),
        }
    }

    pub fn action_name(&self) -> &str {
        self.action.name()
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instruction")
            .field("id", &self.id)
            .field("action", &self.action.name())
            .field("params", &self.params)
            .field("context", &self.context)
            .finish()
    }
}

// ============================================================================
// SHORTHAND SHAPES
// ============================================================================

/// The shapes `normalize` accepts.
#[derive(Clone)]
pub enum InstructionInput {
    /// Bare action; empty params and context
    Action(ActionRef),
    /// Action plus params
    WithParams(ActionRef, Value),
    /// Action, params, and context
    WithContext(ActionRef, Value, Value),
    /// Action, params, context, and options
    Full(ActionRef, Value, Value, RunOptions),
    /// Already canonical
    Built(Instruction),
}

impl From<ActionRef> for InstructionInput {
    fn from(action: ActionRef) -> Self {
        InstructionInput::Action(action)
    }
}

impl From<(ActionRef, Value)> for InstructionInput {
    fn from((action, params): (ActionRef, Value)) -> Self {
        InstructionInput::WithParams(action, params)
    }
}

impl From<(ActionRef, Value, Value)> for InstructionInput {
    fn from((action, params, context): (ActionRef, Value, Value)) -> Self {
        InstructionInput::WithContext(action, params, context)
    }
}

impl From<(ActionRef, Value, Value, RunOptions)> for InstructionInput {
    fn from(
        (action, params, context, opts): (ActionRef, Value, Value, RunOptions),
    ) -> Self {
        InstructionInput::Full(action, params, context, opts)
    }
}

impl From<Instruction> for InstructionInput {
    fn from(instruction: Instruction) -> Self {
        InstructionInput::Built(instruction)
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Normalize one shorthand into a canonical instruction.
///
/// Merge rules: the shared context overrides item context keys; item
/// options take precedence over shared options. Normalizing an
/// already-built instruction merges once and is idempotent.
pub fn normalize_single(
    input: InstructionInput,
    shared_context: &Params,
    shared_opts: &RunOptions,
) -> Result<Instruction, ExecError> {
    let (action, item_params, item_context, item_opts, id) = match input {
        InstructionInput::Action(action) => (action, Params::new(), Params::new(), None, None),
        InstructionInput::WithParams(action, p) => {
            (action, params::normalize(p)?, Params::new(), None, None)
        }
        InstructionInput::WithContext(action, p, c) => (
            action,
            params::normalize(p)?,
            params::normalize(c)?,
            None,
            None,
        ),
        InstructionInput::Full(action, p, c, opts) => (
            action,
            params::normalize(p)?,
            params::normalize(c)?,
            Some(opts),
            None,
        ),
        InstructionInput::Built(instruction) => (
            instruction.action,
            instruction.params,
            instruction.context,
            Some(instruction.opts),
            Some(instruction.id),
        ),
    };

    let context = params::merged(&item_context, shared_context);
    let opts = match item_opts {
        Some(item) => item.merged_over(shared_opts),
        None => shared_opts.clone(),
    };

    Ok(Instruction {
        id: id.unwrap_or_else(Uuid::new_v4),
        action,
        params: item_params,
        context,
        opts,
    })
}

/// Normalize one or many shorthands into a list. The typed input makes a
/// nested list unrepresentable; a flat list is the only list shape.
pub fn normalize(
    inputs: Vec<InstructionInput>,
    shared_context: &Params,
    shared_opts: &RunOptions,
) -> Result<Vec<Instruction>, ExecError> {
    inputs
        .into_iter()
        .map(|input| normalize_single(input, shared_context, shared_opts))
        .collect()
}

/// Every instruction's action must appear in `allowed`; the error lists
/// the unregistered names.
pub fn validate_allowed_actions(
    instructions: &[Instruction],
    allowed: &[&str],
) -> Result<(), ExecError> {
    let unregistered: Vec<String> = instructions
        .iter()
        .map(|i| i.action_name())
        .filter(|name| !allowed.contains(name))
        .map(String::from)
        .collect();

    if unregistered.is_empty() {
        Ok(())
    } else {
        Err(
            ExecError::config(format!("unregistered actions: {}", unregistered.join(", ")))
                .with_detail("unregistered", unregistered),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionOutput, ActionResult};
    use crate::context::RunContext;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Named(&'static str);

    #[async_trait]
    impl Action for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, params: Params, _context: &RunContext) -> ActionResult {
            Ok(ActionOutput::new(params))
        }
    }

    fn action(name: &'static str) -> ActionRef {
        Arc::new(Named(name))
    }

    #[test]
    fn bare_action_normalizes_empty() {
        let ins =
            normalize_single(action("solo").into(), &Params::new(), &RunOptions::new()).unwrap();
        assert_eq!(ins.action_name(), "solo");
        assert!(ins.params.is_empty());
        assert!(ins.context.is_empty());
    }

    #[test]
    fn with_params_shape() {
        let input: InstructionInput = (action("a"), json!({"value": 1})).into();
        let ins = normalize_single(input, &Params::new(), &RunOptions::new()).unwrap();
        assert_eq!(ins.params["value"], json!(1));
    }

    #[test]
    fn shared_context_overrides_item_context() {
        let input: InstructionInput =
            (action("a"), json!({}), json!({"env": "item", "keep": 1})).into();
        let shared = params::normalize(json!({"env": "shared"})).unwrap();
        let ins = normalize_single(input, &shared, &RunOptions::new()).unwrap();
        assert_eq!(ins.context["env"], json!("shared"));
        assert_eq!(ins.context["keep"], json!(1));
    }

    #[test]
    fn item_opts_take_precedence() {
        let item_opts = RunOptions::new().with_timeout_ms(50);
        let input: InstructionInput = (action("a"), json!({}), json!({}), item_opts).into();
        let shared = RunOptions::new().with_timeout_ms(5_000).with_max_retries(3);
        let ins = normalize_single(input, &Params::new(), &shared).unwrap();
        assert_eq!(ins.opts.timeout_ms(), Some(50));
        assert_eq!(ins.opts.max_retries, Some(3));
    }

    #[test]
    fn normalize_single_is_idempotent() {
        let shared = params::normalize(json!({"env": "shared"})).unwrap();
        let opts = RunOptions::new().with_max_retries(2);
        let input: InstructionInput = (action("a"), json!({"v": 1}), json!({"k": 2})).into();
        let once = normalize_single(input, &shared, &opts).unwrap();
        let twice = normalize_single(once.clone().into(), &shared, &opts).unwrap();
        assert_eq!(once.id, twice.id);
        assert_eq!(once.params, twice.params);
        assert_eq!(once.context, twice.context);
        assert_eq!(once.opts.max_retries, twice.opts.max_retries);
    }

    #[test]
    fn normalize_list_preserves_order() {
        let list = normalize(
            vec![action("first").into(), action("second").into()],
            &Params::new(),
            &RunOptions::new(),
        )
        .unwrap();
        assert_eq!(list[0].action_name(), "first");
        assert_eq!(list[1].action_name(), "second");
    }

    #[test]
    fn bad_params_shape_fails_normalization() {
        let input: InstructionInput = (action("a"), json!("not a map")).into();
        let err = normalize_single(input, &Params::new(), &RunOptions::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn allowed_actions_pass() {
        let list = normalize(
            vec![action("alpha").into(), action("beta").into()],
            &Params::new(),
            &RunOptions::new(),
        )
        .unwrap();
        assert!(validate_allowed_actions(&list, &["alpha", "beta", "gamma"]).is_ok());
    }

    #[test]
    fn unregistered_actions_listed() {
        let list = normalize(
            vec![action("alpha").into(), action("rogue").into()],
            &Params::new(),
            &RunOptions::new(),
        )
        .unwrap();
        let err = validate_allowed_actions(&list, &["alpha"]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        assert_eq!(err.details()["unregistered"], json!(["rogue"]));
    }
}
