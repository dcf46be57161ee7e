//! # Plans
//!
//! A plan is a DAG of named instructions: each step declares the steps it
//! depends on, and `execution_phases` layers the graph into waves:
//! every step in a wave may run concurrently once the previous waves are
//! done. Cycles and dangling dependencies are rejected at normalization.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use uuid::Uuid;

use crate::error::ExecError;
use crate::exec::RunOptions;
use crate::instruction::{self, Instruction, InstructionInput};
use crate::params::{self, Params};

// ============================================================================
// PLAN STEP
// ============================================================================

/// One named node: an instruction plus its dependencies.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub name: String,
    pub instruction: Instruction,
    pub depends_on: Vec<String>,
    pub opts: RunOptions,
}

// ============================================================================
// PLAN
// ============================================================================

/// DAG of instructions. Steps keep insertion order for deterministic
/// iteration; the dependency graph decides execution order.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: Uuid,
    steps: HashMap<String, PlanStep>,
    order: Vec<String>,
    context: Params,
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

impl Plan {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            steps: HashMap::new(),
            order: Vec::new(),
            context: Params::new(),
        }
    }

    pub fn with_context(mut self, context: Value) -> Result<Self, ExecError> {
        self.context = params::normalize(context)?;
        Ok(self)
    }

    pub fn context(&self) -> &Params {
        &self.context
    }

    /// Add a named step. The input accepts the instruction shorthands
    /// (bare action, action + params, full tuples, built instruction).
    /// Duplicate names are a validation error.
    pub fn add(
        mut self,
        name: impl Into<String>,
        input: impl Into<InstructionInput>,
        depends_on: Vec<String>,
    ) -> Result<Self, ExecError> {
        let name = name.into();
        if self.steps.contains_key(&name) {
            return Err(ExecError::validation(format!("duplicate plan step: {name}"))
                .with_detail("step", name.as_str()));
        }
        let instruction =
            instruction::normalize_single(input.into(), &self.context, &RunOptions::default())?;
        self.order.push(name.clone());
        self.steps.insert(
            name.clone(),
            PlanStep {
                name,
                instruction,
                depends_on,
                opts: RunOptions::default(),
            },
        );
        Ok(self)
    }

    /// Replace the dependencies of an existing step.
    pub fn depends_on(
        mut self,
        name: &str,
        deps: Vec<String>,
    ) -> Result<Self, ExecError> {
        let step = self.steps.get_mut(name).ok_or_else(|| {
            ExecError::validation(format!("unknown plan step: {name}"))
                .with_detail("step", name)
        })?;
        step.depends_on = deps;
        Ok(self)
    }

    /// Build a plan from `(name, input, depends_on)` triples.
    pub fn build(
        pairs: Vec<(&str, InstructionInput, Vec<String>)>,
        context: Value,
    ) -> Result<Self, ExecError> {
        let mut plan = Plan::new().with_context(context)?;
        for (name, input, deps) in pairs {
            plan = plan.add(name, input, deps)?;
        }
        plan.normalize()?;
        Ok(plan)
    }

    /// Panicking variant of [`build`] for static plans.
    pub fn build_unchecked(
        pairs: Vec<(&str, InstructionInput, Vec<String>)>,
        context: Value,
    ) -> Self {
        match Self::build(pairs, context) {
            Ok(plan) => plan,
            Err(err) => panic!("invalid plan: {err}"),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn step(&self, name: &str) -> Option<&PlanStep> {
        self.steps.get(name)
    }

    /// Steps in insertion order.
    pub fn steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.order.iter().filter_map(|name| self.steps.get(name))
    }

    /// Canonical list form: `(name, instruction, depends_on)` triples in
    /// insertion order. Reverses [`build`].
    pub fn to_pairs(&self) -> Vec<(String, Instruction, Vec<String>)> {
        self.steps()
            .map(|step| {
                (
                    step.name.clone(),
                    step.instruction.clone(),
                    step.depends_on.clone(),
                )
            })
            .collect()
    }

    /// Validate the graph: every dependency names an existing step and
    /// the graph is acyclic. The cycle error carries the vertices still
    /// on the cycle.
    pub fn normalize(&self) -> Result<(), ExecError> {
        for step in self.steps() {
            for dep in &step.depends_on {
                if !self.steps.contains_key(dep) {
                    return Err(ExecError::validation(format!(
                        "step {} depends on unknown step {}",
                        step.name, dep
                    ))
                    .with_detail("step", step.name.as_str())
                    .with_detail("missing", dep.as_str()));
                }
            }
        }
        self.layer().map(|_| ())
    }

    /// Topological layering: phase N holds every step whose dependencies
    /// all live in phases < N. All steps of one phase may run
    /// concurrently.
    pub fn execution_phases(&self) -> Result<Vec<Vec<String>>, ExecError> {
        self.normalize()?;
        self.layer()
    }

    /// Kahn's algorithm by waves, insertion order within a wave.
    fn layer(&self) -> Result<Vec<Vec<String>>, ExecError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(self.order.len());
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::with_capacity(self.order.len());

        for step in self.steps() {
            in_degree.insert(&step.name, step.depends_on.len());
            dependents.entry(&step.name).or_default();
        }
        for step in self.steps() {
            for dep in &step.depends_on {
                dependents.entry(dep.as_str()).or_default().push(&step.name);
            }
        }

        let mut ready: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|name| in_degree.get(name).copied() == Some(0))
            .collect();

        let mut phases: Vec<Vec<String>> = Vec::new();
        let mut placed = 0usize;

        while !ready.is_empty() {
            let wave: Vec<&str> = ready.drain(..).collect();
            let mut next: Vec<&str> = Vec::new();
            for name in &wave {
                placed += 1;
                for &dependent in &dependents[*name] {
                    let degree = in_degree.get_mut(dependent).expect("known step");
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(dependent);
                    }
                }
            }
            phases.push(wave.into_iter().map(String::from).collect());
            // Preserve insertion order inside the next wave.
            next.sort_by_key(|name| {
                self.order
                    .iter()
                    .position(|candidate| candidate == name)
                    .unwrap_or(usize::MAX)
            });
            ready.extend(next);
        }

        if placed < self.order.len() {
            let cycle: Vec<String> = self
                .order
                .iter()
                .filter(|name| in_degree.get(name.as_str()).copied().unwrap_or(0) > 0)
                .cloned()
                .collect();
            return Err(ExecError::validation("plan contains a cycle")
                .with_detail("cycle", cycle));
        }

        Ok(phases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionOutput, ActionRef, ActionResult};
    use crate::context::RunContext;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Noop;

    #[async_trait]
    impl Action for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        async fn execute(&self, params: Params, _context: &RunContext) -> ActionResult {
            Ok(ActionOutput::new(params))
        }
    }

    fn noop() -> InstructionInput {
        InstructionInput::Action(Arc::new(Noop) as ActionRef)
    }

    #[test]
    fn phases_group_independent_steps() {
        let plan = Plan::new()
            .add("a", noop(), vec![])
            .unwrap()
            .add("b", noop(), vec![])
            .unwrap()
            .add("c", noop(), vec!["a".into(), "b".into()])
            .unwrap();
        let phases = plan.execution_phases().unwrap();
        assert_eq!(phases, vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]);
    }

    #[test]
    fn diamond_layers_correctly() {
        let plan = Plan::new()
            .add("root", noop(), vec![])
            .unwrap()
            .add("left", noop(), vec!["root".into()])
            .unwrap()
            .add("right", noop(), vec!["root".into()])
            .unwrap()
            .add("join", noop(), vec!["left".into(), "right".into()])
            .unwrap();
        let phases = plan.execution_phases().unwrap();
        assert_eq!(phases.len(), 3);
        assert_eq!(phases[0], vec!["root".to_string()]);
        assert_eq!(phases[1], vec!["left".to_string(), "right".to_string()]);
        assert_eq!(phases[2], vec!["join".to_string()]);
    }

    #[test]
    fn phases_cover_every_step_once() {
        let plan = Plan::new()
            .add("a", noop(), vec![])
            .unwrap()
            .add("b", noop(), vec!["a".into()])
            .unwrap()
            .add("c", noop(), vec!["a".into()])
            .unwrap()
            .add("d", noop(), vec!["b".into()])
            .unwrap();
        let phases = plan.execution_phases().unwrap();
        let mut all: Vec<String> = phases.into_iter().flatten().collect();
        all.sort();
        assert_eq!(all, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn cycle_is_rejected_with_vertices() {
        let plan = Plan::new()
            .add("a", noop(), vec!["b".into()])
            .unwrap()
            .add("b", noop(), vec!["a".into()])
            .unwrap();
        let err = plan.normalize().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        let cycle = err.details()["cycle"].as_array().unwrap();
        assert_eq!(cycle.len(), 2);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let plan = Plan::new().add("a", noop(), vec!["a".into()]).unwrap();
        assert!(plan.normalize().is_err());
    }

    #[test]
    fn unknown_dependency_rejected() {
        let plan = Plan::new().add("a", noop(), vec!["ghost".into()]).unwrap();
        let err = plan.normalize().unwrap_err();
        assert_eq!(err.details()["missing"], json!("ghost"));
    }

    #[test]
    fn duplicate_step_rejected() {
        let err = Plan::new()
            .add("a", noop(), vec![])
            .unwrap()
            .add("a", noop(), vec![])
            .unwrap_err();
        assert!(err.message().contains("duplicate"));
    }

    #[test]
    fn depends_on_updates_existing_step() {
        let plan = Plan::new()
            .add("a", noop(), vec![])
            .unwrap()
            .add("b", noop(), vec![])
            .unwrap()
            .depends_on("b", vec!["a".into()])
            .unwrap();
        let phases = plan.execution_phases().unwrap();
        assert_eq!(phases, vec![vec!["a".to_string()], vec!["b".to_string()]]);
    }

    #[test]
    fn depends_on_unknown_step_errors() {
        let err = Plan::new().depends_on("ghost", vec![]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn build_and_to_pairs_round_trip() {
        let plan = Plan::build(
            vec![
                ("first", noop(), vec![]),
                ("second", noop(), vec!["first".into()]),
            ],
            json!({"env": "test"}),
        )
        .unwrap();

        let pairs = plan.to_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "first");
        assert_eq!(pairs[0].2, Vec::<String>::new());
        assert_eq!(pairs[1].0, "second");
        assert_eq!(pairs[1].2, vec!["first".to_string()]);
        assert_eq!(plan.context()["env"], json!("test"));
    }

    #[test]
    fn plan_context_flows_into_instructions() {
        let plan = Plan::new()
            .with_context(json!({"tenant_id": 7}))
            .unwrap()
            .add("a", noop(), vec![])
            .unwrap();
        let step = plan.step("a").unwrap();
        assert_eq!(step.instruction.context["tenant_id"], json!(7));
    }

    #[test]
    #[should_panic(expected = "invalid plan")]
    fn build_unchecked_panics_on_cycle() {
        Plan::build_unchecked(
            vec![
                ("a", noop(), vec!["b".into()]),
                ("b", noop(), vec!["a".into()]),
            ],
            json!({}),
        );
    }
}
