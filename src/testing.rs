//! Scripted `CommandRunner` for exercising steps without touching the host.
//!
//! Responses are keyed by `Invocation::label`. Each label holds a queue; the
//! last queued response is sticky and answers every later call. Labels with
//! no scripted response succeed with empty output. Side effects (creating a
//! checkout, writing a report) can be attached per label.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::{Result, WorkflowError};
use crate::tool_runner::{CommandRunner, Invocation, ToolOutput};

type SideEffect = Box<dyn Fn(&Invocation) + Send + Sync>;

#[derive(Debug, Clone)]
enum Scripted {
    Output(ToolOutput),
    SpawnFailure,
}

#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<&'static str, VecDeque<Scripted>>>,
    effects: Mutex<HashMap<&'static str, SideEffect>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `output` as the next response for `label`.
    pub fn respond(&self, label: &'static str, output: ToolOutput) {
        self.push(label, Scripted::Output(output));
    }

    /// Queue a spawn failure for `label`.
    pub fn fail_spawn(&self, label: &'static str) {
        self.push(label, Scripted::SpawnFailure);
    }

    /// Run `effect` every time `label` is invoked, before responding.
    pub fn on_call(&self, label: &'static str, effect: impl Fn(&Invocation) + Send + Sync + 'static) {
        self.effects
            .lock()
            .expect("effects lock")
            .insert(label, Box::new(effect));
    }

    /// Every invocation seen so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.calls().iter().map(|call| call.label).collect()
    }

    pub fn count(&self, label: &str) -> usize {
        self.calls().iter().filter(|call| call.label == label).count()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls().iter().filter(|call| call.mutating).count()
    }

    fn push(&self, label: &'static str, scripted: Scripted) {
        self.responses
            .lock()
            .expect("responses lock")
            .entry(label)
            .or_default()
            .push_back(scripted);
    }

    fn next_response(&self, label: &str) -> Option<Scripted> {
        let mut responses = self.responses.lock().expect("responses lock");
        let queue = responses.get_mut(label)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(invocation.clone());

        if let Some(effect) = self.effects.lock().expect("effects lock").get(invocation.label) {
            effect(invocation);
        }

        match self.next_response(invocation.label) {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::SpawnFailure) => Err(WorkflowError::process(format!(
                "Failed to spawn {}",
                invocation.label
            ))),
            None => Ok(ToolOutput::ok("")),
        }
    }
}
