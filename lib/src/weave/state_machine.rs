use super::guard::{GuardSynthesizer, Terminator};
use super::return_points::InstructionPoints;
use super::{Error, MethodPolicy};
use crate::il::code::{MethodBody, Op};
use crate::il::type_graph::{MethodData, SystemLibrary};
use crate::il::{FullName, TypeSig};

const METHOD_BUILDER_PREFIX: &str = "System.Runtime.CompilerServices.AsyncTaskMethodBuilder";

/// Rewritten bodies of other methods, committed along with the method being processed
pub struct PendingBodies<'g> {
    bodies: Vec<(&'g MethodData<'g>, MethodBody<'g>)>,
}

impl<'g> PendingBodies<'g> {
    pub fn new() -> PendingBodies<'g> {
        PendingBodies { bodies: vec![] }
    }

    pub fn contains(&self, method: &MethodData<'g>) -> bool {
        self.bodies
            .iter()
            .any(|(pending, _)| std::ptr::eq(*pending, method))
    }

    pub fn push(&mut self, method: &'g MethodData<'g>, body: MethodBody<'g>) {
        self.bodies.push((method, body));
    }

    /// Replace the bodies of the methods
    pub fn commit(self) {
        for (method, body) in self.bodies {
            *method.body.borrow_mut() = Some(body);
        }
    }
}

/// Guards the results of `async` methods inside their state machines
///
/// The `async` method itself only returns the builder's task, so the value to check is the one
/// handed to the builder's `SetResult`. A failed guard hands the exception to `SetException` and
/// returns, faulting the task instead of throwing out of `MoveNext`.
pub struct StateMachineRewriter<'a, 'g> {
    pub synthesizer: &'a GuardSynthesizer<'a, 'g>,
    pub system: &'a SystemLibrary<'g>,
}

impl<'a, 'g> StateMachineRewriter<'a, 'g> {
    /// Guard every `SetResult` call in the state machines referenced by the method's locals
    ///
    /// State machines without a `SetException` call (there was no `await`) get a warning and are
    /// left alone.
    pub fn guard_async_results(
        &self,
        method: &'g MethodData<'g>,
        policy: &MethodPolicy,
        body: &MethodBody<'g>,
        pending: &mut PendingBodies<'g>,
        warnings: &mut Vec<String>,
    ) -> Result<usize, Error> {
        let payload = async_payload(&method.return_type);
        if !policy.must_guard_return(method, &payload) {
            return Ok(0);
        }

        let mut guards = 0;
        for variable in &body.variables {
            let state_machine = match variable.ty.definition() {
                Some(ty) => ty,
                None => continue,
            };
            if !state_machine.is_generated_code()
                || !state_machine.is_subtype_of(self.system.classes.async_state_machine)
            {
                continue;
            }

            let move_next = state_machine.find_method("MoveNext", 0).ok_or_else(|| {
                crate::il::Error::MissingMember(format!("{}::MoveNext", state_machine.full_name()))
            })?;
            if pending.contains(move_next) {
                continue;
            }
            let mut move_next_body = match move_next.body.borrow().as_ref() {
                Some(body) => body.clone(),
                None => {
                    let name = move_next.full_name();
                    return Err(Error::Il(crate::il::Error::MissingMember(name)));
                }
            };
            move_next_body.simplify_macros();

            let set_exception = move_next_body
                .instructions
                .iter()
                .find_map(|insn| match insn.op {
                    Op::Call(callee) if is_builder_method(callee, "SetException") => Some(callee),
                    _ => None,
                });
            let set_exception = match set_exception {
                Some(set_exception) => set_exception,
                None => {
                    let warning = format!(
                        "Cannot add guards to '{}' as the method contains no await keyword.",
                        method.full_name()
                    );
                    log::warn!("{}", warning);
                    warnings.push(warning);
                    continue;
                }
            };

            let document = move_next_body.debug_info.document().map(str::to_owned);
            let message = format!(
                "[NullGuard] Return value of method '{}' is null.",
                method.full_name()
            );
            let points: Vec<usize> =
                InstructionPoints::new(&move_next_body.instructions, is_set_result_call).collect();
            for point in points {
                self.synthesizer.inject_return_guard(
                    &mut move_next_body,
                    point,
                    &payload,
                    &message,
                    Terminator::ReportFault { set_exception },
                    document.as_deref(),
                );
                guards += 1;
            }

            move_next_body.optimize_macros();
            move_next_body.update_debug_info();
            pending.push(move_next, move_next_body);
        }
        Ok(guards)
    }
}

/// Type of the value an `async` method produces: `T` for `Task<T>`, otherwise the return type
fn async_payload<'g>(return_type: &TypeSig<'g>) -> TypeSig<'g> {
    match return_type {
        TypeSig::GenericInstance(ty, arguments)
            if ty.name.starts_with("Task") && !arguments.is_empty() =>
        {
            arguments[0].clone()
        }
        other => other.clone(),
    }
}

/// Is this a one-argument method of one of the task method builders?
fn is_builder_method(method: &MethodData<'_>, name: &str) -> bool {
    method.name == name
        && method.parameters.len() == 1
        && method
            .declaring_type
            .full_name()
            .starts_with(METHOD_BUILDER_PREFIX)
}

fn is_set_result_call(op: &Op<'_>) -> bool {
    matches!(op, Op::Call(callee) if is_builder_method(callee, "SetResult"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::type_graph::{TypeGraph, TypeGraphArenas};

    #[test]
    fn payload_of_task() {
        let arenas = TypeGraphArenas::new();
        let graph = TypeGraph::new(&arenas);
        let system = graph.insert_system_types();
        let string = TypeSig::Named(system.classes.string);

        let task_of_string = TypeSig::GenericInstance(system.classes.generic_task, vec![string.clone()]);
        assert_eq!(async_payload(&task_of_string), string);

        let task = TypeSig::Named(system.classes.task);
        assert_eq!(async_payload(&task), task);
        assert_eq!(async_payload(&TypeSig::Void), TypeSig::Void);
    }

    #[test]
    fn builder_methods() {
        let arenas = TypeGraphArenas::new();
        let graph = TypeGraph::new(&arenas);
        let system = graph.insert_system_types();
        let members = &system.members;

        assert!(is_set_result_call(&Op::Call(
            members.generic_async_task_method_builder_set_result
        )));
        assert!(!is_set_result_call(&Op::Call(members.async_task_method_builder_set_result)));
        assert!(!is_set_result_call(&Op::Call(
            members.async_void_method_builder_set_result
        )));
        assert!(!is_set_result_call(&Op::CallVirt(
            members.generic_async_task_method_builder_set_result
        )));
        assert!(is_builder_method(
            members.async_task_method_builder_set_exception,
            "SetException"
        ));
        assert!(!is_builder_method(
            members.async_void_method_builder_set_exception,
            "SetException"
        ));
    }
}
