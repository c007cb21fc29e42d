use super::existing_guard::has_existing_guard;
use super::guard::{
    insert_hidden_at_return_point, prepend_hidden, GuardError, GuardSubject, GuardSynthesizer,
    Terminator,
};
use super::property::PropertyProcessor;
use super::return_points::return_points;
use super::state_machine::{PendingBodies, StateMachineRewriter};
use super::{Error, MethodPolicy, Settings, ValidationFlags, WeaveReport};
use crate::il::code::MethodBody;
use crate::il::type_graph::{MethodData, SystemLibrary};
use crate::il::{CustomAttribute, FullName};
use std::ptr;

/// How the compiler lowered the method
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MethodShape {
    Plain,

    /// `async` method: the body only sets up a state machine whose `MoveNext` does the work
    AsyncStateMachine,

    /// Iterator method: values are produced lazily by a state machine
    IteratorStateMachine,
}

impl MethodShape {
    pub fn of(method: &MethodData<'_>) -> MethodShape {
        if method.has_attribute(CustomAttribute::ASYNC_STATE_MACHINE) {
            MethodShape::AsyncStateMachine
        } else if method.has_attribute(CustomAttribute::ITERATOR_STATE_MACHINE) {
            MethodShape::IteratorStateMachine
        } else {
            MethodShape::Plain
        }
    }
}

/// Injects the guards of one method
///
/// The body is rewritten on a copy which only replaces the original once every step succeeded,
/// so a failure never leaves a method half rewritten.
pub struct MethodProcessor<'a, 'g> {
    settings: &'a Settings,
    system: &'a SystemLibrary<'g>,
    synthesizer: GuardSynthesizer<'a, 'g>,
    report: &'a mut WeaveReport,
}

impl<'a, 'g> MethodProcessor<'a, 'g> {
    pub fn new(
        settings: &'a Settings,
        system: &'a SystemLibrary<'g>,
        report: &'a mut WeaveReport,
    ) -> MethodProcessor<'a, 'g> {
        MethodProcessor {
            settings,
            system,
            synthesizer: GuardSynthesizer {
                system,
                debug_build: settings.debug_build,
            },
            report,
        }
    }

    pub fn process(&mut self, method: &'g MethodData<'g>) -> Result<(), Error> {
        let policy = MethodPolicy::resolve(method, self.settings)?;
        if !policy.is_visible(method) {
            log::trace!("Skipping {:?} (not visible)", method);
            return Ok(());
        }

        let mut body = match method.body.borrow().as_ref() {
            Some(body) => body.clone(),
            None => return Ok(()),
        };
        let document = body.debug_info.document().map(str::to_owned);
        let document = document.as_deref();
        let mut pending = PendingBodies::new();
        let mut guards = 0;

        body.simplify_macros();

        if policy.has(ValidationFlags::ARGUMENTS) {
            guards += self.inject_argument_guards(method, &policy, &mut body, document);
        }

        match MethodShape::of(method) {
            MethodShape::Plain => {
                guards += self.inject_return_guards(method, &policy, &mut body, document);
            }
            MethodShape::AsyncStateMachine => {
                let rewriter = StateMachineRewriter {
                    synthesizer: &self.synthesizer,
                    system: self.system,
                };
                guards += rewriter.guard_async_results(
                    method,
                    &policy,
                    &body,
                    &mut pending,
                    &mut self.report.warnings,
                )?;
            }
            MethodShape::IteratorStateMachine => (),
        }

        let properties = PropertyProcessor {
            synthesizer: &self.synthesizer,
            system: self.system,
        };
        guards += properties.inject_accessor_guards(method, &policy, &mut body, document);

        body.init_locals = true;
        body.optimize_macros();
        body.update_debug_info();

        log::debug!("Injected {} guards into {:?}", guards, method);
        self.report.methods_processed += 1;
        self.report.guards_injected += guards;
        *method.body.borrow_mut() = Some(body);
        pending.commit();
        Ok(())
    }

    /// Guard every parameter that must not be null, at method entry
    ///
    /// Parameters are visited last to first and each guard is prepended, so at runtime the guards
    /// run in declaration order.
    fn inject_argument_guards(
        &self,
        method: &MethodData<'g>,
        policy: &MethodPolicy,
        body: &mut MethodBody<'g>,
        document: Option<&str>,
    ) -> usize {
        let mut guards = 0;
        for (idx, parameter) in method.parameters.iter().enumerate().rev() {
            if !policy.must_guard_parameter(parameter) {
                continue;
            }

            // The value of a property setter is guarded with a property specific message
            if method
                .setter_value_parameter()
                .map_or(false, |value| ptr::eq(value, parameter))
            {
                continue;
            }

            if has_existing_guard(&body.instructions, &parameter.name, self.system) {
                log::trace!("{:?} already guards '{}'", method, parameter.name);
                continue;
            }

            let entry = match body.first_id() {
                Some(entry) => entry,
                None => break,
            };
            let message = format!("[NullGuard] {} is null.", parameter.name);
            let fragment = self.synthesizer.build(
                body,
                GuardSubject::Argument(method.argument_index(idx), &parameter.ty),
                &message,
                GuardError::ArgumentNull {
                    parameter_name: &parameter.name,
                },
                entry,
                Terminator::Throw,
            );
            prepend_hidden(body, fragment, document);
            guards += 1;
        }
        guards
    }

    /// Guard the return value and `out` parameters at every return point
    ///
    /// At each return point, the `out` parameter guards end up in declaration order, followed by
    /// the return value guard, followed by the original `ret`.
    fn inject_return_guards(
        &self,
        method: &MethodData<'g>,
        policy: &MethodPolicy,
        body: &mut MethodBody<'g>,
        document: Option<&str>,
    ) -> usize {
        let mut guards = 0;
        let points: Vec<usize> = return_points(&body.instructions).collect();

        for ret in points {
            // Getters are guarded with a property specific message
            if !method.is_getter() && policy.must_guard_return(method, &method.return_type) {
                let message = format!(
                    "[NullGuard] Return value of method '{}' is null.",
                    method.full_name()
                );
                self.synthesizer.inject_return_guard(
                    body,
                    ret,
                    &method.return_type,
                    &message,
                    Terminator::Throw,
                    document,
                );
                guards += 1;
            }

            for (idx, parameter) in method.parameters.iter().enumerate().rev() {
                if !policy.must_guard_out_parameter(parameter) {
                    continue;
                }

                // No longer the `ret` itself, but the guard ahead of it (if any)
                let continuation = body.instructions[ret].id;
                let message = format!("[NullGuard] Out parameter '{}' is null.", parameter.name);
                let fragment = self.synthesizer.build(
                    body,
                    GuardSubject::Argument(method.argument_index(idx), &parameter.ty),
                    &message,
                    GuardError::InvalidOperation,
                    continuation,
                    Terminator::Throw,
                );
                insert_hidden_at_return_point(body, ret, fragment, document);
                guards += 1;
            }
        }
        guards
    }
}
